//! Blizzard API client: rate-limited, credential-rotating HTTP access with
//! conditional (If-Modified-Since) fetch support for profile endpoints.

pub mod auth;
pub mod errors;
pub mod json;
pub mod limiter;
pub mod types;

pub use auth::{Credential, CredentialPool};
pub use errors::ApiError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use types::{EquipmentSummary, Leaderboard, LeaderboardIndex, SpecializationSummary};
use unicode_normalization::UnicodeNormalization;

/// Fallback backoff when a 429 arrives without a usable Retry-After header.
const DEFAULT_RETRY_AFTER: u64 = 1;

/// Game regions the pipeline syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Us,
    Eu,
}

impl Region {
    pub const ALL: [Region; 2] = [Region::Us, Region::Eu];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Us => "us",
            Region::Eu => "eu",
        }
    }

    pub fn locale(&self) -> &'static str {
        match self {
            Region::Us => "en_US",
            Region::Eu => "en_GB",
        }
    }

    fn host(&self) -> String {
        format!("https://{}.api.blizzard.com", self.as_str())
    }

    fn dynamic_namespace(&self) -> String {
        format!("dynamic-{}", self.as_str())
    }

    fn profile_namespace(&self) -> String {
        format!("profile-{}", self.as_str())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Region {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "us" => Ok(Region::Us),
            "eu" => Ok(Region::Eu),
            other => Err(anyhow::anyhow!("unknown region: {other}")),
        }
    }
}

/// Lowercase a character or realm name into the slug form profile URLs
/// expect, stripping combining marks (e.g. "Ångbåt" -> "angbat").
pub fn profile_slug(name: &str) -> String {
    name.nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Outcome of a conditional fetch.
#[derive(Debug)]
pub enum Conditional<T> {
    /// 304; the stored copy is still current and the prior validation token
    /// remains valid.
    Unchanged,
    /// 200 with a fresh body and the server's Last-Modified stamp.
    Changed {
        body: T,
        last_modified: DateTime<Utc>,
    },
}

pub struct ApiClient {
    http: reqwest::Client,
    pool: CredentialPool,
}

impl ApiClient {
    pub fn new(pool: CredentialPool) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, pool })
    }

    /// One rate-limited request. On 429: penalize the credential, honor the
    /// Retry-After hint, and retry exactly once; a second 429 propagates.
    async fn request(
        &self,
        region: Region,
        path: &str,
        namespace: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", region.host(), path);

        for attempt in 0..2 {
            let credential = self.pool.next();
            credential.limiter.acquire().await;
            let token = credential.access_token(&self.http).await?;

            let mut request = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .query(&[("namespace", namespace), ("locale", region.locale())]);
            if let Some(since) = if_modified_since {
                request = request.header(
                    reqwest::header::IF_MODIFIED_SINCE,
                    since.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
                );
            }

            let response = request.send().await?;
            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER);

                // Drain the bucket so sibling tasks on this credential back
                // off instead of immediately re-triggering the limit.
                credential.limiter.penalize(retry_after as f64).await;

                if attempt == 0 {
                    warn!(%region, path, retry_after, "rate limited, retrying once");
                    tokio::time::sleep(Duration::from_secs(retry_after)).await;
                    continue;
                }
                return Err(ApiError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }

            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(ApiError::NotFound { url });
            }

            if status == reqwest::StatusCode::NOT_MODIFIED || status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Transport {
                status: status.as_u16(),
                url,
                body,
            });
        }

        unreachable!("request loop always returns within two attempts")
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        region: Region,
        path: &str,
        namespace: &str,
    ) -> Result<T, ApiError> {
        let response = self.request(region, path, namespace, None).await?;
        let url = response.url().to_string();
        let body = response.text().await?;
        json::decode(&body).map_err(|source| ApiError::Decode { url, source })
    }

    /// Conditional GET for profile sub-resources. A 304 means the caller's
    /// stored copy (and validation token) are still good.
    async fn get_if_modified_since<T: serde::de::DeserializeOwned>(
        &self,
        region: Region,
        path: &str,
        prior: Option<DateTime<Utc>>,
    ) -> Result<Conditional<T>, ApiError> {
        let response = self
            .request(region, path, &region.profile_namespace(), prior)
            .await?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            debug!(%region, path, "unchanged since last fetch");
            return Ok(Conditional::Unchanged);
        }

        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.to_utc())
            .unwrap_or_else(Utc::now);

        let url = response.url().to_string();
        let body = response.text().await?;
        let body = json::decode(&body).map_err(|source| ApiError::Decode { url, source })?;
        Ok(Conditional::Changed {
            body,
            last_modified,
        })
    }

    /// Bracket names available for a season in a region.
    pub async fn leaderboard_index(
        &self,
        region: Region,
        season_id: i64,
    ) -> Result<Vec<String>, ApiError> {
        let path = format!("/data/wow/pvp-season/{season_id}/pvp-leaderboard/index");
        let index: LeaderboardIndex = self
            .get(region, &path, &region.dynamic_namespace())
            .await?;
        Ok(index.leaderboards.into_iter().map(|b| b.name).collect())
    }

    /// Full ranking page for one (season, bracket, region).
    pub async fn leaderboard(
        &self,
        region: Region,
        season_id: i64,
        bracket: &str,
    ) -> Result<Leaderboard, ApiError> {
        let path = format!("/data/wow/pvp-season/{season_id}/pvp-leaderboard/{bracket}");
        self.get(region, &path, &region.dynamic_namespace()).await
    }

    pub async fn equipment_summary(
        &self,
        region: Region,
        realm_slug: &str,
        character_name: &str,
        prior: Option<DateTime<Utc>>,
    ) -> Result<Conditional<EquipmentSummary>, ApiError> {
        let path = format!(
            "/profile/wow/character/{realm_slug}/{}/equipment",
            profile_slug(character_name)
        );
        self.get_if_modified_since(region, &path, prior).await
    }

    pub async fn specialization_summary(
        &self,
        region: Region,
        realm_slug: &str,
        character_name: &str,
        prior: Option<DateTime<Utc>>,
    ) -> Result<Conditional<SpecializationSummary>, ApiError> {
        let path = format!(
            "/profile/wow/character/{realm_slug}/{}/specializations",
            profile_slug(character_name)
        );
        self.get_if_modified_since(region, &path, prior).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_slug_strips_diacritics() {
        assert_eq!(profile_slug("Ångbåt"), "angbat");
        assert_eq!(profile_slug("Séraphine"), "seraphine");
        assert_eq!(profile_slug("Thrall"), "thrall");
    }

    #[test]
    fn test_region_namespaces() {
        assert_eq!(Region::Us.dynamic_namespace(), "dynamic-us");
        assert_eq!(Region::Eu.profile_namespace(), "profile-eu");
        assert_eq!(Region::Eu.locale(), "en_GB");
    }

    #[test]
    fn test_region_parse() {
        assert_eq!("us".parse::<Region>().unwrap(), Region::Us);
        assert!("kr".parse::<Region>().is_err());
    }
}
