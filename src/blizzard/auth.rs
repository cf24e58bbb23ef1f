//! OAuth client-credentials handling and round-robin credential rotation.
//!
//! Each configured credential owns its own [`TokenBucketLimiter`], so a pool
//! of N credentials multiplies sustainable throughput by N. The pool is an
//! explicit value passed into the client; nothing here is process-global.

use crate::blizzard::errors::ApiError;
use crate::blizzard::limiter::TokenBucketLimiter;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const TOKEN_URL: &str = "https://oauth.battle.net/token";

/// Refresh tokens this long before they actually expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// One Blizzard API credential with its cached OAuth token and rate limiter.
pub struct Credential {
    client_id: String,
    client_secret: String,
    pub limiter: TokenBucketLimiter,
    token: Mutex<Option<CachedToken>>,
}

impl Credential {
    pub fn new(
        client_id: String,
        client_secret: String,
        requests_per_second: u32,
        hourly_quota: u32,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            limiter: TokenBucketLimiter::new(requests_per_second, hourly_quota),
            token: Mutex::new(None),
        }
    }

    /// Return a valid access token, fetching a fresh one when the cached
    /// token is missing or near expiry.
    pub async fn access_token(&self, http: &reqwest::Client) -> Result<String, ApiError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() + EXPIRY_MARGIN < token.expires_at
        {
            return Ok(token.access_token.clone());
        }

        let response = http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Transport {
                status: status.as_u16(),
                url: TOKEN_URL.to_string(),
                body,
            });
        }

        let body = response.text().await?;
        let token: TokenResponse = crate::blizzard::json::decode(&body).map_err(|source| {
            ApiError::Decode {
                url: TOKEN_URL.to_string(),
                source,
            }
        })?;

        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access_token)
    }
}

/// Round-robin rotation over one or more credentials.
pub struct CredentialPool {
    credentials: Vec<Arc<Credential>>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    /// Build a pool. Panics in debug builds if empty; config validation
    /// rejects that case before we get here.
    pub fn new(credentials: Vec<Credential>) -> Self {
        debug_assert!(!credentials.is_empty());
        Self {
            credentials: credentials.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// The next credential in rotation. With one credential this always
    /// returns the same one, degrading to a plain client.
    pub fn next(&self) -> Arc<Credential> {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.credentials.len();
        self.credentials[idx].clone()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(id: &str) -> Credential {
        Credential::new(id.to_string(), "secret".to_string(), 10, 36_000)
    }

    #[test]
    fn test_round_robin_rotation() {
        let pool = CredentialPool::new(vec![credential("a"), credential("b"), credential("c")]);
        let ids: Vec<String> = (0..6).map(|_| pool.next().client_id.clone()).collect();
        assert_eq!(ids, ["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_single_credential_pool() {
        let pool = CredentialPool::new(vec![credential("only")]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.next().client_id, "only");
        assert_eq!(pool.next().client_id, "only");
    }
}
