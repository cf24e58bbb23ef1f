//! Leaderboard sync: fetch one (region, bracket) ranking page and reconcile
//! the persisted entries against it.

use crate::blizzard::{ApiClient, Region};
use crate::blizzard::types::LeaderboardEntry;
use crate::data::entries::RankedRow;
use crate::data::models::Season;
use crate::data::{characters, entries, leaderboards};
use crate::sync::brackets::BracketPolicy;
use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded retries for deadlock/serialization failures on the leaderboard
/// row lock.
const LOCK_RETRY_ATTEMPTS: u32 = 3;

/// Apply the bracket policy: top-N truncation first (pages are
/// rank-ordered), then the rating floor as a safety net.
fn apply_policy<'a>(
    entries: &'a [LeaderboardEntry],
    policy: &BracketPolicy,
) -> Vec<&'a LeaderboardEntry> {
    entries
        .iter()
        .take(policy.top_n)
        .filter(|e| e.rating >= policy.rating_min)
        .collect()
}

/// Identity rows for the character upsert, one per distinct character.
/// Combined-format boards list a character once per qualifying spec, and a
/// repeated key in a single `ON CONFLICT DO UPDATE` statement is a
/// Postgres error.
fn discovered_characters(kept: &[&LeaderboardEntry]) -> Vec<characters::DiscoveredCharacter> {
    let mut seen: HashSet<i64> = HashSet::new();
    kept.iter()
        .filter(|e| seen.insert(e.character.id))
        .map(|e| characters::DiscoveredCharacter {
            blizzard_id: e.character.id,
            name: e.character.name.clone(),
            realm_slug: e.character.realm.slug.clone(),
            faction: e.faction.as_ref().map(|f| f.kind.clone()),
        })
        .collect()
}

/// Collapse duplicate characters in a raw page to their best (lowest)
/// ranked occurrence. Combined-format boards can list a character once per
/// qualifying spec.
fn dedupe_best_rank(rows: Vec<RankedRow>) -> Vec<RankedRow> {
    let mut best: HashMap<i64, RankedRow> = HashMap::new();
    for row in rows {
        match best.get(&row.character_id) {
            Some(existing) if existing.rank <= row.rank => {}
            _ => {
                best.insert(row.character_id, row);
            }
        }
    }
    best.into_values().collect()
}

/// Postgres deadlock (40P01) or serialization failure (40001).
fn is_lock_contention(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .filter_map(|e| e.as_database_error())
        .filter_map(|db| db.code())
        .any(|code| code == "40001" || code == "40P01")
}

/// Sync one leaderboard. Returns the internal ids of every character
/// touched, for the orchestrator to batch.
pub async fn sync(
    pool: &PgPool,
    client: &ApiClient,
    season: &Season,
    region: Region,
    bracket: &str,
    policy: &BracketPolicy,
) -> Result<Vec<i64>> {
    let page = client
        .leaderboard(region, season.blizzard_id, bracket)
        .await
        .with_context(|| format!("failed to fetch {region}/{bracket} leaderboard"))?;

    let kept = apply_policy(&page.entries, policy);
    debug!(
        %region,
        bracket,
        fetched = page.entries.len(),
        kept = kept.len(),
        "leaderboard page fetched"
    );

    // Character upsert happens before the leaderboard lock so the identity
    // writes don't extend the critical section.
    let discovered = discovered_characters(&kept);
    let id_map = characters::bulk_upsert(pool, region.as_str(), &discovered).await?;

    let rows: Vec<RankedRow> = kept
        .iter()
        .filter_map(|e| {
            let character_id = *id_map.get(&e.character.id)?;
            Some(RankedRow {
                character_id,
                rank: e.rank,
                rating: e.rating,
                wins: e.season_match_statistics.won,
                losses: e.season_match_statistics.lost,
            })
        })
        .collect();
    let rows = dedupe_best_rank(rows);

    let board = leaderboards::find_or_create(pool, season.id, bracket, region.as_str()).await?;

    let mut attempt = 0;
    loop {
        match reconcile(pool, board.id, &rows).await {
            Ok(pruned) => {
                info!(
                    %region,
                    bracket,
                    entries = rows.len(),
                    pruned,
                    "leaderboard synced"
                );
                break;
            }
            Err(e) if is_lock_contention(&e) && attempt < LOCK_RETRY_ATTEMPTS => {
                attempt += 1;
                let backoff_ms = rand::rng().random_range(50..250) * attempt as u64;
                warn!(
                    %region,
                    bracket,
                    attempt,
                    backoff_ms,
                    "lock contention on leaderboard, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(rows.iter().map(|r| r.character_id).collect())
}

/// The transactional core: lock the leaderboard row, upsert the ranking
/// rows, prune characters that fell off, and advance the watermark.
async fn reconcile(pool: &PgPool, leaderboard_id: i64, rows: &[RankedRow]) -> Result<u64> {
    let snapshot_at = Utc::now();
    let present: Vec<i64> = rows.iter().map(|r| r.character_id).collect();

    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    leaderboards::lock(&mut *tx, leaderboard_id).await?;
    entries::upsert_rankings(&mut *tx, leaderboard_id, rows, snapshot_at).await?;
    let pruned = entries::prune_absent(&mut *tx, leaderboard_id, &present).await?;
    leaderboards::touch_synced(&mut *tx, leaderboard_id).await?;
    tx.commit().await.context("failed to commit transaction")?;
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blizzard::types::{LeaderboardCharacter, MatchStatistics, RealmRef};

    fn entry(id: i64, rank: i32, rating: i32) -> LeaderboardEntry {
        LeaderboardEntry {
            character: LeaderboardCharacter {
                id,
                name: format!("char{id}"),
                realm: RealmRef {
                    slug: "tichondrius".into(),
                },
            },
            faction: None,
            rank,
            rating,
            season_match_statistics: MatchStatistics { won: 10, lost: 5 },
        }
    }

    #[test]
    fn test_apply_policy_truncates_then_filters() {
        let entries: Vec<LeaderboardEntry> = (1..=10)
            .map(|i| entry(i, i as i32, 2500 - i as i32 * 100))
            .collect();
        let policy = BracketPolicy {
            top_n: 5,
            rating_min: 2200,
        };
        // Top 5 are ratings 2400..2000; floor removes the two below 2200.
        let kept = apply_policy(&entries, &policy);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|e| e.rating >= 2200));
        assert_eq!(kept[0].rank, 1);
    }

    #[test]
    fn test_discovered_characters_collapse_repeat_listings() {
        // A combined-format page lists character 7 twice; the identity
        // upsert must see it once or Postgres rejects the statement.
        let entries = vec![entry(7, 3, 2450), entry(8, 5, 2400), entry(7, 12, 2301)];
        let kept: Vec<&LeaderboardEntry> = entries.iter().collect();

        let discovered = discovered_characters(&kept);
        assert_eq!(discovered.len(), 2);
        let ids: Vec<i64> = discovered.iter().map(|d| d.blizzard_id).collect();
        assert_eq!(ids, vec![7, 8]);
    }

    #[test]
    fn test_dedupe_keeps_best_rank() {
        let rows = vec![
            RankedRow {
                character_id: 7,
                rank: 12,
                rating: 2301,
                wins: 1,
                losses: 1,
            },
            RankedRow {
                character_id: 7,
                rank: 3,
                rating: 2450,
                wins: 2,
                losses: 0,
            },
            RankedRow {
                character_id: 8,
                rank: 5,
                rating: 2400,
                wins: 3,
                losses: 3,
            },
        ];
        let mut deduped = dedupe_best_rank(rows);
        deduped.sort_by_key(|r| r.character_id);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].rank, 3);
        assert_eq!(deduped[0].rating, 2450);
    }

    #[test]
    fn test_lock_contention_detection() {
        let plain = anyhow::anyhow!("some other failure");
        assert!(!is_lock_contention(&plain));
    }
}
