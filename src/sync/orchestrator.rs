//! Cycle orchestration: discover leaderboards, fan character work out to
//! the queues, and drive the cycle state machine.
//!
//! A cycle moves `syncing_leaderboards` -> `syncing_characters` ->
//! `completed` (or `failed`). This module owns the first transition and
//! the fan-out; the batch that settles last owns the completion.

use crate::blizzard::{ApiClient, Region};
use crate::data::models::Season;
use crate::data::{characters, cycles, jobs, seasons};
use crate::jobs::JobKind;
use crate::sync::brackets::{self, DEFAULT_QUEUE};
use crate::sync::leaderboard;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use futures::StreamExt;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::{error, info, warn};

/// Characters per batch job. Each character costs two profile calls, so a
/// batch is a few minutes of work under normal rate limits.
pub const BATCH_SIZE: usize = 50;

/// Concurrent leaderboard fetches during discovery.
const MAX_LEADERBOARD_CONCURRENCY: usize = 10;

/// Characters snapshotted more recently than this would be skippable on a
/// faster cadence. Logged for visibility; the conditional fetches already
/// make re-syncing them cheap.
const SNAPSHOT_TTL_HOURS: i64 = 1;

/// Run one full sync cycle end to end. Returns the cycle id, or None when
/// no current season exists to sync.
pub async fn run_cycle(pool: &PgPool, client: &ApiClient) -> Result<Option<i64>> {
    let Some(season) = seasons::current(pool).await? else {
        warn!("no current season configured, skipping cycle");
        return Ok(None);
    };

    let cycle = cycles::create(pool, season.id).await?;
    info!(
        cycle_id = cycle.id,
        season_id = season.id,
        season = ?season.name,
        "sync cycle started"
    );

    match run_phases(pool, client, &season, cycle.id).await {
        Ok(()) => Ok(Some(cycle.id)),
        Err(e) => {
            error!(cycle_id = cycle.id, error = ?e, "cycle failed");
            if let Err(mark_err) = cycles::mark_failed(pool, cycle.id).await {
                error!(cycle_id = cycle.id, error = ?mark_err, "failed to mark cycle failed");
            }
            Err(e)
        }
    }
}

async fn run_phases(
    pool: &PgPool,
    client: &ApiClient,
    season: &Season,
    cycle_id: i64,
) -> Result<()> {
    let per_region = sync_leaderboards(pool, client, season).await?;

    let mut batches: Vec<(Region, Vec<i64>)> = Vec::new();
    for (region, ids) in per_region {
        let ids = dedupe_sorted(ids);
        if ids.is_empty() {
            continue;
        }
        log_fresh_characters(pool, region, &ids).await;
        for chunk in ids.chunks(BATCH_SIZE) {
            batches.push((region, chunk.to_vec()));
        }
    }

    let expected = i32::try_from(batches.len()).context("batch count overflow")?;
    // Expected count lands before any job does, so a fast worker can never
    // observe completed == expected prematurely.
    cycles::start_character_phase(pool, cycle_id, expected).await?;

    if batches.is_empty() {
        // Nothing to sync; close the cycle out and refresh the meta anyway.
        if cycles::try_complete(pool, cycle_id).await? {
            let payload = JobKind::Aggregation {
                season_id: season.id,
            }
            .payload()?;
            jobs::enqueue(pool, DEFAULT_QUEUE, payload, Utc::now()).await?;
        }
        info!(cycle_id, "cycle had no character work, aggregation enqueued");
        return Ok(());
    }

    for (region, character_ids) in &batches {
        let payload = JobKind::CharacterBatch {
            cycle_id,
            region: *region,
            character_ids: character_ids.clone(),
        }
        .payload()?;
        jobs::enqueue(pool, brackets::character_queue(*region), payload, Utc::now()).await?;
    }

    info!(
        cycle_id,
        batches = batches.len(),
        "character batches enqueued"
    );
    Ok(())
}

/// Phase one: fetch every region's bracket index and sync each eligible
/// leaderboard, bounded concurrency across the whole set. Individual
/// leaderboard failures are logged and skipped; losing one bracket for a
/// cycle beats losing the cycle.
async fn sync_leaderboards(
    pool: &PgPool,
    client: &ApiClient,
    season: &Season,
) -> Result<Vec<(Region, Vec<i64>)>> {
    // Both regions' bracket indexes in flight at once.
    let indexes = futures::future::try_join_all(Region::ALL.into_iter().map(|region| async move {
        let brackets = client
            .leaderboard_index(region, season.blizzard_id)
            .await
            .with_context(|| format!("failed to fetch {region} leaderboard index"))?;
        Ok::<_, anyhow::Error>((region, brackets))
    }))
    .await?;

    let mut targets: Vec<(Region, String)> = Vec::new();
    for (region, brackets) in indexes {
        let total = brackets.len();
        let eligible = eligible_brackets(brackets);
        info!(
            %region,
            total,
            eligible = eligible.len(),
            "leaderboard index fetched"
        );
        targets.extend(eligible.into_iter().map(|b| (region, b)));
    }

    let mut results: Vec<(Region, Vec<i64>)> =
        Region::ALL.iter().map(|r| (*r, Vec::new())).collect();

    let mut stream = futures::stream::iter(targets.into_iter().map(|(region, bracket)| {
        async move {
            // policy_for was checked during filtering above
            let Some(policy) = brackets::policy_for(&bracket) else {
                return (region, bracket, Ok(Vec::new()));
            };
            let result = leaderboard::sync(pool, client, season, region, &bracket, &policy).await;
            (region, bracket, result)
        }
    }))
    .buffer_unordered(MAX_LEADERBOARD_CONCURRENCY);

    while let Some((region, bracket, result)) = stream.next().await {
        match result {
            Ok(ids) => {
                if let Some((_, bucket)) = results.iter_mut().find(|(r, _)| *r == region) {
                    bucket.extend(ids);
                }
            }
            Err(e) => {
                error!(%region, bracket, error = ?e, "leaderboard sync failed, skipping bracket");
            }
        }
    }

    Ok(results)
}

/// Brackets with a sync policy; rated BG families and anything unknown are
/// dropped at discovery.
fn eligible_brackets(brackets: Vec<String>) -> Vec<String> {
    brackets
        .into_iter()
        .filter(|b| brackets::policy_for(b).is_some())
        .collect()
}

fn dedupe_sorted(ids: Vec<i64>) -> Vec<i64> {
    let set: HashSet<i64> = ids.into_iter().collect();
    let mut ids: Vec<i64> = set.into_iter().collect();
    ids.sort_unstable();
    ids
}

/// Visibility into how much of the region's work was snapshotted recently.
/// These characters still get queued; the conditional fetch turns most of
/// them into cheap 304s.
async fn log_fresh_characters(pool: &PgPool, region: Region, ids: &[i64]) {
    let since = Utc::now() - Duration::hours(SNAPSHOT_TTL_HOURS);
    match characters::recently_snapshotted(pool, ids, since).await {
        Ok(fresh) if !fresh.is_empty() => {
            info!(
                %region,
                total = ids.len(),
                fresh = fresh.len(),
                "characters snapshotted within the last hour"
            );
        }
        Ok(_) => {}
        Err(e) => warn!(%region, error = ?e, "failed to count fresh characters"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligible_brackets_filters_by_policy() {
        let brackets = vec![
            "2v2".to_string(),
            "rbg".to_string(),
            "shuffle-mage-frost".to_string(),
            "blitz-mage-frost".to_string(),
            "3v3".to_string(),
        ];
        assert_eq!(
            eligible_brackets(brackets),
            vec!["2v2", "shuffle-mage-frost", "3v3"]
        );
    }

    #[test]
    fn test_dedupe_sorted() {
        assert_eq!(dedupe_sorted(vec![5, 3, 5, 1, 3]), vec![1, 3, 5]);
        assert!(dedupe_sorted(Vec::new()).is_empty());
    }

    #[test]
    fn test_batch_chunking() {
        let ids: Vec<i64> = (0..(BATCH_SIZE as i64 * 2 + 7)).collect();
        let chunks: Vec<_> = ids.chunks(BATCH_SIZE).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 7);
    }
}
