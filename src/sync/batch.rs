//! Character batch processing: the body of one character-sync job.
//!
//! Pre-loads everything the per-character work needs in three bulk queries,
//! then fans out with bounded concurrency. Cycle bookkeeping lives in
//! `track_cycle_completion`, which the worker invokes exactly once per
//! batch, on the attempt that settles the job for good.

use crate::blizzard::{ApiClient, Region};
use crate::data::models::Entry;
use crate::data::{cycles, entries, jobs};
use crate::jobs::JobKind;
use crate::sync::brackets::DEFAULT_QUEUE;
use crate::sync::character::{self, CharacterSyncResult, CharacterWork};
use crate::sync::outcome::BatchOutcome;
use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{info, warn};

/// In-flight character syncs per batch. Each one holds two API calls, so
/// this is effectively half the request parallelism of a worker.
pub const DEFAULT_CONCURRENCY: usize = 6;

/// Effective parallelism: never more tasks than items, and always leave one
/// pool connection free for the bookkeeping queries.
fn effective_concurrency(desired: usize, batch_len: usize, pool_size: usize) -> usize {
    desired
        .min(batch_len)
        .min(pool_size.saturating_sub(1))
        .max(1)
}

fn index_by_character(rows: Vec<Entry>) -> HashMap<i64, Vec<Entry>> {
    let mut map: HashMap<i64, Vec<Entry>> = HashMap::new();
    for row in rows {
        map.entry(row.character_id).or_default().push(row);
    }
    map
}

fn index_single(rows: Vec<Entry>) -> HashMap<i64, Entry> {
    rows.into_iter().map(|r| (r.character_id, r)).collect()
}

/// Run one character batch job. Returns Err only on total failure; partial
/// failure is logged and absorbed. Cycle bookkeeping is deliberately not
/// done here: a failed attempt gets retried, and counting it on every
/// attempt would push the completed counter past the expected count.
pub async fn run(
    pool: &PgPool,
    client: &ApiClient,
    region: Region,
    character_ids: &[i64],
    concurrency: usize,
) -> Result<()> {
    let started = std::time::Instant::now();

    let entry_rows = entries::for_characters(pool, character_ids).await?;
    let equipment_rows = entries::equipment_fallbacks(pool, character_ids).await?;
    let spec_rows = entries::specialization_fallbacks(pool, character_ids).await?;

    let by_character = index_by_character(entry_rows);
    let equipment_fallbacks = index_single(equipment_rows);
    let spec_fallbacks = index_single(spec_rows);

    let empty: Vec<Entry> = Vec::new();
    let parallelism = effective_concurrency(
        concurrency,
        character_ids.len(),
        pool.options().get_max_connections() as usize,
    );

    let mut outcome = BatchOutcome::new();
    // Owned ids: borrowing the slice inside the stream's futures makes the
    // whole job future unprovable as Send for tokio::spawn.
    let ids: Vec<i64> = character_ids.to_vec();
    let mut stream = futures::stream::iter(ids.into_iter().map(|id| {
        let work = CharacterWork {
            entries: by_character.get(&id).unwrap_or(&empty),
            equipment_fallback: equipment_fallbacks.get(&id),
            specialization_fallback: spec_fallbacks.get(&id),
        };
        async move { (id, character::sync(pool, client, region, id, work).await) }
    }))
    .buffer_unordered(parallelism);

    while let Some((id, result)) = stream.next().await {
        match result {
            CharacterSyncResult::Success(status) => outcome.record_success(id, status),
            CharacterSyncResult::Failure(status, error) => {
                warn!(character_id = id, %status, error = ?error, "character sync failed");
                outcome.record_failure(id, status, format!("{error:#}"));
            }
        }
    }

    info!(
        %region,
        elapsed_ms = started.elapsed().as_millis() as u64,
        parallelism,
        "{}",
        outcome.summary()
    );

    if outcome.total_failure() {
        return Err(outcome.total_failure_error());
    }
    Ok(())
}

/// Count one settled batch against the cycle and, if it was the last one,
/// close the cycle and hand off to aggregation. Callers must invoke this
/// exactly once per batch, so `completed` never exceeds `expected`; the
/// guarded status transition in `try_complete` keeps the handoff
/// exactly-once even if two batches race on the final increment.
pub async fn track_cycle_completion(pool: &PgPool, cycle_id: i64) -> Result<()> {
    let (completed, expected) = cycles::increment_completed(pool, cycle_id).await?;
    if completed < expected {
        return Ok(());
    }

    if !cycles::try_complete(pool, cycle_id).await? {
        return Ok(());
    }

    let Some(cycle) = cycles::get(pool, cycle_id).await? else {
        return Ok(());
    };
    let payload = JobKind::Aggregation {
        season_id: cycle.season_id,
    }
    .payload()?;
    let job_id = jobs::enqueue(pool, DEFAULT_QUEUE, payload, Utc::now()).await?;
    info!(cycle_id, job_id, season_id = cycle.season_id, "cycle complete, aggregation enqueued");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blizzard::{Credential, CredentialPool};

    #[tokio::test]
    async fn test_run_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let pool = PgPool::connect_lazy("postgres://localhost/arenameta").unwrap();
        let client = ApiClient::new(CredentialPool::new(vec![Credential::new(
            "id".into(),
            "secret".into(),
            5,
            1000,
        )]))
        .unwrap();

        // Workers run this future under tokio::spawn, which requires Send.
        let fut = run(&pool, &client, Region::Us, &[1, 2, 3], 2);
        assert_send(&fut);
    }

    #[test]
    fn test_effective_concurrency_bounds() {
        // Desired wins when everything else is roomy.
        assert_eq!(effective_concurrency(6, 50, 10), 6);
        // Small batches don't spawn idle tasks.
        assert_eq!(effective_concurrency(6, 2, 10), 2);
        // One connection stays free for bookkeeping.
        assert_eq!(effective_concurrency(6, 50, 4), 3);
        // Degenerate pool still makes progress.
        assert_eq!(effective_concurrency(6, 50, 1), 1);
    }

    #[test]
    fn test_index_by_character_groups_rows() {
        let mk = |id: i64, character_id: i64| Entry {
            id,
            character_id,
            leaderboard_id: 1,
            rank: 1,
            rating: 2000,
            wins: 0,
            losses: 0,
            snapshot_at: Utc::now(),
            equipment_processed_at: None,
            specialization_processed_at: None,
            item_level: None,
            tier_set_id: None,
            tier_set_name: None,
            tier_pieces: None,
            tier_bonus_active: None,
            spec_id: None,
            hero_tree_id: None,
            hero_tree_name: None,
        };
        let map = index_by_character(vec![mk(1, 10), mk(2, 10), mk(3, 11)]);
        assert_eq!(map[&10].len(), 2);
        assert_eq!(map[&11].len(), 1);
    }
}
