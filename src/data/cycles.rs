//! Database operations for the `sync_cycles` table.
//!
//! Completion tracking is the delicate part: many batch workers finish
//! near-simultaneously, so the completed counter is advanced with a single
//! atomic UPDATE..RETURNING and the completion decision is made against the
//! value that statement returned, never a re-read.

use crate::data::models::{SyncCycle, cycle_status};
use anyhow::{Context, Result};
use sqlx::PgPool;

const CYCLE_COLUMNS: &str = r#"
    id, season_id, status, snapshot_at,
    expected_character_batches, completed_character_batches
"#;

pub async fn create(pool: &PgPool, season_id: i64) -> Result<SyncCycle> {
    let cycle = sqlx::query_as::<_, SyncCycle>(&format!(
        r#"
        INSERT INTO sync_cycles (season_id, status, snapshot_at)
        VALUES ($1, $2, now())
        RETURNING {CYCLE_COLUMNS}
        "#
    ))
    .bind(season_id)
    .bind(cycle_status::SYNCING_LEADERBOARDS)
    .fetch_one(pool)
    .await
    .context("failed to create sync cycle")?;
    Ok(cycle)
}

pub async fn get(pool: &PgPool, id: i64) -> Result<Option<SyncCycle>> {
    let cycle = sqlx::query_as::<_, SyncCycle>(&format!(
        "SELECT {CYCLE_COLUMNS} FROM sync_cycles WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to load sync cycle")?;
    Ok(cycle)
}

/// Record the batch fan-out and enter the character sync phase.
pub async fn start_character_phase(pool: &PgPool, id: i64, expected_batches: i32) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sync_cycles
        SET status = $2, expected_character_batches = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(cycle_status::SYNCING_CHARACTERS)
    .bind(expected_batches)
    .execute(pool)
    .await
    .context("failed to start character phase")?;
    Ok(())
}

/// Atomically bump the completed-batch counter and return
/// (completed, expected) as of this increment. The caller that sees
/// completed == expected owns the completion transition.
pub async fn increment_completed(pool: &PgPool, id: i64) -> Result<(i32, i32)> {
    let counts = sqlx::query_as::<_, (i32, i32)>(
        r#"
        UPDATE sync_cycles
        SET completed_character_batches = completed_character_batches + 1
        WHERE id = $1
        RETURNING completed_character_batches, expected_character_batches
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .context("failed to increment completed batches")?;
    Ok(counts)
}

/// Transition to completed. Guarded on the current status so the
/// transition happens at most once even if racing callers both believe
/// they observed the final increment.
pub async fn try_complete(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sync_cycles
        SET status = $2
        WHERE id = $1 AND status = $3
        "#,
    )
    .bind(id)
    .bind(cycle_status::COMPLETED)
    .bind(cycle_status::SYNCING_CHARACTERS)
    .execute(pool)
    .await
    .context("failed to complete sync cycle")?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_failed(pool: &PgPool, id: i64) -> Result<()> {
    sqlx::query("UPDATE sync_cycles SET status = $2 WHERE id = $1")
        .bind(id)
        .bind(cycle_status::FAILED)
        .execute(pool)
        .await
        .context("failed to mark sync cycle failed")?;
    Ok(())
}
