//! Database-backed job queue (`pvp_sync_jobs` table).
//!
//! Workers claim rows with `FOR UPDATE SKIP LOCKED` so any number of them
//! can poll the same queue without coordination. Queues are plain names;
//! each region's character batches go to their own queue so one region's
//! backlog never starves the other.

use crate::data::models::SyncJob;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

const JOB_COLUMNS: &str = "id, queue, payload, retry_count, max_retries, execute_at, locked_at";

pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Locks older than this are treated as abandoned and become claimable
/// again. A worker crash leaves `locked_at` set with nobody to clear it;
/// live workers give up on a job well before this via their own timeout.
pub const STALE_LOCK_SECS: i64 = 15 * 60;

pub async fn enqueue(
    pool: &PgPool,
    queue: &str,
    payload: Value,
    execute_at: DateTime<Utc>,
) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO pvp_sync_jobs (queue, payload, execute_at, max_retries)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(queue)
    .bind(payload)
    .bind(execute_at)
    .bind(DEFAULT_MAX_RETRIES)
    .fetch_one(pool)
    .await
    .context("failed to enqueue job")?;
    Ok(id)
}

/// Claim the next runnable job on a queue, or None if the queue is idle.
/// Jobs whose lock has gone stale count as runnable.
pub async fn lock_next(pool: &PgPool, queue: &str) -> Result<Option<SyncJob>> {
    let job = sqlx::query_as::<_, SyncJob>(&format!(
        r#"
        UPDATE pvp_sync_jobs
        SET locked_at = now()
        WHERE id = (
            SELECT id FROM pvp_sync_jobs
            WHERE queue = $1
              AND (locked_at IS NULL OR locked_at < now() - make_interval(secs => $2))
              AND execute_at <= now()
            ORDER BY execute_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(queue)
    .bind(STALE_LOCK_SECS as f64)
    .fetch_optional(pool)
    .await
    .context("failed to lock next job")?;
    Ok(job)
}

/// Successful completion removes the row.
pub async fn complete(pool: &PgPool, id: i64) -> Result<()> {
    delete(pool, id).await
}

/// Release a job for another attempt at `execute_at`.
pub async fn retry(
    pool: &PgPool,
    id: i64,
    retry_count: i32,
    execute_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pvp_sync_jobs
        SET locked_at = NULL, retry_count = $2, execute_at = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(retry_count)
    .bind(execute_at)
    .execute(pool)
    .await
    .context("failed to release job for retry")?;
    Ok(())
}

/// Release a job unchanged (shutdown mid-processing).
pub async fn unlock(pool: &PgPool, id: i64) -> Result<()> {
    sqlx::query("UPDATE pvp_sync_jobs SET locked_at = NULL WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to unlock job")?;
    Ok(())
}

pub async fn delete(pool: &PgPool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM pvp_sync_jobs WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete job")?;
    Ok(())
}
