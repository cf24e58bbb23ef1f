//! Database operations for the `pvp_leaderboards` table.

use crate::data::models::Leaderboard;
use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};

/// Find or create the leaderboard row for (season, bracket, region).
pub async fn find_or_create(
    pool: &PgPool,
    season_id: i64,
    bracket: &str,
    region: &str,
) -> Result<Leaderboard> {
    // The no-op DO UPDATE makes RETURNING yield the row on conflict too.
    let board = sqlx::query_as::<_, Leaderboard>(
        r#"
        INSERT INTO pvp_leaderboards (season_id, bracket, region)
        VALUES ($1, $2, $3)
        ON CONFLICT (season_id, bracket, region)
        DO UPDATE SET bracket = EXCLUDED.bracket
        RETURNING id, season_id, bracket, region, last_synced_at
        "#,
    )
    .bind(season_id)
    .bind(bracket)
    .bind(region)
    .fetch_one(pool)
    .await
    .context("failed to find or create leaderboard")?;
    Ok(board)
}

/// Take the row lock serializing concurrent syncs of the same leaderboard.
/// Held until the surrounding transaction commits.
pub async fn lock(conn: &mut PgConnection, id: i64) -> Result<()> {
    sqlx::query("SELECT id FROM pvp_leaderboards WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_one(conn)
        .await
        .context("failed to lock leaderboard row")?;
    Ok(())
}

/// Advance the sync watermark.
pub async fn touch_synced(conn: &mut PgConnection, id: i64) -> Result<()> {
    sqlx::query("UPDATE pvp_leaderboards SET last_synced_at = now() WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await
        .context("failed to advance leaderboard watermark")?;
    Ok(())
}
