//! Database operations for the `pvp_seasons` table.

use crate::data::models::Season;
use anyhow::{Context, Result};
use sqlx::PgPool;

/// The season to sync against: the one flagged current, or failing that the
/// highest Blizzard season id we know about.
pub async fn current(pool: &PgPool) -> Result<Option<Season>> {
    let season = sqlx::query_as::<_, Season>(
        r#"
        SELECT id, blizzard_id, name, is_current
        FROM pvp_seasons
        ORDER BY is_current DESC, blizzard_id DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await
    .context("failed to resolve current season")?;
    Ok(season)
}
