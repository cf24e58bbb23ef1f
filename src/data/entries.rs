//! Database operations for the `pvp_leaderboard_entries` table.
//!
//! Entries are uniquely keyed by (character_id, leaderboard_id). Leaderboard
//! sync owns rank/rating/wins/losses; the character sync stages own the
//! processed columns. The upsert here must never touch the latter.

use crate::data::models::{Entry, EquipmentAttrs, SpecializationAttrs};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

const ENTRY_COLUMNS: &str = r#"
    id, character_id, leaderboard_id, rank, rating, wins, losses, snapshot_at,
    equipment_processed_at, specialization_processed_at,
    item_level, tier_set_id, tier_set_name, tier_pieces, tier_bonus_active,
    spec_id, hero_tree_id, hero_tree_name
"#;

/// Ranking fields for one entry, as parsed from a leaderboard page.
#[derive(Debug, Clone)]
pub struct RankedRow {
    pub character_id: i64,
    pub rank: i32,
    pub rating: i32,
    pub wins: i32,
    pub losses: i32,
}

/// Upsert ranking rows for one leaderboard. Updates rank/rating/wins/losses
/// and the snapshot stamp only, leaving processed columns untouched.
pub async fn upsert_rankings(
    conn: &mut PgConnection,
    leaderboard_id: i64,
    rows: &[RankedRow],
    snapshot_at: DateTime<Utc>,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let character_ids: Vec<i64> = rows.iter().map(|r| r.character_id).collect();
    let ranks: Vec<i32> = rows.iter().map(|r| r.rank).collect();
    let ratings: Vec<i32> = rows.iter().map(|r| r.rating).collect();
    let wins: Vec<i32> = rows.iter().map(|r| r.wins).collect();
    let losses: Vec<i32> = rows.iter().map(|r| r.losses).collect();

    sqlx::query(
        r#"
        INSERT INTO pvp_leaderboard_entries
            (character_id, leaderboard_id, rank, rating, wins, losses, snapshot_at)
        SELECT r.character_id, $1, r.rank, r.rating, r.wins, r.losses, $7
        FROM UNNEST($2::bigint[], $3::int[], $4::int[], $5::int[], $6::int[])
            AS r(character_id, rank, rating, wins, losses)
        ON CONFLICT (character_id, leaderboard_id)
        DO UPDATE SET
            rank = EXCLUDED.rank,
            rating = EXCLUDED.rating,
            wins = EXCLUDED.wins,
            losses = EXCLUDED.losses,
            snapshot_at = EXCLUDED.snapshot_at
        "#,
    )
    .bind(leaderboard_id)
    .bind(&character_ids)
    .bind(&ranks)
    .bind(&ratings)
    .bind(&wins)
    .bind(&losses)
    .bind(snapshot_at)
    .execute(conn)
    .await
    .context("failed to upsert leaderboard entries")?;
    Ok(())
}

/// Delete rows for characters that fell off this leaderboard. Entries on
/// other leaderboards for the same characters are unaffected.
pub async fn prune_absent(
    conn: &mut PgConnection,
    leaderboard_id: i64,
    present_character_ids: &[i64],
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM pvp_leaderboard_entries
        WHERE leaderboard_id = $1 AND character_id != ALL($2)
        "#,
    )
    .bind(leaderboard_id)
    .bind(present_character_ids)
    .execute(conn)
    .await
    .context("failed to prune absent entries")?;
    Ok(result.rows_affected())
}

/// All current entries for a set of characters, one per leaderboard each.
pub async fn for_characters(pool: &PgPool, character_ids: &[i64]) -> Result<Vec<Entry>> {
    if character_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, Entry>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM pvp_leaderboard_entries WHERE character_id = ANY($1)"
    ))
    .bind(character_ids)
    .fetch_all(pool)
    .await
    .context("failed to load entries for characters")?;
    Ok(rows)
}

/// Most recently equipment-processed entry per character, used as the
/// copy-forward source when a conditional fetch reports no change.
pub async fn equipment_fallbacks(pool: &PgPool, character_ids: &[i64]) -> Result<Vec<Entry>> {
    if character_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, Entry>(&format!(
        r#"
        SELECT DISTINCT ON (character_id) {ENTRY_COLUMNS}
        FROM pvp_leaderboard_entries
        WHERE character_id = ANY($1) AND equipment_processed_at IS NOT NULL
        ORDER BY character_id, equipment_processed_at DESC
        "#
    ))
    .bind(character_ids)
    .fetch_all(pool)
    .await
    .context("failed to load equipment fallbacks")?;
    Ok(rows)
}

/// Most recently specialization-processed entry per character.
pub async fn specialization_fallbacks(
    pool: &PgPool,
    character_ids: &[i64],
) -> Result<Vec<Entry>> {
    if character_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, Entry>(&format!(
        r#"
        SELECT DISTINCT ON (character_id) {ENTRY_COLUMNS}
        FROM pvp_leaderboard_entries
        WHERE character_id = ANY($1) AND specialization_processed_at IS NOT NULL
        ORDER BY character_id, specialization_processed_at DESC
        "#
    ))
    .bind(character_ids)
    .fetch_all(pool)
    .await
    .context("failed to load specialization fallbacks")?;
    Ok(rows)
}

/// Write equipment-derived columns onto a set of entries with a fresh
/// processed stamp.
pub async fn apply_equipment(
    pool: &PgPool,
    entry_ids: &[i64],
    attrs: &EquipmentAttrs,
    processed_at: DateTime<Utc>,
) -> Result<()> {
    if entry_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        UPDATE pvp_leaderboard_entries
        SET item_level = $2,
            tier_set_id = $3,
            tier_set_name = $4,
            tier_pieces = $5,
            tier_bonus_active = $6,
            equipment_processed_at = $7
        WHERE id = ANY($1)
        "#,
    )
    .bind(entry_ids)
    .bind(attrs.item_level)
    .bind(attrs.tier_set_id)
    .bind(attrs.tier_set_name.as_deref())
    .bind(attrs.tier_pieces)
    .bind(attrs.tier_bonus_active)
    .bind(processed_at)
    .execute(pool)
    .await
    .context("failed to apply equipment attributes")?;
    Ok(())
}

/// Write specialization-derived columns onto a set of entries with a fresh
/// processed stamp.
pub async fn apply_specialization(
    pool: &PgPool,
    entry_ids: &[i64],
    attrs: &SpecializationAttrs,
    processed_at: DateTime<Utc>,
) -> Result<()> {
    if entry_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        UPDATE pvp_leaderboard_entries
        SET spec_id = $2,
            hero_tree_id = $3,
            hero_tree_name = $4,
            specialization_processed_at = $5
        WHERE id = ANY($1)
        "#,
    )
    .bind(entry_ids)
    .bind(attrs.spec_id)
    .bind(attrs.hero_tree_id)
    .bind(attrs.hero_tree_name.as_deref())
    .bind(processed_at)
    .execute(pool)
    .await
    .context("failed to apply specialization attributes")?;
    Ok(())
}
