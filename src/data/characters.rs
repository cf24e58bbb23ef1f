//! Database operations for the `characters` table.

use crate::data::models::Character;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;

/// Identity fields for a character discovered on a leaderboard page.
#[derive(Debug, Clone)]
pub struct DiscoveredCharacter {
    pub blizzard_id: i64,
    pub name: String,
    pub realm_slug: String,
    pub faction: Option<String>,
}

/// Bulk upsert discovered characters for one region, keyed by
/// (blizzard_id, region). Returns the blizzard_id -> internal id mapping
/// from the RETURNING clause, avoiding N follow-up lookups.
pub async fn bulk_upsert(
    pool: &PgPool,
    region: &str,
    discovered: &[DiscoveredCharacter],
) -> Result<HashMap<i64, i64>> {
    if discovered.is_empty() {
        return Ok(HashMap::new());
    }

    let blizzard_ids: Vec<i64> = discovered.iter().map(|c| c.blizzard_id).collect();
    let names: Vec<&str> = discovered.iter().map(|c| c.name.as_str()).collect();
    let realm_slugs: Vec<&str> = discovered.iter().map(|c| c.realm_slug.as_str()).collect();
    let factions: Vec<Option<&str>> = discovered.iter().map(|c| c.faction.as_deref()).collect();

    let rows = sqlx::query_as::<_, (i64, i64)>(
        r#"
        INSERT INTO characters (blizzard_id, region, name, realm_slug, faction)
        SELECT ids.blizzard_id, $1, ids.name, ids.realm_slug, ids.faction
        FROM UNNEST($2::bigint[], $3::text[], $4::text[], $5::text[])
            AS ids(blizzard_id, name, realm_slug, faction)
        ON CONFLICT (blizzard_id, region)
        DO UPDATE SET
            name = EXCLUDED.name,
            realm_slug = EXCLUDED.realm_slug,
            faction = COALESCE(EXCLUDED.faction, characters.faction)
        RETURNING blizzard_id, id
        "#,
    )
    .bind(region)
    .bind(&blizzard_ids)
    .bind(&names)
    .bind(&realm_slugs)
    .bind(&factions)
    .fetch_all(pool)
    .await
    .context("failed to bulk upsert characters")?;

    Ok(rows.into_iter().collect())
}

pub async fn get(pool: &PgPool, id: i64) -> Result<Option<Character>> {
    let character = sqlx::query_as::<_, Character>("SELECT * FROM characters WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to load character")?;
    Ok(character)
}

/// Profile 404: gate the character out of sync until the cooldown lapses.
pub async fn set_unavailable_until(
    pool: &PgPool,
    id: i64,
    until: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE characters SET unavailable_until = $2 WHERE id = $1")
        .bind(id)
        .bind(until)
        .execute(pool)
        .await
        .context("failed to set character cooldown")?;
    Ok(())
}

/// Successful sync: stamp the snapshot TTL gate and clear any cooldown.
pub async fn mark_synced(pool: &PgPool, id: i64, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE characters
        SET last_equipment_snapshot_at = $2, unavailable_until = NULL
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(at)
    .execute(pool)
    .await
    .context("failed to mark character synced")?;
    Ok(())
}

/// Persist a fresh equipment validation token and gear fingerprint.
pub async fn set_equipment_state(
    pool: &PgPool,
    id: i64,
    last_modified: DateTime<Utc>,
    fingerprint: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE characters
        SET equipment_last_modified = $2, equipment_fingerprint = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(last_modified)
    .bind(fingerprint)
    .execute(pool)
    .await
    .context("failed to update equipment state")?;
    Ok(())
}

/// Persist a fresh specialization validation token and active loadout code.
pub async fn set_specialization_state(
    pool: &PgPool,
    id: i64,
    last_modified: DateTime<Utc>,
    loadout_code: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE characters
        SET specialization_last_modified = $2, talent_loadout_code = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(last_modified)
    .bind(loadout_code)
    .execute(pool)
    .await
    .context("failed to update specialization state")?;
    Ok(())
}

/// Drop stale validation tokens. Used when a token exists but no processed
/// entry row survives to copy forward from; without the token the next
/// fetch is unconditional and the data gets reprocessed.
pub async fn clear_validation_tokens(
    pool: &PgPool,
    id: i64,
    clear_equipment: bool,
    clear_specialization: bool,
) -> Result<()> {
    if !clear_equipment && !clear_specialization {
        return Ok(());
    }
    sqlx::query(
        r#"
        UPDATE characters
        SET equipment_last_modified = CASE WHEN $2 THEN NULL ELSE equipment_last_modified END,
            specialization_last_modified = CASE WHEN $3 THEN NULL ELSE specialization_last_modified END
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(clear_equipment)
    .bind(clear_specialization)
    .execute(pool)
    .await
    .context("failed to clear validation tokens")?;
    Ok(())
}

/// Of the given ids, which were refreshed within the TTL window. The
/// orchestrator uses this for logging only; every id is still forwarded.
pub async fn recently_snapshotted(
    pool: &PgPool,
    ids: &[i64],
    since: DateTime<Utc>,
) -> Result<Vec<i64>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM characters
        WHERE id = ANY($1) AND last_equipment_snapshot_at >= $2
        "#,
    )
    .bind(ids)
    .bind(since)
    .fetch_all(pool)
    .await
    .context("failed to check snapshot freshness")?;
    Ok(rows)
}
