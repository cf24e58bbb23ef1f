//! Database operations for the `character_talents` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

/// Which talent tree a selection came from.
pub mod talent_kind {
    pub const CLASS: &str = "class";
    pub const SPEC: &str = "spec";
    pub const HERO: &str = "hero";
}

#[derive(Debug, Clone)]
pub struct CharacterTalent {
    pub talent_id: i64,
    pub kind: &'static str,
    pub rank: i32,
}

/// Atomically replace a character's talent selections.
pub async fn replace_for_character(
    pool: &PgPool,
    character_id: i64,
    talents: &[CharacterTalent],
) -> Result<()> {
    let talent_ids: Vec<i64> = talents.iter().map(|t| t.talent_id).collect();
    let kinds: Vec<&str> = talents.iter().map(|t| t.kind).collect();
    let ranks: Vec<i32> = talents.iter().map(|t| t.rank).collect();

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query("DELETE FROM character_talents WHERE character_id = $1")
        .bind(character_id)
        .execute(&mut *tx)
        .await
        .context("failed to delete character talents")?;

    if !talents.is_empty() {
        sqlx::query(
            r#"
            INSERT INTO character_talents (character_id, talent_id, kind, rank)
            SELECT $1, t.talent_id, t.kind, t.rank
            FROM UNNEST($2::bigint[], $3::text[], $4::int[]) AS t(talent_id, kind, rank)
            "#,
        )
        .bind(character_id)
        .bind(&talent_ids)
        .bind(&kinds)
        .bind(&ranks)
        .execute(&mut *tx)
        .await
        .context("failed to insert character talents")?;
    }

    tx.commit().await.context("failed to commit transaction")?;
    Ok(())
}
