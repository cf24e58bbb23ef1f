//! Database operations for the `character_items` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;

/// One equipped item after processing.
#[derive(Debug, Clone)]
pub struct CharacterItem {
    pub slot: String,
    pub item_id: i64,
    pub item_level: i32,
    pub enchant_id: Option<i64>,
    /// JSON array of socketed gem item ids.
    pub sockets: Value,
}

/// Atomically replace a character's equipped-item rows.
pub async fn replace_for_character(
    pool: &PgPool,
    character_id: i64,
    items: &[CharacterItem],
) -> Result<()> {
    let slots: Vec<&str> = items.iter().map(|i| i.slot.as_str()).collect();
    let item_ids: Vec<i64> = items.iter().map(|i| i.item_id).collect();
    let item_levels: Vec<i32> = items.iter().map(|i| i.item_level).collect();
    let enchant_ids: Vec<Option<i64>> = items.iter().map(|i| i.enchant_id).collect();
    let sockets: Vec<Value> = items.iter().map(|i| i.sockets.clone()).collect();

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query("DELETE FROM character_items WHERE character_id = $1")
        .bind(character_id)
        .execute(&mut *tx)
        .await
        .context("failed to delete character items")?;

    if !items.is_empty() {
        sqlx::query(
            r#"
            INSERT INTO character_items
                (character_id, slot, item_id, item_level, enchant_id, sockets)
            SELECT $1, i.slot, i.item_id, i.item_level, i.enchant_id, i.sockets
            FROM UNNEST($2::text[], $3::bigint[], $4::int[], $5::bigint[], $6::jsonb[])
                AS i(slot, item_id, item_level, enchant_id, sockets)
            "#,
        )
        .bind(character_id)
        .bind(&slots)
        .bind(&item_ids)
        .bind(&item_levels)
        .bind(&enchant_ids)
        .bind(&sockets)
        .execute(&mut *tx)
        .await
        .context("failed to insert character items")?;
    }

    tx.commit().await.context("failed to commit transaction")?;
    Ok(())
}
