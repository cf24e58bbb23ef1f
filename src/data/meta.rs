//! Meta popularity aggregation over top-ranked characters.
//!
//! Every aggregate shares the same cohort: the most recent
//! equipment-processed entry per (bracket, character), ranked by rating
//! within (bracket, spec) and cut at the top N. `RANK()` is deliberate:
//! ties at the boundary share a rank, so a cohort may exceed N. Each
//! rebuild is an atomic replace (delete season rows + insert) inside one
//! transaction, so readers never see a half-written table.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};

/// Shared top-cohort CTE. `$1` = season id, `$2` = top-N cutoff.
const COHORT_CTE: &str = r#"
    WITH latest AS (
        SELECT DISTINCT ON (l.bracket, e.character_id)
            e.character_id,
            l.bracket,
            e.spec_id,
            e.rating,
            e.wins,
            e.losses,
            e.hero_tree_id,
            e.hero_tree_name
        FROM pvp_leaderboard_entries e
        JOIN pvp_leaderboards l ON l.id = e.leaderboard_id
        WHERE l.season_id = $1
          AND e.equipment_processed_at IS NOT NULL
          AND e.spec_id IS NOT NULL
        ORDER BY l.bracket, e.character_id, e.rating DESC
    ),
    ranked AS (
        SELECT latest.*,
               RANK() OVER (PARTITION BY bracket, spec_id ORDER BY rating DESC) AS rk
        FROM latest
    ),
    top_chars AS (
        SELECT * FROM ranked WHERE rk <= $2
    )
"#;

async fn clear_season(conn: &mut PgConnection, table: &str, season_id: i64) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {table} WHERE season_id = $1"))
        .bind(season_id)
        .execute(conn)
        .await
        .with_context(|| format!("failed to clear {table}"))?;
    Ok(())
}

/// Item usage per (bracket, spec, slot), as a share of all equipped items
/// in that slot across the cohort.
pub async fn rebuild_item_popularity(pool: &PgPool, season_id: i64, top_n: i64) -> Result<u64> {
    let sql = format!(
        r#"
        INSERT INTO meta_item_popularity
            (season_id, bracket, spec_id, slot, item_id, usage_count, usage_pct)
        {COHORT_CTE},
        slot_totals AS (
            SELECT tc.bracket, tc.spec_id, ci.slot, COUNT(*) AS total
            FROM top_chars tc
            JOIN character_items ci ON ci.character_id = tc.character_id
            GROUP BY tc.bracket, tc.spec_id, ci.slot
        )
        SELECT $1, tc.bracket, tc.spec_id, ci.slot, ci.item_id,
               COUNT(*),
               COUNT(*)::float8 / st.total
        FROM top_chars tc
        JOIN character_items ci ON ci.character_id = tc.character_id
        JOIN slot_totals st
            ON st.bracket = tc.bracket AND st.spec_id = tc.spec_id AND st.slot = ci.slot
        GROUP BY tc.bracket, tc.spec_id, ci.slot, ci.item_id, st.total
        "#
    );

    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    clear_season(&mut *tx, "meta_item_popularity", season_id).await?;
    let inserted = sqlx::query(&sql)
        .bind(season_id)
        .bind(top_n)
        .execute(&mut *tx)
        .await
        .context("failed to rebuild item popularity")?
        .rows_affected();
    tx.commit().await.context("failed to commit transaction")?;
    Ok(inserted)
}

/// Enchant usage per (bracket, spec, slot). The denominator only counts
/// enchanted items in that slot; unenchanted gear doesn't dilute the share.
pub async fn rebuild_enchant_popularity(
    pool: &PgPool,
    season_id: i64,
    top_n: i64,
) -> Result<u64> {
    let sql = format!(
        r#"
        INSERT INTO meta_enchant_popularity
            (season_id, bracket, spec_id, slot, enchant_id, usage_count, usage_pct)
        {COHORT_CTE},
        slot_totals AS (
            SELECT tc.bracket, tc.spec_id, ci.slot, COUNT(*) AS total
            FROM top_chars tc
            JOIN character_items ci ON ci.character_id = tc.character_id
            WHERE ci.enchant_id IS NOT NULL
            GROUP BY tc.bracket, tc.spec_id, ci.slot
        )
        SELECT $1, tc.bracket, tc.spec_id, ci.slot, ci.enchant_id,
               COUNT(*),
               COUNT(*)::float8 / st.total
        FROM top_chars tc
        JOIN character_items ci ON ci.character_id = tc.character_id
        JOIN slot_totals st
            ON st.bracket = tc.bracket AND st.spec_id = tc.spec_id AND st.slot = ci.slot
        WHERE ci.enchant_id IS NOT NULL
        GROUP BY tc.bracket, tc.spec_id, ci.slot, ci.enchant_id, st.total
        "#
    );

    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    clear_season(&mut *tx, "meta_enchant_popularity", season_id).await?;
    let inserted = sqlx::query(&sql)
        .bind(season_id)
        .bind(top_n)
        .execute(&mut *tx)
        .await
        .context("failed to rebuild enchant popularity")?
        .rows_affected();
    tx.commit().await.context("failed to commit transaction")?;
    Ok(inserted)
}

/// Gem usage per (bracket, spec, slot). Sockets are stored as a JSON array
/// of gem item ids; the denominator only counts socketed items.
pub async fn rebuild_gem_popularity(pool: &PgPool, season_id: i64, top_n: i64) -> Result<u64> {
    let sql = format!(
        r#"
        INSERT INTO meta_gem_popularity
            (season_id, bracket, spec_id, slot, gem_item_id, usage_count, usage_pct)
        {COHORT_CTE},
        socketed AS (
            SELECT tc.bracket, tc.spec_id, ci.slot,
                   jsonb_array_elements_text(ci.sockets)::bigint AS gem_item_id
            FROM top_chars tc
            JOIN character_items ci ON ci.character_id = tc.character_id
            WHERE jsonb_array_length(ci.sockets) > 0
        ),
        slot_totals AS (
            SELECT tc.bracket, tc.spec_id, ci.slot, COUNT(*) AS total
            FROM top_chars tc
            JOIN character_items ci ON ci.character_id = tc.character_id
            WHERE jsonb_array_length(ci.sockets) > 0
            GROUP BY tc.bracket, tc.spec_id, ci.slot
        )
        SELECT $1, s.bracket, s.spec_id, s.slot, s.gem_item_id,
               COUNT(*),
               COUNT(*)::float8 / st.total
        FROM socketed s
        JOIN slot_totals st
            ON st.bracket = s.bracket AND st.spec_id = s.spec_id AND st.slot = s.slot
        GROUP BY s.bracket, s.spec_id, s.slot, s.gem_item_id, st.total
        "#
    );

    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    clear_season(&mut *tx, "meta_gem_popularity", season_id).await?;
    let inserted = sqlx::query(&sql)
        .bind(season_id)
        .bind(top_n)
        .execute(&mut *tx)
        .await
        .context("failed to rebuild gem popularity")?
        .rows_affected();
    tx.commit().await.context("failed to commit transaction")?;
    Ok(inserted)
}

/// Talent meta: loadout builds, individual talent picks, and hero trees.
/// All three tables replace together in one transaction since they come
/// from the same specialization data.
pub async fn rebuild_talent_meta(pool: &PgPool, season_id: i64, top_n: i64) -> Result<u64> {
    let builds_sql = format!(
        r#"
        INSERT INTO meta_talent_builds
            (season_id, bracket, spec_id, loadout_code, usage_count, usage_pct,
             avg_rating, winrate)
        {COHORT_CTE},
        cohort_sizes AS (
            SELECT bracket, spec_id, COUNT(*) AS total
            FROM top_chars
            GROUP BY bracket, spec_id
        )
        SELECT $1, tc.bracket, tc.spec_id, c.talent_loadout_code,
               COUNT(*),
               COUNT(*)::float8 / cs.total,
               AVG(tc.rating),
               SUM(tc.wins)::float8 / NULLIF(SUM(tc.wins + tc.losses), 0)
        FROM top_chars tc
        JOIN characters c ON c.id = tc.character_id
        JOIN cohort_sizes cs ON cs.bracket = tc.bracket AND cs.spec_id = tc.spec_id
        WHERE c.talent_loadout_code IS NOT NULL
        GROUP BY tc.bracket, tc.spec_id, c.talent_loadout_code, cs.total
        "#
    );

    let picks_sql = format!(
        r#"
        INSERT INTO meta_talent_picks
            (season_id, bracket, spec_id, talent_id, kind, usage_count, usage_pct,
             avg_rating)
        {COHORT_CTE},
        cohort_sizes AS (
            SELECT bracket, spec_id, COUNT(*) AS total
            FROM top_chars
            GROUP BY bracket, spec_id
        )
        SELECT $1, tc.bracket, tc.spec_id, ct.talent_id, ct.kind,
               COUNT(*),
               COUNT(*)::float8 / cs.total,
               AVG(tc.rating)
        FROM top_chars tc
        JOIN character_talents ct ON ct.character_id = tc.character_id
        JOIN cohort_sizes cs ON cs.bracket = tc.bracket AND cs.spec_id = tc.spec_id
        GROUP BY tc.bracket, tc.spec_id, ct.talent_id, ct.kind, cs.total
        "#
    );

    let trees_sql = format!(
        r#"
        INSERT INTO meta_hero_trees
            (season_id, bracket, spec_id, hero_tree_id, hero_tree_name,
             usage_count, usage_pct, avg_rating, winrate)
        {COHORT_CTE},
        cohort_sizes AS (
            SELECT bracket, spec_id, COUNT(*) AS total
            FROM top_chars
            GROUP BY bracket, spec_id
        )
        SELECT $1, tc.bracket, tc.spec_id, tc.hero_tree_id, MIN(tc.hero_tree_name),
               COUNT(*),
               COUNT(*)::float8 / cs.total,
               AVG(tc.rating),
               SUM(tc.wins)::float8 / NULLIF(SUM(tc.wins + tc.losses), 0)
        FROM top_chars tc
        JOIN cohort_sizes cs ON cs.bracket = tc.bracket AND cs.spec_id = tc.spec_id
        WHERE tc.hero_tree_id IS NOT NULL
        GROUP BY tc.bracket, tc.spec_id, tc.hero_tree_id, cs.total
        "#
    );

    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    clear_season(&mut *tx, "meta_talent_builds", season_id).await?;
    clear_season(&mut *tx, "meta_talent_picks", season_id).await?;
    clear_season(&mut *tx, "meta_hero_trees", season_id).await?;

    let mut inserted = 0u64;
    for (sql, what) in [
        (&builds_sql, "talent builds"),
        (&picks_sql, "talent picks"),
        (&trees_sql, "hero trees"),
    ] {
        inserted += sqlx::query(sql)
            .bind(season_id)
            .bind(top_n)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to rebuild {what}"))?
            .rows_affected();
    }

    tx.commit().await.context("failed to commit transaction")?;
    Ok(inserted)
}
