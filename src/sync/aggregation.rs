//! Meta aggregation: rebuild the per-season popularity and build tables
//! from processed leaderboard entries.
//!
//! The four rebuilds are independent reads over the same cohort, so they
//! run concurrently and fail independently; one broken rebuild doesn't
//! leave the other three stale.

use crate::data::meta;
use anyhow::Result;
use sqlx::PgPool;
use tracing::{error, info};

/// Cohort size per (bracket, spec) for aggregation. Wider than the sync
/// floor so mid-ladder builds still show up in usage percentages.
pub const AGGREGATION_TOP_N: i64 = 1000;

pub async fn run(pool: &PgPool, season_id: i64) -> Result<()> {
    let started = std::time::Instant::now();

    let (items, enchants, gems, talents) = tokio::join!(
        meta::rebuild_item_popularity(pool, season_id, AGGREGATION_TOP_N),
        meta::rebuild_enchant_popularity(pool, season_id, AGGREGATION_TOP_N),
        meta::rebuild_gem_popularity(pool, season_id, AGGREGATION_TOP_N),
        meta::rebuild_talent_meta(pool, season_id, AGGREGATION_TOP_N),
    );

    let mut failed = 0usize;
    for (what, result) in [
        ("items", items),
        ("enchants", enchants),
        ("gems", gems),
        ("talents", talents),
    ] {
        match result {
            Ok(rows) => info!(season_id, what, rows, "aggregation rebuilt"),
            Err(e) => {
                failed += 1;
                error!(season_id, what, error = ?e, "aggregation rebuild failed");
            }
        }
    }

    info!(
        season_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        failed,
        "aggregation finished"
    );

    if failed > 0 {
        anyhow::bail!("{failed} of 4 aggregation rebuilds failed for season {season_id}");
    }
    Ok(())
}
