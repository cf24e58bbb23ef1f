//! Row types shared across the data modules.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

/// A competitive season. `blizzard_id` is the season id used in API paths.
#[derive(Debug, Clone, FromRow)]
pub struct Season {
    pub id: i64,
    pub blizzard_id: i64,
    pub name: Option<String>,
    pub is_current: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct Character {
    pub id: i64,
    pub blizzard_id: i64,
    pub region: String,
    pub name: String,
    pub realm_slug: String,
    pub faction: Option<String>,
    /// Cooldown gate set after a profile 404 so future cycles skip the
    /// character without spending an API call.
    pub unavailable_until: Option<DateTime<Utc>>,
    /// Per-sub-resource conditional fetch tokens (Last-Modified stamps).
    pub equipment_last_modified: Option<DateTime<Utc>>,
    pub specialization_last_modified: Option<DateTime<Utc>>,
    /// Coarse TTL gate used by the orchestrator for logging only.
    pub last_equipment_snapshot_at: Option<DateTime<Utc>>,
    /// Fingerprint of the equipped gear, used to skip item-table rebuilds
    /// when nothing actually changed.
    pub equipment_fingerprint: Option<String>,
    pub talent_loadout_code: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Leaderboard {
    pub id: i64,
    pub season_id: i64,
    pub bracket: String,
    pub region: String,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// One ranking row. At most one per (character_id, leaderboard_id); that
/// uniqueness is what makes leaderboard sync idempotent.
#[derive(Debug, Clone, FromRow)]
pub struct Entry {
    pub id: i64,
    pub character_id: i64,
    pub leaderboard_id: i64,
    pub rank: i32,
    pub rating: i32,
    pub wins: i32,
    pub losses: i32,
    pub snapshot_at: DateTime<Utc>,
    pub equipment_processed_at: Option<DateTime<Utc>>,
    pub specialization_processed_at: Option<DateTime<Utc>>,
    pub item_level: Option<f32>,
    pub tier_set_id: Option<i64>,
    pub tier_set_name: Option<String>,
    pub tier_pieces: Option<i32>,
    pub tier_bonus_active: Option<bool>,
    pub spec_id: Option<i64>,
    pub hero_tree_id: Option<i64>,
    pub hero_tree_name: Option<String>,
}

/// Equipment-derived columns written onto entries after processing.
#[derive(Debug, Clone, PartialEq)]
pub struct EquipmentAttrs {
    pub item_level: Option<f32>,
    pub tier_set_id: Option<i64>,
    pub tier_set_name: Option<String>,
    pub tier_pieces: Option<i32>,
    pub tier_bonus_active: Option<bool>,
}

/// Specialization-derived columns written onto entries after processing.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecializationAttrs {
    pub spec_id: Option<i64>,
    pub hero_tree_id: Option<i64>,
    pub hero_tree_name: Option<String>,
}

/// Cycle lifecycle states, persisted as text.
pub mod cycle_status {
    pub const SYNCING_LEADERBOARDS: &str = "syncing_leaderboards";
    pub const SYNCING_CHARACTERS: &str = "syncing_characters";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

#[derive(Debug, Clone, FromRow)]
pub struct SyncCycle {
    pub id: i64,
    pub season_id: i64,
    pub status: String,
    pub snapshot_at: DateTime<Utc>,
    pub expected_character_batches: i32,
    pub completed_character_batches: i32,
}

/// A queued background job. Locked rows are invisible to other workers via
/// `FOR UPDATE SKIP LOCKED`.
#[derive(Debug, Clone, FromRow)]
pub struct SyncJob {
    pub id: i64,
    pub queue: String,
    pub payload: Value,
    pub retry_count: i32,
    pub max_retries: i32,
    pub execute_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
}
