//! Per-character reconciliation: conditional fetch of the two expensive
//! profile sub-resources and propagation of derived attributes onto every
//! leaderboard entry the character holds.

use crate::blizzard::{ApiClient, ApiError, Conditional, Region};
use crate::data::models::{Character, Entry, EquipmentAttrs, SpecializationAttrs};
use crate::data::{characters, entries, items, talents};
use crate::sync::outcome::SyncStatus;
use crate::sync::{equipment, talents as talent_processing};
use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};

/// How long a character stays gated after a profile 404. Transfers and
/// renames resolve on this timescale; anything shorter wastes calls.
const UNAVAILABLE_COOLDOWN_DAYS: i64 = 14;

/// Outcome of one character sync, split so the batch layer can file it
/// into [`BatchOutcome`](crate::sync::outcome::BatchOutcome) correctly.
#[derive(Debug)]
pub enum CharacterSyncResult {
    Success(SyncStatus),
    Failure(SyncStatus, anyhow::Error),
}

/// Bulk-preloaded inputs for one character, assembled by the batch job so
/// each item doesn't issue three point lookups.
#[derive(Debug)]
pub struct CharacterWork<'a> {
    pub entries: &'a [Entry],
    /// Most recently equipment-processed entry anywhere, for copy-forward.
    pub equipment_fallback: Option<&'a Entry>,
    pub specialization_fallback: Option<&'a Entry>,
}

fn equipment_attrs_from(entry: &Entry) -> EquipmentAttrs {
    EquipmentAttrs {
        item_level: entry.item_level,
        tier_set_id: entry.tier_set_id,
        tier_set_name: entry.tier_set_name.clone(),
        tier_pieces: entry.tier_pieces,
        tier_bonus_active: entry.tier_bonus_active,
    }
}

fn specialization_attrs_from(entry: &Entry) -> SpecializationAttrs {
    SpecializationAttrs {
        spec_id: entry.spec_id,
        hero_tree_id: entry.hero_tree_id,
        hero_tree_name: entry.hero_tree_name.clone(),
    }
}

pub async fn sync(
    pool: &PgPool,
    client: &ApiClient,
    region: Region,
    character_id: i64,
    work: CharacterWork<'_>,
) -> CharacterSyncResult {
    match run(pool, client, region, character_id, work).await {
        Ok(result) => result,
        Err(e) => CharacterSyncResult::Failure(SyncStatus::EquipmentUnavailable, e),
    }
}

async fn run(
    pool: &PgPool,
    client: &ApiClient,
    region: Region,
    character_id: i64,
    work: CharacterWork<'_>,
) -> Result<CharacterSyncResult> {
    let Some(character) = characters::get(pool, character_id).await? else {
        return Ok(CharacterSyncResult::Success(SyncStatus::NotFound));
    };

    let now = Utc::now();
    if character
        .unavailable_until
        .is_some_and(|until| until > now)
    {
        debug!(character_id, "character on unavailability cooldown, skipping");
        return Ok(CharacterSyncResult::Success(SyncStatus::SkippedUnavailable));
    }

    if work.entries.is_empty() {
        return Ok(CharacterSyncResult::Success(SyncStatus::NoEntries));
    }

    // A validation token with no surviving processed row means a 304 would
    // leave us nothing to copy forward. Drop the token so the fetch comes
    // back unconditional and the data is reprocessed from scratch.
    let stale_equipment_token =
        character.equipment_last_modified.is_some() && work.equipment_fallback.is_none();
    let stale_spec_token = character.specialization_last_modified.is_some()
        && work.specialization_fallback.is_none();
    if stale_equipment_token || stale_spec_token {
        characters::clear_validation_tokens(
            pool,
            character_id,
            stale_equipment_token,
            stale_spec_token,
        )
        .await?;
    }

    let equipment_prior = if stale_equipment_token {
        None
    } else {
        character.equipment_last_modified
    };
    let spec_prior = if stale_spec_token {
        None
    } else {
        character.specialization_last_modified
    };

    // Both sub-resources fetch concurrently; each one's result is handled
    // independently of the other's.
    let (equipment_result, spec_result) = tokio::join!(
        client.equipment_summary(region, &character.realm_slug, &character.name, equipment_prior),
        client.specialization_summary(region, &character.realm_slug, &character.name, spec_prior),
    );

    let entry_ids: Vec<i64> = work.entries.iter().map(|e| e.id).collect();

    if let Err(failure) = handle_equipment(
        pool,
        &character,
        &entry_ids,
        work.equipment_fallback,
        equipment_result,
    )
    .await?
    {
        return Ok(CharacterSyncResult::Failure(
            SyncStatus::EquipmentUnavailable,
            failure,
        ));
    }

    if let Err(failure) = handle_specialization(
        pool,
        &character,
        &entry_ids,
        work.specialization_fallback,
        spec_result,
    )
    .await?
    {
        return Ok(CharacterSyncResult::Failure(
            SyncStatus::TalentsUnavailable,
            failure,
        ));
    }

    characters::mark_synced(pool, character_id, Utc::now()).await?;
    Ok(CharacterSyncResult::Success(SyncStatus::Synced))
}

/// 404 on either sub-resource gates the whole character; transient errors
/// fail this cycle without a cooldown.
async fn gate_if_not_found(pool: &PgPool, character: &Character, err: &ApiError) -> Result<()> {
    if let ApiError::NotFound { .. } = err {
        let until = Utc::now() + Duration::days(UNAVAILABLE_COOLDOWN_DAYS);
        warn!(
            character_id = character.id,
            name = %character.name,
            until = %until,
            "profile not found, applying cooldown"
        );
        characters::set_unavailable_until(pool, character.id, until).await?;
    }
    Ok(())
}

/// Inner Ok(()) = sub-resource reconciled; inner Err = recorded failure.
async fn handle_equipment(
    pool: &PgPool,
    character: &Character,
    entry_ids: &[i64],
    fallback: Option<&Entry>,
    result: Result<Conditional<crate::blizzard::types::EquipmentSummary>, ApiError>,
) -> Result<std::result::Result<(), anyhow::Error>> {
    match result {
        Ok(Conditional::Unchanged) => {
            // Copy the last processed values forward with a fresh stamp;
            // the data didn't change but this cycle still processed it.
            if let Some(source) = fallback {
                let attrs = equipment_attrs_from(source);
                entries::apply_equipment(pool, entry_ids, &attrs, Utc::now()).await?;
            }
            Ok(Ok(()))
        }
        Ok(Conditional::Changed {
            body,
            last_modified,
        }) => {
            let processed = equipment::process(&body);
            let gear_unchanged = character
                .equipment_fingerprint
                .as_deref()
                .is_some_and(|stored| stored == processed.fingerprint);
            if !gear_unchanged {
                items::replace_for_character(pool, character.id, &processed.items).await?;
            }
            entries::apply_equipment(pool, entry_ids, &processed.attrs, Utc::now()).await?;
            characters::set_equipment_state(
                pool,
                character.id,
                last_modified,
                &processed.fingerprint,
            )
            .await?;
            Ok(Ok(()))
        }
        Err(e) => {
            gate_if_not_found(pool, character, &e).await?;
            Ok(Err(e.into()))
        }
    }
}

async fn handle_specialization(
    pool: &PgPool,
    character: &Character,
    entry_ids: &[i64],
    fallback: Option<&Entry>,
    result: Result<Conditional<crate::blizzard::types::SpecializationSummary>, ApiError>,
) -> Result<std::result::Result<(), anyhow::Error>> {
    match result {
        Ok(Conditional::Unchanged) => {
            if let Some(source) = fallback {
                let attrs = specialization_attrs_from(source);
                entries::apply_specialization(pool, entry_ids, &attrs, Utc::now()).await?;
            }
            Ok(Ok(()))
        }
        Ok(Conditional::Changed {
            body,
            last_modified,
        }) => {
            let processed = talent_processing::process(&body);
            talents::replace_for_character(pool, character.id, &processed.talents).await?;
            entries::apply_specialization(pool, entry_ids, &processed.attrs, Utc::now()).await?;
            characters::set_specialization_state(
                pool,
                character.id,
                last_modified,
                processed.loadout_code.as_deref(),
            )
            .await?;
            Ok(Ok(()))
        }
        Err(e) => {
            gate_if_not_found(pool, character, &e).await?;
            Ok(Err(e.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry_with_attrs() -> Entry {
        Entry {
            id: 1,
            character_id: 10,
            leaderboard_id: 20,
            rank: 3,
            rating: 2400,
            wins: 50,
            losses: 20,
            snapshot_at: Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap(),
            equipment_processed_at: Some(Utc.with_ymd_and_hms(2026, 1, 10, 1, 0, 0).unwrap()),
            specialization_processed_at: None,
            item_level: Some(482.5),
            tier_set_id: Some(1678),
            tier_set_name: Some("Waycrest Legacy".into()),
            tier_pieces: Some(4),
            tier_bonus_active: Some(true),
            spec_id: Some(263),
            hero_tree_id: Some(44),
            hero_tree_name: Some("Stormbringer".into()),
        }
    }

    #[test]
    fn test_copy_forward_preserves_equipment_attrs() {
        let source = entry_with_attrs();
        let attrs = equipment_attrs_from(&source);
        assert_eq!(attrs.item_level, Some(482.5));
        assert_eq!(attrs.tier_set_id, Some(1678));
        assert_eq!(attrs.tier_pieces, Some(4));
        assert_eq!(attrs.tier_bonus_active, Some(true));
    }

    #[test]
    fn test_copy_forward_preserves_specialization_attrs() {
        let source = entry_with_attrs();
        let attrs = specialization_attrs_from(&source);
        assert_eq!(attrs.spec_id, Some(263));
        assert_eq!(attrs.hero_tree_id, Some(44));
        assert_eq!(attrs.hero_tree_name.as_deref(), Some("Stormbringer"));
    }
}
