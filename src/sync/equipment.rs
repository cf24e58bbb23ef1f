//! Equipment processing: turn an equipment summary payload into derived
//! entry attributes and `character_items` rows.

use crate::blizzard::types::{EquipmentSummary, EquippedItem};
use crate::data::items::CharacterItem;
use crate::data::models::EquipmentAttrs;
use serde_json::json;

/// Cosmetic slots with no bearing on the meta.
const EXCLUDED_SLOTS: [&str; 2] = ["TABARD", "SHIRT"];

/// Everything derived from one equipment payload.
#[derive(Debug)]
pub struct ProcessedEquipment {
    pub attrs: EquipmentAttrs,
    pub items: Vec<CharacterItem>,
    /// Stable digest of the equipped gear. When it matches the stored one,
    /// the item-table rebuild can be skipped entirely.
    pub fingerprint: String,
}

fn included(item: &EquippedItem) -> bool {
    if EXCLUDED_SLOTS.contains(&item.slot.kind.as_str()) {
        return false;
    }
    item.level.as_ref().is_some_and(|l| l.value > 0)
}

fn permanent_enchant_id(item: &EquippedItem) -> Option<i64> {
    item.enchantments
        .iter()
        .find(|e| {
            e.enchantment_slot
                .as_ref()
                .is_some_and(|s| s.kind == "PERMANENT")
        })
        .or_else(|| item.enchantments.first())
        .map(|e| e.enchantment_id)
}

fn socketed_gem_ids(item: &EquippedItem) -> Vec<i64> {
    item.sockets
        .iter()
        .filter_map(|s| s.item.as_ref().map(|i| i.id))
        .collect()
}

pub fn process(summary: &EquipmentSummary) -> ProcessedEquipment {
    let equipped: Vec<&EquippedItem> =
        summary.equipped_items.iter().filter(|i| included(i)).collect();

    let items: Vec<CharacterItem> = equipped
        .iter()
        .map(|item| CharacterItem {
            slot: item.slot.kind.clone(),
            item_id: item.item.id,
            item_level: item.level.as_ref().map(|l| l.value).unwrap_or(0),
            enchant_id: permanent_enchant_id(item),
            sockets: json!(socketed_gem_ids(item)),
        })
        .collect();

    let item_level = if items.is_empty() {
        None
    } else {
        let total: i64 = items.iter().map(|i| i64::from(i.item_level)).sum();
        Some(total as f32 / items.len() as f32)
    };

    // Tier set state comes from whichever equipped item carries set data;
    // the set payload itself lists which pieces are worn.
    let tier = equipped.iter().find_map(|i| i.set.as_ref());
    let tier_pieces = tier.map(|set| {
        set.items.iter().filter(|piece| piece.is_equipped).count() as i32
    });

    ProcessedEquipment {
        attrs: EquipmentAttrs {
            item_level,
            tier_set_id: tier.map(|set| set.item_set.id),
            tier_set_name: tier.and_then(|set| set.item_set.name.clone()),
            tier_pieces,
            tier_bonus_active: tier_pieces.map(|n| n >= 4),
        },
        fingerprint: fingerprint(&items),
        items,
    }
}

/// "slot:item:ilvl:enchant" per item, sorted so slot iteration order never
/// changes the digest.
pub fn fingerprint(items: &[CharacterItem]) -> String {
    let mut parts: Vec<String> = items
        .iter()
        .map(|i| {
            format!(
                "{}:{}:{}:{}",
                i.slot,
                i.item_id,
                i.item_level,
                i.enchant_id.unwrap_or(0)
            )
        })
        .collect();
    parts.sort();
    parts.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blizzard::json::decode;

    fn summary(body: &str) -> EquipmentSummary {
        decode(body).unwrap()
    }

    #[test]
    fn test_process_skips_cosmetic_and_zero_ilvl_items() {
        let summary = summary(
            r#"{
                "equipped_items": [
                    { "item": { "id": 100 }, "slot": { "type": "HEAD" }, "level": { "value": 480 } },
                    { "item": { "id": 200 }, "slot": { "type": "SHIRT" }, "level": { "value": 1 } },
                    { "item": { "id": 300 }, "slot": { "type": "TABARD" }, "level": { "value": 1 } },
                    { "item": { "id": 400 }, "slot": { "type": "WRIST" }, "level": { "value": 0 } }
                ]
            }"#,
        );
        let processed = process(&summary);
        assert_eq!(processed.items.len(), 1);
        assert_eq!(processed.items[0].item_id, 100);
        assert_eq!(processed.attrs.item_level, Some(480.0));
    }

    #[test]
    fn test_process_extracts_tier_set() {
        let summary = summary(
            r#"{
                "equipped_items": [
                    {
                        "item": { "id": 100 }, "slot": { "type": "CHEST" }, "level": { "value": 489 },
                        "set": {
                            "item_set": { "id": 1678, "name": "Waycrest Legacy" },
                            "items": [
                                { "is_equipped": true }, { "is_equipped": true },
                                { "is_equipped": true }, { "is_equipped": true },
                                { "is_equipped": false }
                            ]
                        }
                    }
                ]
            }"#,
        );
        let attrs = process(&summary).attrs;
        assert_eq!(attrs.tier_set_id, Some(1678));
        assert_eq!(attrs.tier_set_name.as_deref(), Some("Waycrest Legacy"));
        assert_eq!(attrs.tier_pieces, Some(4));
        assert_eq!(attrs.tier_bonus_active, Some(true));
    }

    #[test]
    fn test_process_prefers_permanent_enchant() {
        let summary = summary(
            r#"{
                "equipped_items": [
                    {
                        "item": { "id": 100 }, "slot": { "type": "BACK" }, "level": { "value": 480 },
                        "enchantments": [
                            { "enchantment_id": 1, "enchantment_slot": { "type": "TEMPORARY" } },
                            { "enchantment_id": 7403, "enchantment_slot": { "type": "PERMANENT" } }
                        ]
                    }
                ]
            }"#,
        );
        assert_eq!(process(&summary).items[0].enchant_id, Some(7403));
    }

    #[test]
    fn test_process_collects_socketed_gems() {
        let summary = summary(
            r#"{
                "equipped_items": [
                    {
                        "item": { "id": 100 }, "slot": { "type": "NECK" }, "level": { "value": 480 },
                        "sockets": [
                            { "item": { "id": 213743 } },
                            { "socket_type": { "type": "PRISMATIC" } }
                        ]
                    }
                ]
            }"#,
        );
        assert_eq!(process(&summary).items[0].sockets, json!([213743]));
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = CharacterItem {
            slot: "HEAD".into(),
            item_id: 1,
            item_level: 480,
            enchant_id: None,
            sockets: json!([]),
        };
        let b = CharacterItem {
            slot: "CHEST".into(),
            item_id: 2,
            item_level: 485,
            enchant_id: Some(7403),
            sockets: json!([]),
        };
        assert_eq!(
            fingerprint(&[a.clone(), b.clone()]),
            fingerprint(&[b, a])
        );
    }

    #[test]
    fn test_fingerprint_changes_with_enchant() {
        let base = CharacterItem {
            slot: "BACK".into(),
            item_id: 1,
            item_level: 480,
            enchant_id: None,
            sockets: json!([]),
        };
        let enchanted = CharacterItem {
            enchant_id: Some(7403),
            ..base.clone()
        };
        assert_ne!(fingerprint(&[base]), fingerprint(&[enchanted]));
    }

    #[test]
    fn test_empty_summary() {
        let processed = process(&summary(r#"{"equipped_items": []}"#));
        assert!(processed.items.is_empty());
        assert_eq!(processed.attrs.item_level, None);
        assert_eq!(processed.attrs.tier_set_id, None);
        assert_eq!(processed.fingerprint, "");
    }
}
