//! Response types for the Blizzard Game Data and Profile APIs.
//!
//! Only the fields the sync pipeline consumes are modeled; everything else
//! in the payloads is ignored by serde.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct IdRef {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdName {
    pub id: i64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeRef {
    #[serde(rename = "type")]
    pub kind: String,
}

// --- /pvp-season/{season}/pvp-leaderboard/index ---

#[derive(Debug, Deserialize)]
pub struct LeaderboardIndex {
    #[serde(default)]
    pub leaderboards: Vec<BracketRef>,
}

#[derive(Debug, Deserialize)]
pub struct BracketRef {
    pub name: String,
}

// --- /pvp-season/{season}/pvp-leaderboard/{bracket} ---

#[derive(Debug, Deserialize)]
pub struct Leaderboard {
    #[serde(default)]
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardEntry {
    pub character: LeaderboardCharacter,
    pub faction: Option<TypeRef>,
    pub rank: i32,
    pub rating: i32,
    pub season_match_statistics: MatchStatistics,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardCharacter {
    pub id: i64,
    pub name: String,
    pub realm: RealmRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealmRef {
    pub slug: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchStatistics {
    pub won: i32,
    pub lost: i32,
}

// --- /profile/wow/character/{realm}/{name}/equipment ---

#[derive(Debug, Deserialize)]
pub struct EquipmentSummary {
    #[serde(default)]
    pub equipped_items: Vec<EquippedItem>,
}

#[derive(Debug, Deserialize)]
pub struct EquippedItem {
    pub item: IdRef,
    pub slot: Slot,
    pub level: Option<Value>,
    #[serde(default)]
    pub enchantments: Vec<Enchantment>,
    #[serde(default)]
    pub sockets: Vec<Socket>,
    pub set: Option<ItemSet>,
}

#[derive(Debug, Deserialize)]
pub struct Slot {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct Value {
    pub value: i32,
}

#[derive(Debug, Deserialize)]
pub struct Enchantment {
    pub enchantment_id: i64,
    pub enchantment_slot: Option<TypeRef>,
}

#[derive(Debug, Deserialize)]
pub struct Socket {
    pub item: Option<IdRef>,
}

#[derive(Debug, Deserialize)]
pub struct ItemSet {
    pub item_set: IdName,
    #[serde(default)]
    pub items: Vec<ItemSetSlot>,
}

#[derive(Debug, Deserialize)]
pub struct ItemSetSlot {
    #[serde(default)]
    pub is_equipped: bool,
}

// --- /profile/wow/character/{realm}/{name}/specializations ---

#[derive(Debug, Deserialize)]
pub struct SpecializationSummary {
    #[serde(default)]
    pub specializations: Vec<SpecializationEntry>,
    pub active_specialization: Option<IdName>,
}

#[derive(Debug, Deserialize)]
pub struct SpecializationEntry {
    pub specialization: IdName,
    #[serde(default)]
    pub loadouts: Vec<Loadout>,
}

#[derive(Debug, Deserialize)]
pub struct Loadout {
    #[serde(default)]
    pub is_active: bool,
    pub talent_loadout_code: Option<String>,
    #[serde(default)]
    pub selected_class_talents: Vec<SelectedTalent>,
    #[serde(default)]
    pub selected_spec_talents: Vec<SelectedTalent>,
    #[serde(default)]
    pub selected_hero_talents: Vec<SelectedTalent>,
    pub selected_hero_talent_tree: Option<IdName>,
}

#[derive(Debug, Deserialize)]
pub struct SelectedTalent {
    pub id: i64,
    pub rank: i32,
}

impl SpecializationSummary {
    /// The loadout for the character's active specialization, when present.
    pub fn active_loadout(&self) -> Option<(&SpecializationEntry, &Loadout)> {
        let active_id = self.active_specialization.as_ref()?.id;
        let entry = self
            .specializations
            .iter()
            .find(|s| s.specialization.id == active_id)?;
        let loadout = entry.loadouts.iter().find(|l| l.is_active)?;
        Some((entry, loadout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaderboard_decodes_real_shape() {
        let body = r#"{
            "season": { "id": 38 },
            "name": "3v3",
            "entries": [
                {
                    "character": { "id": 123, "name": "Thrall", "realm": { "slug": "tichondrius" } },
                    "faction": { "type": "HORDE" },
                    "rank": 1,
                    "rating": 2400,
                    "season_match_statistics": { "played": 100, "won": 70, "lost": 30 }
                }
            ]
        }"#;
        let board: Leaderboard = crate::blizzard::json::decode(body).unwrap();
        assert_eq!(board.entries.len(), 1);
        let entry = &board.entries[0];
        assert_eq!(entry.character.realm.slug, "tichondrius");
        assert_eq!(entry.rating, 2400);
        assert_eq!(entry.season_match_statistics.won, 70);
    }

    #[test]
    fn test_leaderboard_tolerates_missing_entries() {
        let board: Leaderboard = crate::blizzard::json::decode(r#"{"name": "2v2"}"#).unwrap();
        assert!(board.entries.is_empty());
    }

    #[test]
    fn test_active_loadout_selection() {
        let body = r#"{
            "active_specialization": { "id": 263, "name": "Enhancement" },
            "specializations": [
                {
                    "specialization": { "id": 262, "name": "Elemental" },
                    "loadouts": [ { "is_active": true, "talent_loadout_code": "ELEM" } ]
                },
                {
                    "specialization": { "id": 263, "name": "Enhancement" },
                    "loadouts": [
                        { "is_active": false, "talent_loadout_code": "OLD" },
                        { "is_active": true, "talent_loadout_code": "ENH" }
                    ]
                }
            ]
        }"#;
        let summary: SpecializationSummary = crate::blizzard::json::decode(body).unwrap();
        let (entry, loadout) = summary.active_loadout().unwrap();
        assert_eq!(entry.specialization.id, 263);
        assert_eq!(loadout.talent_loadout_code.as_deref(), Some("ENH"));
    }

    #[test]
    fn test_active_loadout_absent_when_private() {
        let summary: SpecializationSummary =
            crate::blizzard::json::decode(r#"{"specializations": []}"#).unwrap();
        assert!(summary.active_loadout().is_none());
    }
}
