//! Specialization processing: derive spec/hero-tree attributes and
//! `character_talents` rows from a specialization summary payload.

use crate::blizzard::types::SpecializationSummary;
use crate::data::models::SpecializationAttrs;
use crate::data::talents::{CharacterTalent, talent_kind};

#[derive(Debug)]
pub struct ProcessedSpecialization {
    pub attrs: SpecializationAttrs,
    pub talents: Vec<CharacterTalent>,
    /// Active loadout export code, stored on the character for build
    /// aggregation.
    pub loadout_code: Option<String>,
}

pub fn process(summary: &SpecializationSummary) -> ProcessedSpecialization {
    let Some((entry, loadout)) = summary.active_loadout() else {
        // Private or empty profile: no active spec means nothing to derive.
        return ProcessedSpecialization {
            attrs: SpecializationAttrs {
                spec_id: summary.active_specialization.as_ref().map(|s| s.id),
                hero_tree_id: None,
                hero_tree_name: None,
            },
            talents: Vec::new(),
            loadout_code: None,
        };
    };

    let mut talents = Vec::new();
    for selected in &loadout.selected_class_talents {
        talents.push(CharacterTalent {
            talent_id: selected.id,
            kind: talent_kind::CLASS,
            rank: selected.rank,
        });
    }
    for selected in &loadout.selected_spec_talents {
        talents.push(CharacterTalent {
            talent_id: selected.id,
            kind: talent_kind::SPEC,
            rank: selected.rank,
        });
    }
    for selected in &loadout.selected_hero_talents {
        talents.push(CharacterTalent {
            talent_id: selected.id,
            kind: talent_kind::HERO,
            rank: selected.rank,
        });
    }

    let hero_tree = loadout.selected_hero_talent_tree.as_ref();

    ProcessedSpecialization {
        attrs: SpecializationAttrs {
            spec_id: Some(entry.specialization.id),
            hero_tree_id: hero_tree.map(|t| t.id),
            hero_tree_name: hero_tree.and_then(|t| t.name.clone()),
        },
        talents,
        loadout_code: loadout.talent_loadout_code.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blizzard::json::decode;

    #[test]
    fn test_process_active_loadout() {
        let summary: SpecializationSummary = decode(
            r#"{
                "active_specialization": { "id": 263, "name": "Enhancement" },
                "specializations": [
                    {
                        "specialization": { "id": 263, "name": "Enhancement" },
                        "loadouts": [
                            {
                                "is_active": true,
                                "talent_loadout_code": "BcQAzxyz",
                                "selected_class_talents": [ { "id": 103582, "rank": 1 } ],
                                "selected_spec_talents": [
                                    { "id": 103588, "rank": 1 },
                                    { "id": 103590, "rank": 2 }
                                ],
                                "selected_hero_talents": [ { "id": 117501, "rank": 1 } ],
                                "selected_hero_talent_tree": { "id": 44, "name": "Stormbringer" }
                            }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();

        let processed = process(&summary);
        assert_eq!(processed.attrs.spec_id, Some(263));
        assert_eq!(processed.attrs.hero_tree_id, Some(44));
        assert_eq!(processed.attrs.hero_tree_name.as_deref(), Some("Stormbringer"));
        assert_eq!(processed.loadout_code.as_deref(), Some("BcQAzxyz"));
        assert_eq!(processed.talents.len(), 4);

        let kinds: Vec<&str> = processed.talents.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, ["class", "spec", "spec", "hero"]);
        assert_eq!(processed.talents[2].rank, 2);
    }

    #[test]
    fn test_process_without_active_loadout() {
        let summary: SpecializationSummary = decode(
            r#"{
                "active_specialization": { "id": 70, "name": "Retribution" },
                "specializations": [
                    {
                        "specialization": { "id": 70, "name": "Retribution" },
                        "loadouts": []
                    }
                ]
            }"#,
        )
        .unwrap();

        let processed = process(&summary);
        // Spec id still comes through; everything loadout-shaped is empty.
        assert_eq!(processed.attrs.spec_id, Some(70));
        assert_eq!(processed.attrs.hero_tree_id, None);
        assert!(processed.talents.is_empty());
        assert!(processed.loadout_code.is_none());
    }

    #[test]
    fn test_process_empty_summary() {
        let summary: SpecializationSummary = decode(r#"{"specializations": []}"#).unwrap();
        let processed = process(&summary);
        assert_eq!(processed.attrs.spec_id, None);
        assert!(processed.talents.is_empty());
    }
}
