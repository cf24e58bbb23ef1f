//! Bracket discovery policy: which leaderboard names we sync and with what
//! cutoffs.

use crate::blizzard::Region;

/// Hard cap on rows taken from a single leaderboard page.
pub const DEFAULT_TOP_N: usize = 500;

/// Sync policy for one bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BracketPolicy {
    /// Keep at most this many entries from the top of the page.
    pub top_n: usize,
    /// Safety floor below which entries are dropped even inside top N.
    pub rating_min: i32,
}

/// Map a bracket name from the leaderboard index to its sync policy.
/// Returns None for brackets we deliberately skip (rated battlegrounds and
/// battleground blitz: large-team modes whose gear data adds noise, not
/// signal, to the arena meta).
pub fn policy_for(bracket: &str) -> Option<BracketPolicy> {
    if bracket.starts_with("rbg") || bracket.starts_with("blitz") {
        return None;
    }

    let policy = match bracket {
        "2v2" => BracketPolicy {
            top_n: DEFAULT_TOP_N,
            rating_min: 1800,
        },
        "3v3" => BracketPolicy {
            top_n: DEFAULT_TOP_N,
            rating_min: 2000,
        },
        // Solo shuffle boards are per-spec ("shuffle-{class}-{spec}").
        _ if bracket.starts_with("shuffle-") => BracketPolicy {
            top_n: DEFAULT_TOP_N,
            rating_min: 2200,
        },
        // Unknown future formats get the conservative default rather than
        // being silently dropped.
        _ => BracketPolicy {
            top_n: DEFAULT_TOP_N,
            rating_min: 1800,
        },
    };
    Some(policy)
}

/// Queue that character batches for a region are routed to. Separate per
/// region so one region's backlog can't starve the other.
pub fn character_queue(region: Region) -> &'static str {
    match region {
        Region::Us => "character_sync_us",
        Region::Eu => "character_sync_eu",
    }
}

/// Queue for non-regional work (aggregation).
pub const DEFAULT_QUEUE: &str = "default";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_bracket_policies() {
        assert_eq!(policy_for("2v2").unwrap().rating_min, 1800);
        assert_eq!(policy_for("3v3").unwrap().rating_min, 2000);
        assert_eq!(
            policy_for("shuffle-shaman-enhancement").unwrap().rating_min,
            2200
        );
    }

    #[test]
    fn test_large_team_modes_excluded() {
        assert!(policy_for("rbg").is_none());
        assert!(policy_for("blitz").is_none());
        assert!(policy_for("blitz-3s").is_none());
    }

    #[test]
    fn test_unknown_bracket_gets_default_policy() {
        let policy = policy_for("5v5").unwrap();
        assert_eq!(policy.top_n, DEFAULT_TOP_N);
        assert_eq!(policy.rating_min, 1800);
    }

    #[test]
    fn test_region_queues_are_distinct() {
        assert_ne!(character_queue(Region::Us), character_queue(Region::Eu));
    }
}
