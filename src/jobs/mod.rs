//! Job payloads and worker processes for the database-backed queue.

pub mod worker;

pub use worker::Worker;

use crate::blizzard::Region;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything a job row's payload can describe. Stored as JSON with a
/// `kind` discriminator so old rows survive process restarts and deploys.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Sync one slice of a cycle's discovered characters.
    CharacterBatch {
        cycle_id: i64,
        region: Region,
        character_ids: Vec<i64>,
    },
    /// Rebuild the meta tables for a season.
    Aggregation { season_id: i64 },
}

impl JobKind {
    pub fn from_payload(payload: &Value) -> Result<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| anyhow::anyhow!("unparseable job payload: {e}"))
    }

    pub fn payload(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| anyhow::anyhow!("unserializable job: {e}"))
    }
}

/// Failure classification for job processing.
#[derive(Debug)]
pub enum JobError {
    /// Transient; the job goes back on the queue with backoff.
    Recoverable(anyhow::Error),
    /// The job itself is bad (corrupt payload); retrying cannot help.
    Unrecoverable(anyhow::Error),
}

/// Retry delay in seconds: polynomial growth keeps the first retry quick
/// (3s) while the fifth waits over twenty minutes.
pub fn backoff_secs(retry_count: i32) -> u64 {
    let attempt = u64::try_from(retry_count).unwrap_or(0) + 1;
    attempt.pow(4) + 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_round_trip() {
        let kind = JobKind::CharacterBatch {
            cycle_id: 9,
            region: Region::Eu,
            character_ids: vec![1, 2, 3],
        };
        let payload = kind.payload().unwrap();
        assert_eq!(payload["kind"], "character_batch");
        assert_eq!(payload["region"], "eu");

        match JobKind::from_payload(&payload).unwrap() {
            JobKind::CharacterBatch {
                cycle_id,
                region,
                character_ids,
            } => {
                assert_eq!(cycle_id, 9);
                assert_eq!(region, Region::Eu);
                assert_eq!(character_ids, vec![1, 2, 3]);
            }
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        assert!(JobKind::from_payload(&json!({ "kind": "defragment" })).is_err());
    }

    #[test]
    fn test_backoff_growth() {
        assert_eq!(backoff_secs(0), 3);
        assert_eq!(backoff_secs(1), 18);
        assert_eq!(backoff_secs(2), 83);
        assert_eq!(backoff_secs(4), 627);
    }
}
