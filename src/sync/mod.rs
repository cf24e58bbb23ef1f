//! The sync pipeline: leaderboard discovery, per-character reconciliation,
//! and meta aggregation, tied together by the cycle orchestrator.

pub mod aggregation;
pub mod batch;
pub mod brackets;
pub mod character;
pub mod equipment;
pub mod leaderboard;
pub mod orchestrator;
pub mod outcome;
pub mod scheduler;
pub mod talents;

pub use scheduler::Scheduler;
