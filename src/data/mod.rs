//! Database access, one module per table family.

pub mod characters;
pub mod cycles;
pub mod entries;
pub mod items;
pub mod jobs;
pub mod leaderboards;
pub mod meta;
pub mod models;
pub mod seasons;
pub mod talents;
