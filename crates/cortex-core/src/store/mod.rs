//! Store Module
//!
//! SQLite-based durable persistence for memories, facts, embeddings, access
//! events, alerts, projects, and fact edges. Single writer / multi reader
//! under WAL (§4.1).

mod migrations;
mod options;
mod sqlite;

pub use migrations::{Migration, MIGRATIONS};
pub use options::{ListOpts, SortBy};
pub use sqlite::{
    AttributeConflictPair, FreshnessDistribution, Store, StoreError, StoreResult, StoreStats,
};
