//! Command history persistence.
//!
//! SQLite wrapper owning the `commands` table, its FTS5 shadow index and the
//! embedding-cache snapshot table.

mod status;
mod store;

pub use status::EmbeddingStatus;
pub use store::{
    hash_command, CacheSnapshotEntry, CommandRecord, CommandStore, SaveOutcome, ScoredCommand,
    StoreStats,
};
