//! Durable campaign checkpoints.
//!
//! ```text
//! Dispatcher ──upsert──▶ CheckpointStore ──get/set──▶ PersistenceStore (file / memory)
//! ```

pub mod persistence;
pub mod store;

pub use persistence::{FileStore, MemoryStore, PersistenceStore};
pub use store::{CheckpointStore, HISTORY_KEY, MAX_SNAPSHOTS};
