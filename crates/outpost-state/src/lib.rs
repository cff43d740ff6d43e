//! outpost-state — durable placement document for Outpost.
//!
//! The registry's only persisted state is an ordered mapping from placement
//! host locator to the ordered list of workload ids assigned to it. This
//! crate owns that document's serialized shape, the one-time migration of
//! older list-shaped files, and the store backends.
//!
//! # Architecture
//!
//! ```text
//! ConfigStore (trait: load / save)
//!   ├── JsonFileStore   (single file, temp + rename)
//!   ├── RedbStore       (one JSON value in a redb table)
//!   └── MemoryStore     (tests)
//! ```

pub mod document;
pub mod error;
pub mod store;
pub mod tables;

pub use document::{DocumentShape, RawState};
pub use error::{StateError, StateResult};
pub use store::{ConfigStore, JsonFileStore, MemoryStore, RedbStore};
