//! outpost-core — shared types for the Outpost placement daemon.
//!
//! Validated identifiers ([`Locator`], [`WorkloadId`]), the [`Target`] enum
//! distinguishing the implicit local host from remote placement targets,
//! and the `outpost.toml` config parser.

pub mod config;
pub mod validate;

pub use config::{OutpostConfig, StorageBackend};
pub use validate::*;
