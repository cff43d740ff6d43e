//! outpost-registry — placement of workloads on remote hosts.
//!
//! Tracks a set of placement hosts and which workloads run on each,
//! enforcing that a workload is attached to at most one host at a time.
//! A workload attached nowhere runs on the implicit local host.
//!
//! # Architecture
//!
//! ```text
//! PlacementRegistry
//!   ├── ConfigStore (write-through placement document)
//!   ├── ArcSwap<Snapshot> (lock-free reads)
//!   └── Mutex<IndexMap<Locator, HostInstance>>
//!       └── HostInstance
//!           ├── ordered workload set
//!           └── lazily opened ConnectionHandle ──► ContainerEngine
//! ```
//!
//! Callers that start a mutation must let it finish: once an engine call
//! or a store write has begun, dropping the future can leave the engine
//! and the document disagreeing. Run mutations on their own task (see the
//! REST layer) rather than racing them against client disconnects.

pub mod catalog;
pub mod engine;
pub mod error;
pub mod instance;
pub mod registry;
pub mod restore;

pub use catalog::{CatalogError, StaticCatalog, WorkloadCatalog, WorkloadDescriptor};
pub use engine::{
    ConnectionHandle, ContainerEngine, DryRunEngine, EngineCall, EngineError, EngineFuture,
    RecordingEngine,
};
pub use error::{DrainFailure, PlacementError, PlacementResult};
pub use instance::{HostInstance, HostRecord, HostState};
pub use registry::PlacementRegistry;
pub use restore::{LoadIssue, LoadReport, VettedDocument, VettedHost, vet_document};
