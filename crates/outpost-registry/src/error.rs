//! Registry error types.

use outpost_core::{ValidationError, WorkloadId};
use outpost_state::StateError;
use thiserror::Error;

use crate::engine::EngineError;

/// A workload that could not be detached while draining a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainFailure {
    pub workload: WorkloadId,
    pub reason: String,
}

/// Errors returned by host instances and the placement registry.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("host already registered: {0}")]
    DuplicateHost(String),

    #[error("workload {workload} is already assigned to {host}")]
    AlreadyAssigned { host: String, workload: String },

    #[error("workload {workload} is not assigned to {host}")]
    NotAssigned { host: String, workload: String },

    #[error("host {host} still has {count} workload(s)")]
    NotEmpty { host: String, count: usize },

    #[error("connection error: {0}")]
    Connection(EngineError),

    #[error("engine error: {0}")]
    Engine(EngineError),

    #[error("draining {host} failed for {} workload(s)", failures.len())]
    Drain {
        host: String,
        failures: Vec<DrainFailure>,
    },

    #[error("state store error: {0}")]
    Storage(#[from] StateError),

    /// An operation failed part-way and the state it left behind could
    /// not be written either.
    #[error("{cause}; placement document not updated: {storage}")]
    Unrecorded {
        cause: Box<PlacementError>,
        storage: StateError,
    },
}

impl From<EngineError> for PlacementError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Connection { .. } => PlacementError::Connection(err),
            EngineError::Operation { .. } => PlacementError::Engine(err),
        }
    }
}

pub type PlacementResult<T> = Result<T, PlacementError>;
