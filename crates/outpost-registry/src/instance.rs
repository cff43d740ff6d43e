//! Host instance — one placement target and the workloads running on it.
//!
//! The engine connection is opened lazily on the first attach or detach
//! and cached until the host is drained. An unreachable host therefore
//! registers fine and fails with a connection error on first use.

use std::sync::Arc;

use indexmap::IndexSet;
use outpost_core::{Locator, WorkloadId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{ConnectionHandle, ContainerEngine};
use crate::error::{DrainFailure, PlacementError, PlacementResult};

/// Lifecycle of a host record.
///
/// `Registered` and `Populated` are derived from the workload set.
/// `Draining` is held while a forced removal detaches workloads, and
/// `Removed` is terminal once a drain has completed and the connection
/// is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Registered,
    Populated,
    Draining,
    Removed,
}

/// Point-in-time view of a host, as returned by registry reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRecord {
    pub locator: Locator,
    pub workloads: Vec<WorkloadId>,
    pub state: HostState,
}

pub struct HostInstance {
    locator: Locator,
    workloads: IndexSet<WorkloadId>,
    connection: Option<ConnectionHandle>,
    engine: Arc<dyn ContainerEngine>,
    draining: bool,
    removed: bool,
}

impl HostInstance {
    /// Create an instance with an empty workload set. No connection is
    /// opened until the first engine operation.
    pub fn create(locator: Locator, engine: Arc<dyn ContainerEngine>) -> Self {
        debug!(%locator, "host instance created");
        Self {
            locator,
            workloads: IndexSet::new(),
            connection: None,
            engine,
            draining: false,
            removed: false,
        }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn workloads(&self) -> impl Iterator<Item = &WorkloadId> {
        self.workloads.iter()
    }

    pub fn contains(&self, workload: &WorkloadId) -> bool {
        self.workloads.contains(workload)
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn state(&self) -> HostState {
        if self.removed {
            HostState::Removed
        } else if self.draining {
            HostState::Draining
        } else if self.workloads.is_empty() {
            HostState::Registered
        } else {
            HostState::Populated
        }
    }

    pub fn record(&self) -> HostRecord {
        HostRecord {
            locator: self.locator.clone(),
            workloads: self.workloads.iter().cloned().collect(),
            state: self.state(),
        }
    }

    async fn connection(&mut self) -> PlacementResult<&ConnectionHandle> {
        let handle = match self.connection.take() {
            Some(handle) => handle,
            None => {
                let handle = self.engine.open_connection(&self.locator).await?;
                debug!(locator = %self.locator, conn = handle.id(), "engine connection opened");
                handle
            }
        };
        Ok(self.connection.insert(handle))
    }

    /// Start `workload` on this host and record it.
    ///
    /// On engine failure the workload set is left unchanged.
    pub async fn attach(&mut self, workload: &WorkloadId) -> PlacementResult<()> {
        if self.workloads.contains(workload) {
            return Err(PlacementError::AlreadyAssigned {
                host: self.locator.to_string(),
                workload: workload.to_string(),
            });
        }
        let engine = Arc::clone(&self.engine);
        let conn = self.connection().await?;
        engine.attach(conn, workload).await?;
        self.workloads.insert(workload.clone());
        info!(host = %self.locator, %workload, "workload attached");
        Ok(())
    }

    /// Stop `workload` on this host and forget it.
    ///
    /// On engine failure the workload stays recorded: a process that may
    /// still be running is never dropped from the books.
    pub async fn detach(&mut self, workload: &WorkloadId) -> PlacementResult<()> {
        if !self.workloads.contains(workload) {
            return Err(PlacementError::NotAssigned {
                host: self.locator.to_string(),
                workload: workload.to_string(),
            });
        }
        let engine = Arc::clone(&self.engine);
        let conn = self.connection().await?;
        engine.detach(conn, workload).await?;
        self.workloads.shift_remove(workload);
        info!(host = %self.locator, %workload, "workload detached");
        Ok(())
    }

    /// Empty the host and close its connection.
    ///
    /// Without `force` a non-empty host is refused with `NotEmpty`. With
    /// `force` every workload is detached; individual failures do not stop
    /// the loop but are returned together as `Drain`, and the connection
    /// stays open for a retry.
    pub async fn drain(&mut self, force: bool) -> PlacementResult<()> {
        if !self.workloads.is_empty() {
            if !force {
                return Err(PlacementError::NotEmpty {
                    host: self.locator.to_string(),
                    count: self.workloads.len(),
                });
            }

            self.draining = true;
            let pending: Vec<WorkloadId> = self.workloads.iter().cloned().collect();
            let mut failures = Vec::new();
            for workload in pending {
                if let Err(e) = self.detach(&workload).await {
                    warn!(host = %self.locator, %workload, error = %e, "detach failed during drain");
                    failures.push(DrainFailure {
                        workload,
                        reason: e.to_string(),
                    });
                }
            }
            self.draining = false;

            if !failures.is_empty() {
                return Err(PlacementError::Drain {
                    host: self.locator.to_string(),
                    failures,
                });
            }
        }

        self.close().await;
        self.removed = true;
        Ok(())
    }

    /// Close the engine connection, if one is open. Idempotent.
    pub async fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            debug!(locator = %self.locator, conn = conn.id(), "closing engine connection");
            self.engine.close_connection(conn).await;
        }
    }

    /// Bring a drained-but-kept record back into service.
    pub(crate) fn reopen(&mut self) {
        self.removed = false;
    }

    /// Record `workload` without an engine call. Used when a persisted
    /// placement could not be re-attached: the process may still run
    /// there, and a later detach stops it.
    pub(crate) fn record_unattached(&mut self, workload: WorkloadId) {
        warn!(host = %self.locator, %workload, "workload recorded without attach");
        self.workloads.insert(workload);
    }
}

impl std::fmt::Debug for HostInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostInstance")
            .field("locator", &self.locator)
            .field("workloads", &self.workloads)
            .field("connected", &self.connection.is_some())
            .field("state", &self.state())
            .finish()
    }
}
