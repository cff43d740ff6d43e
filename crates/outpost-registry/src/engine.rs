//! Container engine capability.
//!
//! The registry never talks to a container runtime directly. Every remote
//! side effect goes through a [`ContainerEngine`], injected at construction
//! so tests can observe and fail individual calls.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use outpost_core::{Locator, WorkloadId};
use thiserror::Error;
use tracing::info;

/// Boxed future alias for engine operations.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// Failures reported by a container engine client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("cannot reach engine at {locator}: {reason}")]
    Connection { locator: String, reason: String },

    #[error("{operation} of {workload} failed: {reason}")]
    Operation {
        operation: &'static str,
        workload: String,
        reason: String,
    },
}

/// An open connection to one host's engine endpoint.
///
/// Deliberately not `Clone`: each host instance owns its handle exclusively
/// and hands it back through [`ContainerEngine::close_connection`].
#[derive(Debug, PartialEq, Eq)]
pub struct ConnectionHandle {
    id: u64,
    locator: Locator,
}

impl ConnectionHandle {
    pub fn new(id: u64, locator: Locator) -> Self {
        Self { id, locator }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }
}

/// Client for the container engine running on placement hosts.
///
/// Retry policy, if any, belongs to the implementation; the registry
/// surfaces every error unchanged.
pub trait ContainerEngine: Send + Sync {
    /// Open a connection to the engine endpoint at `locator`.
    fn open_connection<'a>(&'a self, locator: &'a Locator) -> EngineFuture<'a, ConnectionHandle>;

    /// Start (or relocate) `workload` on the connected host.
    fn attach<'a>(
        &'a self,
        conn: &'a ConnectionHandle,
        workload: &'a WorkloadId,
    ) -> EngineFuture<'a, ()>;

    /// Stop and remove `workload`'s process on the connected host.
    fn detach<'a>(
        &'a self,
        conn: &'a ConnectionHandle,
        workload: &'a WorkloadId,
    ) -> EngineFuture<'a, ()>;

    /// Release a connection. Never fails.
    fn close_connection(&self, conn: ConnectionHandle) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

// ── Dry run ────────────────────────────────────────────────────────

/// Engine that performs no remote calls and only logs what it would do.
#[derive(Debug, Default)]
pub struct DryRunEngine {
    next_id: AtomicU64,
}

impl DryRunEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContainerEngine for DryRunEngine {
    fn open_connection<'a>(&'a self, locator: &'a Locator) -> EngineFuture<'a, ConnectionHandle> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            info!(%locator, conn = id, "dry-run: open connection");
            Ok(ConnectionHandle::new(id, locator.clone()))
        })
    }

    fn attach<'a>(
        &'a self,
        conn: &'a ConnectionHandle,
        workload: &'a WorkloadId,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            info!(host = %conn.locator(), %workload, "dry-run: attach");
            Ok(())
        })
    }

    fn detach<'a>(
        &'a self,
        conn: &'a ConnectionHandle,
        workload: &'a WorkloadId,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            info!(host = %conn.locator(), %workload, "dry-run: detach");
            Ok(())
        })
    }

    fn close_connection(&self, conn: ConnectionHandle) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            info!(host = %conn.locator(), conn = conn.id(), "dry-run: close connection");
        })
    }
}

// ── Recording ──────────────────────────────────────────────────────

/// One observed engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Open(String),
    Attach { host: String, workload: String },
    Detach { host: String, workload: String },
    Close(String),
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<EngineCall>,
    running: Vec<(String, String)>,
    unreachable: HashSet<String>,
    failing_attach: HashSet<(String, String)>,
    failing_detach: HashSet<(String, String)>,
}

/// In-process engine that records every call and can be told to fail
/// (for testing).
#[derive(Debug, Default)]
pub struct RecordingEngine {
    next_id: AtomicU64,
    state: Mutex<Recorded>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut Recorded) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    /// Every call observed so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.with_state(|s| s.calls.clone())
    }

    /// Forget recorded calls (running workloads are kept).
    pub fn clear_calls(&self) {
        self.with_state(|s| s.calls.clear());
    }

    /// `(host, workload)` pairs currently running according to the engine.
    pub fn running(&self) -> Vec<(String, String)> {
        self.with_state(|s| s.running.clone())
    }

    /// Make `open_connection` to `locator` fail.
    pub fn set_unreachable(&self, locator: &str, unreachable: bool) {
        self.with_state(|s| {
            if unreachable {
                s.unreachable.insert(locator.to_string());
            } else {
                s.unreachable.remove(locator);
            }
        });
    }

    /// Make `attach` of `workload` on `host` fail.
    pub fn fail_attach(&self, host: &str, workload: &str, fail: bool) {
        self.with_state(|s| toggle(&mut s.failing_attach, host, workload, fail));
    }

    /// Make `detach` of `workload` on `host` fail.
    pub fn fail_detach(&self, host: &str, workload: &str, fail: bool) {
        self.with_state(|s| toggle(&mut s.failing_detach, host, workload, fail));
    }
}

fn toggle(set: &mut HashSet<(String, String)>, host: &str, workload: &str, on: bool) {
    let key = (host.to_string(), workload.to_string());
    if on {
        set.insert(key);
    } else {
        set.remove(&key);
    }
}

impl ContainerEngine for RecordingEngine {
    fn open_connection<'a>(&'a self, locator: &'a Locator) -> EngineFuture<'a, ConnectionHandle> {
        Box::pin(async move {
            let host = locator.to_string();
            self.with_state(|s| {
                s.calls.push(EngineCall::Open(host.clone()));
                if s.unreachable.contains(&host) {
                    return Err(EngineError::Connection {
                        locator: host.clone(),
                        reason: "connection refused".to_string(),
                    });
                }
                Ok(())
            })?;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            Ok(ConnectionHandle::new(id, locator.clone()))
        })
    }

    fn attach<'a>(
        &'a self,
        conn: &'a ConnectionHandle,
        workload: &'a WorkloadId,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let key = (conn.locator().to_string(), workload.to_string());
            self.with_state(|s| {
                s.calls.push(EngineCall::Attach {
                    host: key.0.clone(),
                    workload: key.1.clone(),
                });
                if s.failing_attach.contains(&key) {
                    return Err(EngineError::Operation {
                        operation: "attach",
                        workload: key.1.clone(),
                        reason: "injected failure".to_string(),
                    });
                }
                s.running.push(key.clone());
                Ok(())
            })
        })
    }

    fn detach<'a>(
        &'a self,
        conn: &'a ConnectionHandle,
        workload: &'a WorkloadId,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let key = (conn.locator().to_string(), workload.to_string());
            self.with_state(|s| {
                s.calls.push(EngineCall::Detach {
                    host: key.0.clone(),
                    workload: key.1.clone(),
                });
                if s.failing_detach.contains(&key) {
                    return Err(EngineError::Operation {
                        operation: "detach",
                        workload: key.1.clone(),
                        reason: "injected failure".to_string(),
                    });
                }
                s.running.retain(|r| r != &key);
                Ok(())
            })
        })
    }

    fn close_connection(&self, conn: ConnectionHandle) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.with_state(|s| s.calls.push(EngineCall::Close(conn.locator().to_string())));
        })
    }
}
