//! Placement registry — which workload runs on which host.
//!
//! The registry owns every [`HostInstance`] and the [`ConfigStore`] the
//! placement document lives in. It guarantees that a workload is attached
//! to at most one host; a workload attached nowhere runs on the implicit
//! local host.
//!
//! Mutations (`add_host`, `remove_host`, `assign`) are serialized on one
//! async mutex and write the whole document through to the store before
//! returning. Reads (`list`, `lookup`, `placement_of`) never take that
//! lock: they load an immutable snapshot republished after each mutation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use outpost_core::{LOCAL_ALIAS, Locator, Target, ValidationError, WorkloadId, validate_locator};
use outpost_state::{ConfigStore, RawState, StateResult};

use crate::catalog::WorkloadCatalog;
use crate::engine::ContainerEngine;
use crate::error::{PlacementError, PlacementResult};
use crate::instance::{HostInstance, HostRecord};
use crate::restore::{LoadIssue, LoadReport, VettedHost, vet_document};

type Hosts = IndexMap<Locator, HostInstance>;

/// Immutable read view, swapped atomically after every mutation.
#[derive(Debug, Default)]
struct Snapshot {
    hosts: Vec<HostRecord>,
}

impl Snapshot {
    fn capture(hosts: &Hosts) -> Self {
        Self {
            hosts: hosts.values().map(HostInstance::record).collect(),
        }
    }
}

struct RegistryInner {
    hosts: Mutex<Hosts>,
    snapshot: ArcSwap<Snapshot>,
    store: Arc<dyn ConfigStore>,
    engine: Arc<dyn ContainerEngine>,
    needs_reconcile: AtomicBool,
}

/// The authoritative host/workload mapping. Cheap to clone; clones share
/// state.
#[derive(Clone)]
pub struct PlacementRegistry {
    inner: Arc<RegistryInner>,
}

impl PlacementRegistry {
    /// Create an empty registry without reading the store.
    pub fn new(store: Arc<dyn ConfigStore>, engine: Arc<dyn ContainerEngine>) -> Self {
        Self::from_hosts(store, engine, Hosts::new())
    }

    fn from_hosts(
        store: Arc<dyn ConfigStore>,
        engine: Arc<dyn ContainerEngine>,
        hosts: Hosts,
    ) -> Self {
        let snapshot = Snapshot::capture(&hosts);
        Self {
            inner: Arc::new(RegistryInner {
                hosts: Mutex::new(hosts),
                snapshot: ArcSwap::from_pointee(snapshot),
                store,
                engine,
                needs_reconcile: AtomicBool::new(false),
            }),
        }
    }

    /// Restore the registry from its store.
    ///
    /// The document is vetted first (see [`vet_document`]): entries that
    /// fail validation, are unknown to `catalog` or are claimed by an
    /// earlier host are dropped and listed in `report.skipped`. Surviving
    /// workloads are re-attached through the engine in document order
    /// before this returns. A workload the engine cannot re-attach stays
    /// recorded on its host, since it may still be running there, and is
    /// listed in `report.unattached`. The document is rewritten only when
    /// entries were dropped.
    pub async fn load(
        store: Arc<dyn ConfigStore>,
        engine: Arc<dyn ContainerEngine>,
        catalog: &dyn WorkloadCatalog,
    ) -> PlacementResult<(Self, LoadReport)> {
        let raw = store.load()?;
        let vetted = vet_document(&raw, catalog);
        let mut report = LoadReport {
            skipped: vetted.skipped,
            ..LoadReport::default()
        };
        for issue in &report.skipped {
            warn!(%issue, "persisted placement dropped");
        }

        let mut hosts = Hosts::new();
        for VettedHost { locator, workloads } in vetted.hosts {
            let mut instance = HostInstance::create(locator.clone(), Arc::clone(&engine));
            for workload in workloads {
                match instance.attach(&workload).await {
                    Ok(()) => report.restored += 1,
                    Err(e) => {
                        let issue = LoadIssue::new(locator.as_str(), Some(workload.as_str()), &e);
                        warn!(%issue, "persisted placement kept without re-attach");
                        report.unattached.push(issue);
                        instance.record_unattached(workload);
                    }
                }
            }
            hosts.insert(locator, instance);
        }
        report.hosts = hosts.len();

        let registry = Self::from_hosts(store, engine, hosts);
        if !report.skipped.is_empty() {
            let hosts = registry.inner.hosts.lock().await;
            registry.persist(&hosts)?;
        }
        info!(
            hosts = report.hosts,
            restored = report.restored,
            skipped = report.skipped.len(),
            unattached = report.unattached.len(),
            "placement registry loaded"
        );
        Ok((registry, report))
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// All hosts in registration order.
    pub fn list(&self) -> Vec<HostRecord> {
        self.inner.snapshot.load().hosts.clone()
    }

    /// Look up one host. The implicit local host has no record and yields
    /// `Ok(None)`.
    pub fn lookup(&self, target: &Target) -> PlacementResult<Option<HostRecord>> {
        let Target::Remote(locator) = target else {
            return Ok(None);
        };
        self.inner
            .snapshot
            .load()
            .hosts
            .iter()
            .find(|h| &h.locator == locator)
            .cloned()
            .map(Some)
            .ok_or_else(|| PlacementError::HostNotFound(locator.to_string()))
    }

    /// Where `workload` currently runs.
    pub fn placement_of(&self, workload: &WorkloadId) -> Target {
        self.inner
            .snapshot
            .load()
            .hosts
            .iter()
            .find(|h| h.workloads.contains(workload))
            .map(|h| Target::Remote(h.locator.clone()))
            .unwrap_or(Target::Local)
    }

    /// True when the last write to the store failed and the durable
    /// document may disagree with the engine.
    pub fn needs_reconcile(&self) -> bool {
        self.inner.needs_reconcile.load(Ordering::SeqCst)
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Register a new, empty placement host.
    pub async fn add_host(&self, candidate: &str) -> PlacementResult<HostRecord> {
        let locator = host_locator(candidate)?;
        let mut hosts = self.inner.hosts.lock().await;
        if hosts.contains_key(&locator) {
            return Err(PlacementError::DuplicateHost(locator.to_string()));
        }

        let instance = HostInstance::create(locator.clone(), Arc::clone(&self.inner.engine));
        let record = instance.record();
        hosts.insert(locator.clone(), instance);

        let was_dirty = self.needs_reconcile();
        if let Err(e) = self.persist(&hosts) {
            // Nothing remote happened yet, so undo the insert.
            hosts.shift_remove(&locator);
            self.inner.needs_reconcile.store(was_dirty, Ordering::SeqCst);
            return Err(e.into());
        }
        self.publish(&hosts);
        info!(%locator, "placement host added");
        Ok(record)
    }

    /// Drain and unregister a host.
    ///
    /// A non-empty host is refused unless `force` is set, in which case
    /// every workload is moved back to the local host first. If any detach
    /// fails the host stays registered with its reduced workload set
    /// persisted. If that write fails too, both errors are returned as
    /// [`PlacementError::Unrecorded`].
    pub async fn remove_host(&self, candidate: &str, force: bool) -> PlacementResult<HostRecord> {
        let locator = host_locator(candidate)?;
        let mut hosts = self.inner.hosts.lock().await;
        let Some(instance) = hosts.get_mut(&locator) else {
            return Err(PlacementError::HostNotFound(locator.to_string()));
        };

        let before = instance.len();
        if let Err(e) = instance.drain(force).await {
            let changed = instance.len() != before;
            if changed {
                self.publish(&hosts);
                if let Err(storage) = self.persist(&hosts) {
                    return Err(PlacementError::Unrecorded {
                        cause: Box::new(e),
                        storage,
                    });
                }
            }
            return Err(e);
        }

        let Some((index, _, mut removed)) = hosts.shift_remove_full(&locator) else {
            return Err(PlacementError::HostNotFound(locator.to_string()));
        };
        let record = removed.record();
        self.publish(&hosts);
        if let Err(e) = self.persist(&hosts) {
            // Keep the (now empty) record so memory never claims a removal
            // the store does not have.
            removed.reopen();
            hosts.shift_insert(index, locator, removed);
            self.publish(&hosts);
            return Err(e.into());
        }
        info!(%locator, detached = before, "placement host removed");
        Ok(record)
    }

    /// Place `workload` on `target`, detaching it from wherever it runs now.
    ///
    /// Assigning a workload to where it already is succeeds without any
    /// engine call. If the detach from the old host succeeds but the
    /// attach to the new one fails, the workload stays on the local host,
    /// that is persisted, and the attach error is returned (wrapped in
    /// [`PlacementError::Unrecorded`] when the write fails).
    pub async fn assign(&self, target: &Target, workload: &WorkloadId) -> PlacementResult<()> {
        let mut hosts = self.inner.hosts.lock().await;
        if let Target::Remote(locator) = target {
            if !hosts.contains_key(locator) {
                return Err(PlacementError::HostNotFound(locator.to_string()));
            }
        }

        let current = hosts
            .values()
            .find(|h| h.contains(workload))
            .map(|h| h.locator().clone());
        let unchanged = match (&current, target) {
            (None, Target::Local) => true,
            (Some(from), Target::Remote(to)) => from == to,
            _ => false,
        };
        if unchanged {
            debug!(%workload, %target, "workload already in place");
            return Ok(());
        }

        if let Some(from) = &current {
            let host = hosts
                .get_mut(from)
                .ok_or_else(|| PlacementError::HostNotFound(from.to_string()))?;
            host.detach(workload).await?;
        }

        if let Target::Remote(to) = target {
            let host = hosts
                .get_mut(to)
                .ok_or_else(|| PlacementError::HostNotFound(to.to_string()))?;
            if let Err(e) = host.attach(workload).await {
                if current.is_some() {
                    self.publish(&hosts);
                    if let Err(storage) = self.persist(&hosts) {
                        return Err(PlacementError::Unrecorded {
                            cause: Box::new(e),
                            storage,
                        });
                    }
                }
                return Err(e);
            }
        }

        self.publish(&hosts);
        self.persist(&hosts)?;
        info!(
            %workload,
            from = %current.map(Target::Remote).unwrap_or(Target::Local),
            to = %target,
            "workload placed"
        );
        Ok(())
    }

    /// Rewrite the document from memory, clearing `needs_reconcile`.
    pub async fn flush(&self) -> PlacementResult<()> {
        let hosts = self.inner.hosts.lock().await;
        Ok(self.persist(&hosts)?)
    }

    /// Close every open engine connection. Registry contents and the
    /// store are left as they are.
    pub async fn shutdown(&self) {
        let mut hosts = self.inner.hosts.lock().await;
        for host in hosts.values_mut() {
            host.close().await;
        }
        debug!("placement registry connections closed");
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn publish(&self, hosts: &Hosts) {
        self.inner.snapshot.store(Arc::new(Snapshot::capture(hosts)));
    }

    fn persist(&self, hosts: &Hosts) -> StateResult<()> {
        match self.inner.store.save(&raw_state(hosts)) {
            Ok(()) => {
                self.inner.needs_reconcile.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.inner.needs_reconcile.store(true, Ordering::SeqCst);
                error!(error = %e, "placement document write failed, reconcile required");
                Err(e)
            }
        }
    }
}

/// Validate a locator named by a caller. The `local` keyword is the
/// implicit local host and is reserved like the runtime socket.
fn host_locator(candidate: &str) -> PlacementResult<Locator> {
    if candidate == LOCAL_ALIAS {
        return Err(ValidationError::ReservedLocator(candidate.to_string()).into());
    }
    Ok(validate_locator(candidate)?)
}

fn raw_state(hosts: &Hosts) -> RawState {
    let mut raw = RawState::new();
    for (locator, host) in hosts {
        raw.hosts.insert(
            locator.to_string(),
            host.workloads().map(|w| w.to_string()).collect(),
        );
    }
    raw
}
