//! Vetting a persisted placement document before it is restored.
//!
//! [`vet_document`] decides which entries of a [`RawState`] are kept: the
//! host locator must validate, the workload id must validate and resolve
//! in the catalog, and no workload may be claimed by two hosts (the first
//! host in document order wins). Both the registry load phase and offline
//! document checks go through it.

use std::collections::HashSet;
use std::fmt;

use outpost_core::{Locator, WorkloadId, validate_locator, validate_workload_id};
use outpost_state::RawState;

use crate::catalog::WorkloadCatalog;

/// A persisted entry that was dropped or could not be re-attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadIssue {
    pub host: String,
    pub workload: Option<String>,
    pub reason: String,
}

impl LoadIssue {
    pub(crate) fn new(host: &str, workload: Option<&str>, reason: impl ToString) -> Self {
        Self {
            host: host.to_string(),
            workload: workload.map(str::to_string),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for LoadIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.workload {
            Some(w) => write!(f, "{} on {}: {}", w, self.host, self.reason),
            None => write!(f, "{}: {}", self.host, self.reason),
        }
    }
}

/// Outcome of [`PlacementRegistry::load`](crate::PlacementRegistry::load).
///
/// `skipped` entries were left out of the registry and the rewritten
/// document. `unattached` entries stay recorded on their host even though
/// the engine could not re-attach them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub hosts: usize,
    pub restored: usize,
    pub skipped: Vec<LoadIssue>,
    pub unattached: Vec<LoadIssue>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.unattached.is_empty()
    }
}

/// A host entry that passed vetting, with its surviving workloads in
/// document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VettedHost {
    pub locator: Locator,
    pub workloads: Vec<WorkloadId>,
}

/// Result of [`vet_document`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VettedDocument {
    pub hosts: Vec<VettedHost>,
    pub skipped: Vec<LoadIssue>,
}

impl VettedDocument {
    /// Number of workload entries that survived vetting.
    pub fn workloads(&self) -> usize {
        self.hosts.iter().map(|h| h.workloads.len()).sum()
    }
}

/// Split `raw` into the entries a registry may restore and the ones it
/// must drop.
pub fn vet_document(raw: &RawState, catalog: &dyn WorkloadCatalog) -> VettedDocument {
    let mut vetted = VettedDocument::default();
    let mut claimed: HashSet<WorkloadId> = HashSet::new();

    for (raw_locator, raw_workloads) in &raw.hosts {
        let locator = match validate_locator(raw_locator) {
            Ok(locator) => locator,
            Err(e) => {
                vetted.skipped.push(LoadIssue::new(raw_locator, None, e));
                continue;
            }
        };

        let mut workloads = Vec::with_capacity(raw_workloads.len());
        for raw_workload in raw_workloads {
            let skip = |reason: String| LoadIssue::new(raw_locator, Some(raw_workload.as_str()), reason);
            let workload = match validate_workload_id(raw_workload) {
                Ok(w) => w,
                Err(e) => {
                    vetted.skipped.push(skip(e.to_string()));
                    continue;
                }
            };
            if let Err(e) = catalog.resolve(&workload) {
                vetted.skipped.push(skip(e.to_string()));
                continue;
            }
            if !claimed.insert(workload.clone()) {
                vetted.skipped.push(skip("already placed on another host".to_string()));
                continue;
            }
            workloads.push(workload);
        }
        vetted.hosts.push(VettedHost { locator, workloads });
    }
    vetted
}
