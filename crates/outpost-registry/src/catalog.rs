//! Workload catalog capability.
//!
//! The request layer resolves a workload through the catalog before asking
//! the registry to place it. The registry's load phase uses the same
//! catalog to drop persisted entries for workloads that no longer exist.

use indexmap::IndexSet;
use outpost_core::{ValidationError, WorkloadId, validate_workload_id};
use serde::Serialize;
use thiserror::Error;

/// What the catalog knows about a placeable workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadDescriptor {
    pub id: WorkloadId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("workload not found: {0}")]
    NotFound(String),
}

/// Lookup of installed, placeable workloads.
pub trait WorkloadCatalog: Send + Sync {
    fn resolve(&self, id: &WorkloadId) -> Result<WorkloadDescriptor, CatalogError>;
}

/// Catalog backed by a fixed list of workload ids.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    workloads: IndexSet<WorkloadId>,
    allow_any: bool,
}

impl StaticCatalog {
    pub fn new(workloads: impl IntoIterator<Item = WorkloadId>) -> Self {
        Self {
            workloads: workloads.into_iter().collect(),
            allow_any: false,
        }
    }

    /// Catalog that accepts every well-formed workload id.
    pub fn any() -> Self {
        Self {
            workloads: IndexSet::new(),
            allow_any: true,
        }
    }

    /// Build from config names. An empty list yields [`StaticCatalog::any`].
    pub fn from_names(names: &[String]) -> Result<Self, ValidationError> {
        if names.is_empty() {
            return Ok(Self::any());
        }
        let ids = names
            .iter()
            .map(|n| validate_workload_id(n))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(ids))
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}

impl WorkloadCatalog for StaticCatalog {
    fn resolve(&self, id: &WorkloadId) -> Result<WorkloadDescriptor, CatalogError> {
        if self.allow_any || self.workloads.contains(id) {
            Ok(WorkloadDescriptor { id: id.clone() })
        } else {
            Err(CatalogError::NotFound(id.to_string()))
        }
    }
}
