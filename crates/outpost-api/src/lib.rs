//! outpost-api — REST API for the placement registry.
//!
//! Host locators are URLs, so they travel percent-encoded in path
//! segments (`https%3A%2F%2Fnode1.local`). The word `local` addresses
//! the implicit local host.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/hosts` | List placement hosts |
//! | POST | `/api/v1/hosts` | Register a host |
//! | GET | `/api/v1/hosts/{host}` | Get host details |
//! | DELETE | `/api/v1/hosts/{host}?force=` | Remove a host, draining it if forced |
//! | POST | `/api/v1/hosts/{host}/workloads/{workload}` | Place a workload on a host |
//! | GET | `/api/v1/workloads/{workload}` | Where a workload runs |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use outpost_registry::{PlacementRegistry, WorkloadCatalog};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: PlacementRegistry,
    pub catalog: Arc<dyn WorkloadCatalog>,
}

/// Build the complete API router.
pub fn build_router(registry: PlacementRegistry, catalog: Arc<dyn WorkloadCatalog>) -> Router {
    let api_state = ApiState { registry, catalog };

    let api_routes = Router::new()
        .route("/hosts", get(handlers::list_hosts).post(handlers::add_host))
        .route("/hosts/{host}", get(handlers::get_host).delete(handlers::remove_host))
        .route("/hosts/{host}/workloads/{workload}", post(handlers::assign_workload))
        .route("/workloads/{workload}", get(handlers::get_placement))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
