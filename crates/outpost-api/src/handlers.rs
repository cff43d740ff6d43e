//! REST API handlers.
//!
//! Reads come straight from the registry snapshot. Mutations are spawned
//! onto their own task so a client hanging up mid-request cannot cancel
//! an engine call or store write that has already started.

use std::future::Future;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

use outpost_core::{LOCAL_ALIAS, Target, validate_workload_id};
use outpost_registry::{HostRecord, HostState, PlacementError, PlacementResult};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn status_for(err: &PlacementError) -> StatusCode {
    match err {
        PlacementError::Validation(_) => StatusCode::BAD_REQUEST,
        PlacementError::HostNotFound(_) => StatusCode::NOT_FOUND,
        PlacementError::DuplicateHost(_)
        | PlacementError::AlreadyAssigned { .. }
        | PlacementError::NotAssigned { .. }
        | PlacementError::NotEmpty { .. } => StatusCode::CONFLICT,
        PlacementError::Connection(_) | PlacementError::Engine(_) => StatusCode::BAD_GATEWAY,
        PlacementError::Drain { .. }
        | PlacementError::Storage(_)
        | PlacementError::Unrecorded { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn placement_error(err: &PlacementError) -> Response {
    error_response(&err.to_string(), status_for(err))
}

/// Run a registry mutation to completion on its own task.
async fn shielded<T, F>(op: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: Future<Output = PlacementResult<T>> + Send + 'static,
{
    match tokio::spawn(op).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(placement_error(&e)),
        Err(e) => {
            error!(error = %e, "placement task aborted");
            Err(error_response("placement task aborted", StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Host detail as rendered by the API.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HostView {
    pub locator: String,
    pub local: bool,
    pub workloads: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<HostState>,
}

impl From<HostRecord> for HostView {
    fn from(record: HostRecord) -> Self {
        Self {
            locator: record.locator.to_string(),
            local: false,
            workloads: record.workloads.iter().map(|w| w.to_string()).collect(),
            state: Some(record.state),
        }
    }
}

// ── Hosts ──────────────────────────────────────────────────────

/// GET /api/v1/hosts
pub async fn list_hosts(State(state): State<ApiState>) -> impl IntoResponse {
    let hosts: Vec<HostView> = state.registry.list().into_iter().map(HostView::from).collect();
    ApiResponse::ok(hosts)
}

/// GET /api/v1/hosts/{host}
pub async fn get_host(State(state): State<ApiState>, Path(host): Path<String>) -> Response {
    let target = match Target::parse(&host) {
        Ok(t) => t,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };
    match state.registry.lookup(&target) {
        Ok(Some(record)) => ApiResponse::ok(HostView::from(record)).into_response(),
        Ok(None) => ApiResponse::ok(HostView {
            locator: LOCAL_ALIAS.to_string(),
            local: true,
            workloads: Vec::new(),
            state: None,
        })
        .into_response(),
        Err(e) => placement_error(&e),
    }
}

/// Add-host request body.
#[derive(Debug, Deserialize)]
pub struct AddHostRequest {
    pub host: String,
}

/// POST /api/v1/hosts
pub async fn add_host(State(state): State<ApiState>, Json(req): Json<AddHostRequest>) -> Response {
    let registry = state.registry.clone();
    match shielded(async move { registry.add_host(&req.host).await }).await {
        Ok(record) => (StatusCode::CREATED, ApiResponse::ok(HostView::from(record))).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoveHostParams {
    #[serde(default)]
    pub force: bool,
}

/// DELETE /api/v1/hosts/{host}?force=true
pub async fn remove_host(
    State(state): State<ApiState>,
    Path(host): Path<String>,
    Query(params): Query<RemoveHostParams>,
) -> Response {
    let registry = state.registry.clone();
    match shielded(async move { registry.remove_host(&host, params.force).await }).await {
        Ok(record) => ApiResponse::ok(HostView::from(record)).into_response(),
        Err(resp) => resp,
    }
}

// ── Workloads ──────────────────────────────────────────────────

/// Where a workload runs.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PlacementView {
    pub workload: String,
    pub host: String,
}

/// POST /api/v1/hosts/{host}/workloads/{workload}
///
/// `host` may be `local` to move the workload back to the local runtime.
pub async fn assign_workload(
    State(state): State<ApiState>,
    Path((host, workload)): Path<(String, String)>,
) -> Response {
    let target = match Target::parse(&host) {
        Ok(t) => t,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };
    let workload = match validate_workload_id(&workload) {
        Ok(w) => w,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };
    if let Err(e) = state.catalog.resolve(&workload) {
        return error_response(&e.to_string(), StatusCode::NOT_FOUND);
    }

    let registry = state.registry.clone();
    let view = PlacementView {
        workload: workload.to_string(),
        host: target.to_string(),
    };
    match shielded(async move { registry.assign(&target, &workload).await }).await {
        Ok(()) => ApiResponse::ok(view).into_response(),
        Err(resp) => resp,
    }
}

/// GET /api/v1/workloads/{workload}
pub async fn get_placement(
    State(state): State<ApiState>,
    Path(workload): Path<String>,
) -> Response {
    let workload = match validate_workload_id(&workload) {
        Ok(w) => w,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };
    let host = state.registry.placement_of(&workload);
    ApiResponse::ok(PlacementView {
        workload: workload.to_string(),
        host: host.to_string(),
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use outpost_registry::{PlacementRegistry, RecordingEngine, StaticCatalog};
    use outpost_state::MemoryStore;

    const NODE1: &str = "https://node1.local";

    fn test_state() -> (ApiState, Arc<RecordingEngine>) {
        let engine = Arc::new(RecordingEngine::new());
        let registry = PlacementRegistry::new(Arc::new(MemoryStore::new()), engine.clone());
        let catalog = StaticCatalog::new([validate_workload_id("my_addon").unwrap()]);
        (
            ApiState {
                registry,
                catalog: Arc::new(catalog),
            },
            engine,
        )
    }

    async fn add(state: &ApiState, host: &str) -> Response {
        add_host(
            State(state.clone()),
            Json(AddHostRequest {
                host: host.to_string(),
            }),
        )
        .await
    }

    async fn assign(state: &ApiState, host: &str, workload: &str) -> Response {
        assign_workload(
            State(state.clone()),
            Path((host.to_string(), workload.to_string())),
        )
        .await
    }

    #[tokio::test]
    async fn list_hosts_empty() {
        let (state, _) = test_state();
        let resp = list_hosts(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn add_and_get_host() {
        let (state, _) = test_state();
        assert_eq!(add(&state, NODE1).await.status(), StatusCode::CREATED);

        let resp = get_host(State(state), Path(NODE1.to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn add_duplicate_host_conflicts() {
        let (state, _) = test_state();
        add(&state, NODE1).await;
        assert_eq!(add(&state, NODE1).await.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn add_reserved_or_malformed_host_is_bad_request() {
        let (state, _) = test_state();
        for host in ["unix:///run/docker.sock", "/run/docker.sock", "node1", ""] {
            assert_eq!(add(&state, host).await.status(), StatusCode::BAD_REQUEST, "{host}");
        }
    }

    #[tokio::test]
    async fn get_unknown_host_not_found() {
        let (state, _) = test_state();
        let resp = get_host(State(state), Path(NODE1.to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_local_host_ok() {
        let (state, _) = test_state();
        let resp = get_host(State(state), Path("local".to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn assign_unknown_workload_not_found() {
        let (state, _) = test_state();
        add(&state, NODE1).await;
        assert_eq!(assign(&state, NODE1, "ghost").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn assign_invalid_workload_is_bad_request() {
        let (state, _) = test_state();
        add(&state, NODE1).await;
        assert_eq!(assign(&state, NODE1, "My Addon").await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn assign_to_unknown_host_not_found() {
        let (state, _) = test_state();
        assert_eq!(assign(&state, NODE1, "my_addon").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn assign_to_unreachable_host_is_bad_gateway() {
        let (state, engine) = test_state();
        engine.set_unreachable(NODE1, true);
        add(&state, NODE1).await;
        assert_eq!(assign(&state, NODE1, "my_addon").await.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn assign_then_remove_requires_force() {
        let (state, _) = test_state();
        add(&state, NODE1).await;
        assert_eq!(assign(&state, NODE1, "my_addon").await.status(), StatusCode::OK);

        let resp = remove_host(
            State(state.clone()),
            Path(NODE1.to_string()),
            Query(RemoveHostParams::default()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = remove_host(
            State(state.clone()),
            Path(NODE1.to_string()),
            Query(RemoveHostParams { force: true }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get_placement(State(state), Path("my_addon".to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn storage_and_drain_map_to_server_error() {
        let err = PlacementError::Storage(outpost_state::StateError::Write("disk full".into()));
        assert_eq!(status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
        let err = PlacementError::Drain {
            host: NODE1.into(),
            failures: Vec::new(),
        };
        assert_eq!(status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
        let err = PlacementError::Unrecorded {
            cause: Box::new(err),
            storage: outpost_state::StateError::Write("disk full".into()),
        };
        assert_eq!(status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
