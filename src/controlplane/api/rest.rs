//! REST API Handlers
//!
//! Implements the REST API endpoints for volume provisioning and pool
//! inspection.

use crate::controlplane::Orchestrator;
use crate::domain::ports::{DriverStatus, VolumeInfo, VolumeRequest};
use crate::error::{Error, Result};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Volume create request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeRequest {
    /// Name of the volume
    pub name: String,
    /// Capacity (e.g., "10Gi", "500Mi")
    pub capacity: String,
    /// Attribute options: aggregate, spaceReserve, snapshotPolicy,
    /// snapshotDir, encryption
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Volume resize request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeVolumeRequest {
    pub capacity: String,
}

/// Volume response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeResponse {
    pub name: String,
    pub flexvol: String,
    pub capacity_bytes: Option<u64>,
    pub driver: String,
}

impl From<VolumeInfo> for VolumeResponse {
    fn from(info: VolumeInfo) -> Self {
        Self {
            name: info.name,
            flexvol: info.container,
            capacity_bytes: info.size_bytes,
            driver: info.driver,
        }
    }
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn error_response(status: StatusCode, error: &str, message: String) -> Response {
    (
        status,
        Json(ApiErrorResponse {
            error: error.into(),
            message,
            details: None,
        }),
    )
        .into_response()
}

/// Map a driver error to an HTTP response
fn driver_error(e: &Error) -> Response {
    let (status, code) = match e {
        e if e.is_validation() => (StatusCode::BAD_REQUEST, "invalid_request"),
        Error::ResourceExists { .. } => (StatusCode::CONFLICT, "already_exists"),
        Error::ResourceNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        Error::BackendUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable"),
        e if e.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, "backend_busy"),
        e if e.is_fatal() => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    // Backend call failures carry array identifiers; those stay in the logs
    let message = match e {
        Error::ApiFailed { .. } | Error::Transport { .. } | Error::QuotaTransitionTimeout { .. } => {
            "Storage backend request failed".to_string()
        }
        e => e.to_string(),
    };
    error_response(status, code, message)
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    orchestrator: Arc<Orchestrator>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator,
        };

        Router::new()
            // Volume endpoints
            .route("/v1/volumes", get(list_volumes).post(create_volume))
            .route("/v1/volumes/:name", get(get_volume).delete(delete_volume))
            .route("/v1/volumes/:name/size", put(resize_volume))
            // Pool endpoint
            .route("/v1/pool", get(pool_status))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a volume
async fn create_volume(
    State(state): State<AppState>,
    Json(request): Json<CreateVolumeRequest>,
) -> Response {
    info!("Creating volume: {}", request.name);

    let size_bytes = match parse_capacity(&request.capacity) {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_capacity",
                format!("Invalid capacity: {}", e),
            );
        }
    };

    let volume_request = VolumeRequest {
        name: request.name,
        size_bytes,
        options: request.options,
    };

    match state.orchestrator.provision(volume_request).await {
        Ok(volume) => (StatusCode::CREATED, Json(VolumeResponse::from(volume))).into_response(),
        Err(e) => {
            error!("Create failed: {}", e);
            driver_error(&e)
        }
    }
}

/// List volume names
async fn list_volumes(State(state): State<AppState>) -> Response {
    match state.orchestrator.list_volumes().await {
        Ok(names) => (StatusCode::OK, Json(names)).into_response(),
        Err(e) => driver_error(&e),
    }
}

/// Get a volume
async fn get_volume(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.orchestrator.get_volume(&name).await {
        Ok(Some(volume)) => (StatusCode::OK, Json(VolumeResponse::from(volume))).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Volume {} not found", name),
        ),
        Err(e) => driver_error(&e),
    }
}

/// Delete a volume
async fn delete_volume(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.orchestrator.delete_volume(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!("Delete failed: {}", e);
            driver_error(&e)
        }
    }
}

/// Grow a volume
async fn resize_volume(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ResizeVolumeRequest>,
) -> Response {
    let size_bytes = match parse_capacity(&request.capacity) {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_capacity",
                format!("Invalid capacity: {}", e),
            );
        }
    };

    match state.orchestrator.resize_volume(&name, size_bytes).await {
        Ok(volume) => (StatusCode::OK, Json(VolumeResponse::from(volume))).into_response(),
        Err(e) => {
            warn!("Resize failed: {}", e);
            driver_error(&e)
        }
    }
}

/// Flexvols, pending resizes, and counters of every driver
async fn pool_status(State(state): State<AppState>) -> Response {
    match state.orchestrator.driver_status().await {
        Ok(statuses) => (StatusCode::OK, Json::<Vec<DriverStatus>>(statuses)).into_response(),
        Err(e) => driver_error(&e),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.orchestrator.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "drivers not initialized")
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Parse capacity string (e.g., "100Gi", "1Ti") to bytes
pub fn parse_capacity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty capacity string".into()));
    }

    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let unit_str = s[num_end..].trim();

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::CapacityParse(format!("invalid number: {}", num_str)))?;

    let multiplier: u64 = match unit_str.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KI" | "KIB" => 1024,
        "M" | "MB" | "MI" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GI" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TI" | "TIB" => 1024 * 1024 * 1024 * 1024,
        _ => return Err(Error::CapacityParse(format!("unknown unit: {}", unit_str))),
    };

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::OrchestratorConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_parse_capacity() {
        assert_eq!(parse_capacity("100").unwrap(), 100);
        assert_eq!(parse_capacity("1Ki").unwrap(), 1024);
        assert_eq!(parse_capacity("1M").unwrap(), 1024 * 1024);
        assert_eq!(parse_capacity("10Gi").unwrap(), 10 * GIB);
        assert_eq!(parse_capacity("1.5Gi").unwrap(), 3 * GIB / 2);
        assert_eq!(parse_capacity("1T").unwrap(), 1024 * GIB);

        assert!(parse_capacity("").is_err());
        assert!(parse_capacity("abc").is_err());
        assert!(parse_capacity("100X").is_err());
    }

    async fn router() -> Router {
        let mut config = OrchestratorConfig::default();
        config.backends.economy.quota.poll_interval_millis = 1;
        let orchestrator = Orchestrator::new(config);
        orchestrator.initialize().await.unwrap();
        RestRouter::new(orchestrator).build()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_volume_endpoints() {
        let app = router().await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/volumes",
                serde_json::json!({ "name": "pvc_1", "capacity": "10Gi" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: VolumeResponse = body_json(response).await;
        assert_eq!(created.capacity_bytes, Some(10 * GIB));

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/volumes",
                serde_json::json!({ "name": "pvc_1", "capacity": "10Gi" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/v1/volumes/pvc_1/size",
                serde_json::json!({ "capacity": "20Gi" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/v1/volumes/pvc_1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let fetched: VolumeResponse = body_json(response).await;
        assert_eq!(fetched.capacity_bytes, Some(20 * GIB));
        assert_eq!(fetched.flexvol, created.flexvol);

        let response = app
            .clone()
            .oneshot(Request::get("/v1/pool").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let pool: Vec<DriverStatus> = body_json(response).await;
        assert_eq!(pool[0].containers.len(), 1);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::delete("/v1/volumes/pvc_1")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let response = app
            .oneshot(Request::get("/v1/volumes/pvc_1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let app = router().await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/volumes",
                serde_json::json!({ "name": "pvc-dash", "capacity": "1Gi" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/volumes",
                serde_json::json!({ "name": "pvc_1", "capacity": "lots" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(json_request(
                "PUT",
                "/v1/volumes/missing/size",
                serde_json::json!({ "capacity": "1Gi" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_driver_error_mapping() {
        let corrupt = driver_error(&Error::QuotaCorrupt {
            flexvol: "qtree_pool_pool_abcdefghij".into(),
        });
        assert_eq!(corrupt.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: ApiErrorResponse = body_json(corrupt).await;
        assert!(!body.message.contains("qtree_pool_pool_abcdefghij"));

        let deletion = driver_error(&Error::VolumeDeletionFailed {
            name: "pvc_1".into(),
        });
        assert_eq!(deletion.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: ApiErrorResponse = body_json(deletion).await;
        assert_eq!(body.message, "Volume deletion failed: pvc_1");

        let resize = driver_error(&Error::VolumeResizeFailed {
            name: "pvc_1".into(),
        });
        assert_eq!(resize.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let lookup = driver_error(&Error::api(
            "qtree-exists",
            crate::domain::ports::ErrorCode::ApiError,
            "array busy",
        ));
        assert_eq!(lookup.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: ApiErrorResponse = body_json(lookup).await;
        assert!(!body.message.contains("qtree-exists"));

        let shrink = driver_error(&Error::ApiValidation("cannot shrink".into()));
        assert_eq!(shrink.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_readiness() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let app = RestRouter::new(orchestrator.clone()).build();

        let response = app
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        orchestrator.initialize().await.unwrap();
        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
