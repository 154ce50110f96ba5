//! HTTP request handlers for the control API.
//!
//! Each handler resolves its request against the declared state the daemon last loaded and
//! calls into the reconciler's components.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::{
    state::ServerState,
    types::{ActionResponse, ErrorResponse, InstanceRequest, InstancesResponse},
};
use crate::{php::InstanceKey, HostcoreError};

//-------------------------------------------------------------------------------------------------
// Functions: Handlers
//-------------------------------------------------------------------------------------------------

/// Handler for the POST /reconcile endpoint
///
/// Rereads the state file and runs a full pass
pub async fn reconcile_handler(State(state): State<ServerState>) -> Response {
    match state.reload_and_reconcile().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for the GET /instances endpoint
pub async fn instances_handler(State(state): State<ServerState>) -> Response {
    let instances = state.reconciler().instances().status().await;
    (StatusCode::OK, Json(InstancesResponse { instances })).into_response()
}

/// Handler for the POST /instances/start endpoint
///
/// Also clears a failed state left by exhausted restarts
pub async fn start_handler(
    State(state): State<ServerState>,
    Json(req): Json<InstanceRequest>,
) -> Response {
    let key = match parse_key(&req) {
        Ok(key) => key,
        Err(e) => return error_response(e),
    };

    let declared = state.declared().read().await.clone();
    match state.reconciler().instances().start(&key, &declared).await {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for the POST /instances/stop endpoint
pub async fn stop_handler(
    State(state): State<ServerState>,
    Json(req): Json<InstanceRequest>,
) -> Response {
    let key = match parse_key(&req) {
        Ok(key) => key,
        Err(e) => return error_response(e),
    };

    match state.reconciler().instances().stop(&key).await {
        Ok(()) => action_response(format!("stopped {key}")),
        Err(e) => error_response(e),
    }
}

/// Handler for the POST /instances/restart endpoint
pub async fn restart_handler(
    State(state): State<ServerState>,
    Json(req): Json<InstanceRequest>,
) -> Response {
    let key = match parse_key(&req) {
        Ok(key) => key,
        Err(e) => return error_response(e),
    };

    let declared = state.declared().read().await.clone();
    match state.reconciler().instances().restart(&key, &declared).await {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for the POST /instances/restart-workers endpoint
pub async fn restart_workers_handler(
    State(state): State<ServerState>,
    Json(req): Json<InstanceRequest>,
) -> Response {
    let key = match parse_key(&req) {
        Ok(key) => key,
        Err(e) => return error_response(e),
    };

    match state.reconciler().instances().restart_workers(&key).await {
        Ok(()) => action_response(format!("restarted workers of {key}")),
        Err(e) => error_response(e),
    }
}

/// Handler for the GET /jail/{username} endpoint
pub async fn jail_status_handler(
    State(state): State<ServerState>,
    Path(username): Path<String>,
) -> Response {
    match state.reconciler().jail().status(&username).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(e),
    }
}

//-------------------------------------------------------------------------------------------------
// Functions: Helpers
//-------------------------------------------------------------------------------------------------

fn parse_key(req: &InstanceRequest) -> Result<InstanceKey, HostcoreError> {
    InstanceKey::parse(&req.username, &req.version)
}

fn action_response(message: String) -> Response {
    (StatusCode::OK, Json(ActionResponse { message })).into_response()
}

fn error_response(error: HostcoreError) -> Response {
    let status = error_status(&error);
    if status.is_server_error() {
        tracing::error!("control request failed: {error}");
    } else {
        tracing::debug!("control request rejected: {error}");
    }

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// Maps an error to the status the control API answers with.
pub(crate) fn error_status(error: &HostcoreError) -> StatusCode {
    match error {
        HostcoreError::InvalidUsername(_)
        | HostcoreError::InvalidVersion(_)
        | HostcoreError::InvalidDomain(_)
        | HostcoreError::InvalidSite { .. } => StatusCode::BAD_REQUEST,
        HostcoreError::UnknownUser(_)
        | HostcoreError::VersionUnavailable(_)
        | HostcoreError::InstanceNotRunning(_) => StatusCode::NOT_FOUND,
        HostcoreError::JailPrecondition { .. }
        | HostcoreError::InstanceFailed(_)
        | HostcoreError::SocketInUse(_) => StatusCode::CONFLICT,
        HostcoreError::AdminApi { .. } | HostcoreError::ProxyReload(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
