//! Route definitions for the control API.

use axum::{
    routing::{get, post},
    Router,
};

use super::{handlers, state::ServerState};

//-------------------------------------------------------------------------------------------------
// Functions
//-------------------------------------------------------------------------------------------------

/// Creates a new router with all API endpoints configured
///
/// ## Arguments
/// * `state` - The shared server state
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/reconcile", post(handlers::reconcile_handler))
        .route("/instances", get(handlers::instances_handler))
        .route("/instances/start", post(handlers::start_handler))
        .route("/instances/stop", post(handlers::stop_handler))
        .route("/instances/restart", post(handlers::restart_handler))
        .route(
            "/instances/restart-workers",
            post(handlers::restart_workers_handler),
        )
        .route("/jail/{username}", get(handlers::jail_status_handler))
        .with_state(state)
}
