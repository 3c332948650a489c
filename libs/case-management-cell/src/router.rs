// libs/case-management-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::workflow::CaseWorkflowService;

#[derive(Clone)]
pub struct CaseManagementState {
    pub config: Arc<AppConfig>,
    pub workflow: Arc<CaseWorkflowService>,
}

pub fn case_management_routes(state: CaseManagementState) -> Router {
    // Every case and sync operation requires authentication
    let protected_routes = Router::new()
        .route("/cases", post(handlers::create_case).get(handlers::list_cases))
        .route("/cases/{case_id}", get(handlers::get_case))
        .route("/cases/{case_id}/status", post(handlers::update_case_status))
        .route("/cases/{case_id}/amend", post(handlers::amend_case))

        .route("/sync/status", get(handlers::sync_status))
        .route("/sync/flush", post(handlers::flush_sync_queue))
        .route("/sync/probe", post(handlers::probe_connection))

        // Admin only
        .route("/sync/dead-letters", get(handlers::list_dead_letters))
        .route("/sync/dead-letters/{item_id}/requeue", post(handlers::requeue_dead_letter))
        .route("/sync/dead-letters/{item_id}", delete(handlers::discard_dead_letter))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
