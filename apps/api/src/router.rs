use axum::{
    Router,
    routing::get,
};

use case_management_cell::router::{case_management_routes, CaseManagementState};

pub fn create_router(state: CaseManagementState) -> Router {
    Router::new()
        .route("/", get(|| async { "Case Booking API is running!" }))
        .nest("/api", case_management_routes(state))
}
