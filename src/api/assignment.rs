use crate::db::queries::assignment::{
    bulk_create_assignments, create_assignment, delete_assignment, list_assignments,
    summarize_assignments, validate_assignments,
};
use axum::{
    routing::{delete, get, post},
    Router,
};
use sqlx::PgPool;

/// Register assignment management routes
pub fn assignment_routes() -> Router<PgPool> {
    Router::new()
        .route(
            "/assignments",
            post(create_assignment).get(list_assignments),
        ) // Create & List Assignments
        .route("/assignments/bulk", post(bulk_create_assignments)) // Best-effort batch
        .route("/assignments/summary", get(summarize_assignments)) // Derived view
        .route("/assignments/validate", get(validate_assignments)) // Reconciliation pass
        .route("/assignments/{staff_id}", delete(delete_assignment)) // Remove Assignment
}
