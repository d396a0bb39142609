use crate::db::queries::audit::list_audit_entries;
use axum::{routing::get, Router};
use sqlx::PgPool;

/// Register audit trail routes
pub fn audit_routes() -> Router<PgPool> {
    Router::new().route("/audit", get(list_audit_entries))
}
