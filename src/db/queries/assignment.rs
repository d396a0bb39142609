use crate::db::models::assignment::{
    AssignmentListParams, AssignmentRecord, BulkAssignEntry, BulkAssignFailure, BulkAssignReport,
    DateParam, NewAssignment, StaffDaySummary, SummaryParams,
};
use crate::db::queries::audit::StaffNameCache;
use crate::engine::store::{AssignmentStore, PgAssignmentStore, StoreError};
use crate::engine::validator::{self, IssueKind, ValidationIssue, ValidationReport};
use crate::utils::api_response::ApiResponse;

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use sqlx::PgPool;
use utoipa::OpenApi;

fn store_error_response(error: &StoreError) -> ApiResponse<()> {
    match error {
        StoreError::Conflict { .. } => ApiResponse::error(
            StatusCode::CONFLICT,
            "Assignment was changed by another session",
            Some(json!({ "error": error.to_string() })),
        ),
        StoreError::Transport(_) => ApiResponse::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to reach the assignment store",
            Some(json!({ "error": error.to_string() })),
        ),
    }
}

/// List assignment records for a date
#[utoipa::path(
    get,
    path = "/assignments",
    params(AssignmentListParams),
    responses(
        (status = 200, description = "Assignments retrieved successfully", body = [AssignmentRecord]),
        (status = 500, description = "Failed to retrieve assignments")
    ),
    tag = "Assignments"
)]
pub async fn list_assignments(
    State(pool): State<PgPool>,
    Extension(names): Extension<StaffNameCache>,
    Query(params): Query<AssignmentListParams>,
) -> Result<ApiResponse<Vec<AssignmentRecord>>, ApiResponse<()>> {
    let store = PgAssignmentStore::new(pool, names);
    match store.list(params.date, params.team_id.as_deref()).await {
        Ok(records) => Ok(ApiResponse::success(
            StatusCode::OK,
            "Assignments retrieved successfully",
            records,
        )),
        Err(e) => Err(store_error_response(&e)),
    }
}

/// Assign a staff member to a team on a date
#[utoipa::path(
    post,
    path = "/assignments",
    request_body = NewAssignment,
    responses(
        (status = 201, description = "Assignment created successfully", body = NewAssignment),
        (status = 409, description = "Assignment was changed concurrently by another session"),
        (status = 500, description = "Failed to create assignment")
    ),
    tag = "Assignments"
)]
pub async fn create_assignment(
    State(pool): State<PgPool>,
    Extension(names): Extension<StaffNameCache>,
    Json(payload): Json<NewAssignment>,
) -> Result<ApiResponse<NewAssignment>, ApiResponse<()>> {
    let store = PgAssignmentStore::new(pool, names);
    match store
        .assign(&payload.staff_id, &payload.team_id, payload.date)
        .await
    {
        Ok(()) => Ok(ApiResponse::success(
            StatusCode::CREATED,
            "Assignment created successfully",
            payload,
        )),
        Err(e) => Err(store_error_response(&e)),
    }
}

/// Remove a staff member's assignment for a date
#[utoipa::path(
    delete,
    path = "/assignments/{staff_id}",
    params(
        ("staff_id" = String, Path, description = "Staff member to unassign"),
        DateParam
    ),
    responses(
        (status = 200, description = "Assignment removed successfully"),
        (status = 409, description = "Assignment was already removed or changed by another session"),
        (status = 500, description = "Failed to remove assignment")
    ),
    tag = "Assignments"
)]
pub async fn delete_assignment(
    State(pool): State<PgPool>,
    Extension(names): Extension<StaffNameCache>,
    Path(staff_id): Path<String>,
    Query(params): Query<DateParam>,
) -> Result<ApiResponse<()>, ApiResponse<()>> {
    let store = PgAssignmentStore::new(pool, names);
    match store.remove(&staff_id, params.date).await {
        Ok(()) => Ok(ApiResponse::success(
            StatusCode::OK,
            "Assignment removed successfully",
            (),
        )),
        Err(e) => Err(store_error_response(&e)),
    }
}

/// Assign a batch of staff members, best-effort
#[utoipa::path(
    post,
    path = "/assignments/bulk",
    request_body = [BulkAssignEntry],
    responses(
        (status = 200, description = "Batch processed; failed entries reported", body = BulkAssignReport),
        (status = 500, description = "Failed to process batch")
    ),
    tag = "Assignments"
)]
pub async fn bulk_create_assignments(
    State(pool): State<PgPool>,
    Extension(names): Extension<StaffNameCache>,
    Json(entries): Json<Vec<BulkAssignEntry>>,
) -> Result<ApiResponse<BulkAssignReport>, ApiResponse<()>> {
    let store = PgAssignmentStore::new(pool, names);
    match store.bulk_assign(&entries).await {
        Ok(report) => {
            let message = if report.failed.is_empty() {
                format!("Assigned {} staff members", report.assigned)
            } else {
                format!(
                    "Assigned {} staff members, {} failed",
                    report.assigned,
                    report.failed.len()
                )
            };
            Ok(ApiResponse::success(StatusCode::OK, message, report))
        }
        Err(e) => Err(store_error_response(&e)),
    }
}

/// Derived booking-linkage view for a set of staff members
#[utoipa::path(
    get,
    path = "/assignments/summary",
    params(SummaryParams),
    responses(
        (status = 200, description = "Summary retrieved successfully", body = [StaffDaySummary]),
        (status = 500, description = "Failed to retrieve summary")
    ),
    tag = "Assignments"
)]
pub async fn summarize_assignments(
    State(pool): State<PgPool>,
    Extension(names): Extension<StaffNameCache>,
    Query(params): Query<SummaryParams>,
) -> Result<ApiResponse<Vec<StaffDaySummary>>, ApiResponse<()>> {
    let staff_ids: Vec<String> = params
        .staff_ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let store = PgAssignmentStore::new(pool, names);
    match store.summarize(&staff_ids, params.date).await {
        Ok(summaries) => Ok(ApiResponse::success(
            StatusCode::OK,
            "Summary retrieved successfully",
            summaries,
        )),
        Err(e) => Err(store_error_response(&e)),
    }
}

/// Run the reconciliation validator for a date
#[utoipa::path(
    get,
    path = "/assignments/validate",
    params(DateParam),
    responses(
        (status = 200, description = "Validation pass completed", body = ValidationReport),
        (status = 500, description = "Validation pass could not run")
    ),
    tag = "Assignments"
)]
pub async fn validate_assignments(
    State(pool): State<PgPool>,
    Extension(names): Extension<StaffNameCache>,
    Query(params): Query<DateParam>,
) -> Result<ApiResponse<ValidationReport>, ApiResponse<()>> {
    let store = PgAssignmentStore::new(pool, names);
    match validator::validate(&store, params.date).await {
        Ok(report) => {
            let message = if report.is_valid {
                "Assignments are consistent with the booking linkage".to_string()
            } else {
                format!(
                    "Validation found {} blocking inconsistencies",
                    report.errors.len()
                )
            };
            if report.warnings.is_empty() {
                Ok(ApiResponse::success(StatusCode::OK, message, report))
            } else {
                let warnings = json!(report.warnings);
                Ok(ApiResponse::success_with_warnings(
                    StatusCode::OK,
                    message,
                    report,
                    warnings,
                ))
            }
        }
        Err(e) => Err(store_error_response(&e)),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        list_assignments,
        create_assignment,
        delete_assignment,
        bulk_create_assignments,
        summarize_assignments,
        validate_assignments,
    ),
    components(
        schemas(
            AssignmentRecord,
            NewAssignment,
            StaffDaySummary,
            BulkAssignEntry,
            BulkAssignFailure,
            BulkAssignReport,
            ValidationReport,
            ValidationIssue,
            IssueKind,
        )
    ),
    tags(
        (name = "Assignments", description = "Staff to team assignment management")
    )
)]
pub struct AssignmentDoc;
