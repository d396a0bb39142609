use crate::db::models::audit::{AuditListParams, ChangeAuditEntry, ChangeType};
use crate::utils::api_response::ApiResponse;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use moka::sync::Cache;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use utoipa::OpenApi;

/// ✅ Staff display-name lookups cached with `moka`
pub type StaffNameCache = Arc<Cache<String, String>>;

/// ✅ Initialize the staff-name cache
pub fn create_staff_name_cache() -> StaffNameCache {
    Arc::new(
        Cache::builder()
            .time_to_live(Duration::from_secs(600)) // TTL = 10 minutes
            .build(),
    )
}

/// Resolve a staff id to a display name. A failed or empty lookup falls
/// back to a synthesized placeholder; the audit write never blocks on the
/// roster being reachable.
async fn resolve_staff_name(pool: &PgPool, cache: &StaffNameCache, staff_id: &str) -> String {
    if let Some(name) = cache.get(staff_id) {
        return name;
    }
    let looked_up: Option<String> =
        sqlx::query_scalar("SELECT display_name FROM staff WHERE id = $1")
            .bind(staff_id)
            .fetch_optional(pool)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(staff_id, "staff name lookup failed: {e}");
                None
            });
    match looked_up {
        Some(name) => {
            cache.insert(staff_id.to_string(), name.clone());
            name
        }
        None => format!("Staff #{}", staff_id),
    }
}

/// Booking ids linked to a team on a date, at time of writing. Lookup
/// failures degrade to an empty list.
async fn bookings_for_team(pool: &PgPool, team_id: &str, date: NaiveDate) -> Vec<String> {
    sqlx::query_scalar(
        "SELECT booking_id FROM team_bookings WHERE team_id = $1 AND booking_date = $2 ORDER BY booking_id",
    )
    .bind(team_id)
    .bind(date)
    .fetch_all(pool)
    .await
    .unwrap_or_else(|e| {
        tracing::warn!(team_id, %date, "booking lookup for audit entry failed: {e}");
        Vec::new()
    })
}

/// Append one immutable audit entry for a committed assignment transition.
/// Resolves identities best-effort and composes the human-readable summary;
/// callers must treat a failure here as non-fatal to the mutation.
pub async fn record_transition(
    pool: &PgPool,
    names: &StaffNameCache,
    staff_id: &str,
    old_team_id: Option<&str>,
    new_team_id: Option<&str>,
    date: NaiveDate,
    change_type: ChangeType,
) -> Result<i64, sqlx::Error> {
    let staff_name = resolve_staff_name(pool, names, staff_id).await;

    let mut affected_bookings = Vec::new();
    if let Some(team_id) = old_team_id {
        affected_bookings.extend(bookings_for_team(pool, team_id, date).await);
    }
    if let Some(team_id) = new_team_id {
        let mut bookings = bookings_for_team(pool, team_id, date).await;
        bookings.retain(|b| !affected_bookings.contains(b));
        affected_bookings.append(&mut bookings);
    }

    let summary = match change_type {
        ChangeType::Assign => format!(
            "{staff_name} assigned to team {} on {date} ({} linked bookings)",
            new_team_id.unwrap_or("?"),
            affected_bookings.len()
        ),
        ChangeType::Remove => format!(
            "{staff_name} removed from team {} on {date}",
            old_team_id.unwrap_or("?")
        ),
        ChangeType::Move => format!(
            "{staff_name} moved from team {} to team {} on {date}",
            old_team_id.unwrap_or("?"),
            new_team_id.unwrap_or("?")
        ),
    };

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO assignment_audit_log (
            change_type,
            staff_id,
            staff_name,
            old_team_id,
            new_team_id,
            assignment_date,
            affected_bookings,
            summary
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(change_type.as_str())
    .bind(staff_id)
    .bind(&staff_name)
    .bind(old_team_id)
    .bind(new_team_id)
    .bind(date)
    .bind(json!(affected_bookings))
    .bind(&summary)
    .fetch_one(pool)
    .await?;

    tracing::info!(audit_id = id, "{summary}");
    Ok(id)
}

/// Query the audit trail for a date
#[utoipa::path(
    get,
    path = "/audit",
    params(AuditListParams),
    responses(
        (status = 200, description = "Audit entries retrieved successfully", body = [ChangeAuditEntry]),
        (status = 500, description = "Failed to retrieve audit entries")
    ),
    tag = "Audit"
)]
pub async fn list_audit_entries(
    State(pool): State<PgPool>,
    Query(params): Query<AuditListParams>,
) -> Result<ApiResponse<Vec<ChangeAuditEntry>>, ApiResponse<()>> {
    let result = match &params.staff_id {
        Some(staff_id) => {
            sqlx::query_as::<_, ChangeAuditEntry>(
                r#"
                SELECT id, change_type, staff_id, staff_name, old_team_id, new_team_id,
                       assignment_date, affected_bookings, summary, created_at
                FROM assignment_audit_log
                WHERE assignment_date = $1 AND staff_id = $2
                ORDER BY created_at DESC
                LIMIT 200
                "#,
            )
            .bind(params.date)
            .bind(staff_id)
            .fetch_all(&pool)
            .await
        }
        None => {
            sqlx::query_as::<_, ChangeAuditEntry>(
                r#"
                SELECT id, change_type, staff_id, staff_name, old_team_id, new_team_id,
                       assignment_date, affected_bookings, summary, created_at
                FROM assignment_audit_log
                WHERE assignment_date = $1
                ORDER BY created_at DESC
                LIMIT 200
                "#,
            )
            .bind(params.date)
            .fetch_all(&pool)
            .await
        }
    };

    match result {
        Ok(entries) => Ok(ApiResponse::success(
            StatusCode::OK,
            "Audit entries retrieved successfully",
            entries,
        )),
        Err(e) => Err(ApiResponse::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to retrieve audit entries",
            Some(json!({ "error": e.to_string() })),
        )),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(list_audit_entries),
    components(
        schemas(
            ChangeAuditEntry,
            ChangeType,
        )
    ),
    tags(
        (name = "Audit", description = "Assignment transition audit trail")
    )
)]
pub struct AuditDoc;
