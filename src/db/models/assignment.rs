use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

/// One staff member working with one team on one date. At most one record
/// exists per `(staff_id, date)`; assigning to another team supersedes it.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRecord {
    pub staff_id: String,
    pub team_id: String,
    pub date: NaiveDate,
    pub assigned_at: Option<NaiveDateTime>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct NewAssignment {
    pub staff_id: String,
    pub team_id: String,
    pub date: NaiveDate,
}

/// Derived view row used by the reconciliation validator: which team the
/// booking/calendar system believes a staff member is on, and how many
/// bookings that team carries on the date.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone, PartialEq, Eq)]
pub struct StaffDaySummary {
    pub staff_id: String,
    pub team_id: Option<String>,
    pub booking_count: i64,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Clone)]
pub struct BulkAssignEntry {
    pub staff_id: String,
    pub team_id: String,
    pub date: NaiveDate,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct BulkAssignFailure {
    pub staff_id: String,
    pub date: NaiveDate,
    pub reason: String,
}

/// Best-effort batch result: entries that failed are reported, the rest
/// were committed.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct BulkAssignReport {
    pub assigned: usize,
    pub failed: Vec<BulkAssignFailure>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AssignmentListParams {
    pub date: NaiveDate,
    pub team_id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SummaryParams {
    pub date: NaiveDate,
    /// Comma-separated staff ids
    pub staff_ids: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DateParam {
    pub date: NaiveDate,
}
