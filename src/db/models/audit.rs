use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

/// Kind of assignment transition an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Assign,
    Remove,
    Move,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Assign => "assign",
            ChangeType::Remove => "remove",
            ChangeType::Move => "move",
        }
    }
}

/// Append-only audit row for one committed assignment transition. Written
/// once by the backend, never updated or deleted.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct ChangeAuditEntry {
    pub id: i64,
    pub change_type: String,
    pub staff_id: String,
    pub staff_name: String,
    pub old_team_id: Option<String>,
    pub new_team_id: Option<String>,
    pub assignment_date: NaiveDate,
    pub affected_bookings: serde_json::Value,
    pub summary: String,
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditListParams {
    pub date: NaiveDate,
    pub staff_id: Option<String>,
}
