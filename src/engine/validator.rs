use crate::db::models::assignment::AssignmentRecord;
use crate::engine::store::{AssignmentStore, StoreError};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Assignment exists but the derived view has no row for the staff id.
    MissingSummary,
    /// The assigned team has zero linked bookings on the date.
    NoBookings,
    /// The derived view reports a different team than the assignment store.
    TeamMismatch,
    /// The consistency check itself could not run.
    CheckFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidationIssue {
    pub staff_id: Option<String>,
    pub team_id: Option<String>,
    pub kind: IssueKind,
    pub message: String,
}

/// Outcome of one reconciliation pass. Built fresh on every pass and never
/// mutated; warnings never block, errors mean the two views actively
/// disagree.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidationReport {
    pub date: NaiveDate,
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Ground-truth assignment set the pass ran against.
    pub assignments: Vec<AssignmentRecord>,
    /// Per-staff booking counts from the derived view.
    pub booking_counts: HashMap<String, i64>,
    pub checked_at: NaiveDateTime,
}

impl ValidationReport {
    /// Report for a pass that could not reach the store: a single
    /// non-blocking warning, so an already-committed mutation is never
    /// failed retroactively by an unreachable validator.
    pub fn check_failed(date: NaiveDate, reason: impl Into<String>) -> Self {
        ValidationReport {
            date,
            is_valid: true,
            errors: Vec::new(),
            warnings: vec![ValidationIssue {
                staff_id: None,
                team_id: None,
                kind: IssueKind::CheckFailed,
                message: format!("consistency check could not run: {}", reason.into()),
            }],
            assignments: Vec::new(),
            booking_counts: HashMap::new(),
            checked_at: Utc::now().naive_utc(),
        }
    }
}

/// Compare the assignment store against the derived booking-linkage view for
/// one date. Reads ground truth from the store, never the session cache.
pub async fn validate(
    store: &dyn AssignmentStore,
    date: NaiveDate,
) -> Result<ValidationReport, StoreError> {
    let assignments = store.list(date, None).await?;
    let staff_ids: Vec<String> = assignments.iter().map(|a| a.staff_id.clone()).collect();
    let summaries = store.summarize(&staff_ids, date).await?;

    let by_staff: HashMap<&str, _> = summaries
        .iter()
        .map(|s| (s.staff_id.as_str(), s))
        .collect();

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut booking_counts = HashMap::new();

    for assignment in &assignments {
        match by_staff.get(assignment.staff_id.as_str()) {
            // No derived row yet: downstream generation may simply not have
            // caught up, so this is a warning, not an error.
            None => warnings.push(ValidationIssue {
                staff_id: Some(assignment.staff_id.clone()),
                team_id: Some(assignment.team_id.clone()),
                kind: IssueKind::MissingSummary,
                message: format!(
                    "assignment found for staff {} but no summary data on {}",
                    assignment.staff_id, date
                ),
            }),
            Some(summary) => {
                if summary.team_id.as_deref() != Some(assignment.team_id.as_str()) {
                    errors.push(ValidationIssue {
                        staff_id: Some(assignment.staff_id.clone()),
                        team_id: Some(assignment.team_id.clone()),
                        kind: IssueKind::TeamMismatch,
                        message: format!(
                            "team mismatch for staff {}: assigned to {} but derived view reports {}",
                            assignment.staff_id,
                            assignment.team_id,
                            summary.team_id.as_deref().unwrap_or("no team")
                        ),
                    });
                }
                booking_counts.insert(assignment.staff_id.clone(), summary.booking_count);
                if summary.booking_count == 0 {
                    warnings.push(ValidationIssue {
                        staff_id: Some(assignment.staff_id.clone()),
                        team_id: Some(assignment.team_id.clone()),
                        kind: IssueKind::NoBookings,
                        message: format!(
                            "staff {} assigned to team {} which has no bookings on {}",
                            assignment.staff_id, assignment.team_id, date
                        ),
                    });
                }
            }
        }
    }

    Ok(ValidationReport {
        date,
        is_valid: errors.is_empty(),
        errors,
        warnings,
        assignments,
        booking_counts,
        checked_at: Utc::now().naive_utc(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::assignment::StaffDaySummary;
    use crate::engine::store::InMemoryAssignmentStore;
    use rstest::rstest;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    #[tokio::test]
    async fn it_should_warn_but_not_error_on_a_zero_booking_team() {
        let store = InMemoryAssignmentStore::new();
        store.assign("s1", "team-9", date()).await.unwrap();

        let report = validate(&store, date()).await.unwrap();

        assert!(report.is_valid);
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].kind, IssueKind::NoBookings);
        assert!(report.warnings[0].message.contains("s1"));
        assert_eq!(report.booking_counts.get("s1"), Some(&0));
    }

    #[tokio::test]
    async fn it_should_error_when_the_derived_view_reports_another_team() {
        let store = InMemoryAssignmentStore::new();
        store.assign("s1", "team-1", date()).await.unwrap();
        store
            .override_summary(
                "s1",
                date(),
                Some(StaffDaySummary {
                    staff_id: "s1".into(),
                    team_id: Some("team-2".into()),
                    booking_count: 3,
                }),
            )
            .await;

        let report = validate(&store, date()).await.unwrap();

        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, IssueKind::TeamMismatch);
        assert!(report.errors[0].message.contains("team-1"));
        assert!(report.errors[0].message.contains("team-2"));
    }

    #[tokio::test]
    async fn it_should_warn_when_summary_data_is_missing() {
        let store = InMemoryAssignmentStore::new();
        store.assign("s1", "team-1", date()).await.unwrap();
        store.override_summary("s1", date(), None).await;

        let report = validate(&store, date()).await.unwrap();

        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].kind, IssueKind::MissingSummary);
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    #[tokio::test]
    async fn it_should_pass_clean_when_bookings_exist(#[case] booking_count: usize) {
        let store = InMemoryAssignmentStore::new();
        store.assign("s1", "team-3", date()).await.unwrap();
        let bookings = (0..booking_count).map(|i| format!("b{i}")).collect();
        store.set_bookings("team-3", date(), bookings).await;

        let report = validate(&store, date()).await.unwrap();

        assert!(report.is_valid);
        assert!(report.warnings.is_empty());
        assert_eq!(report.booking_counts.get("s1"), Some(&(booking_count as i64)));
    }

    #[tokio::test]
    async fn it_should_produce_an_empty_valid_report_for_an_empty_date() {
        let store = InMemoryAssignmentStore::new();
        let report = validate(&store, date()).await.unwrap();
        assert!(report.is_valid);
        assert!(report.assignments.is_empty());
        assert!(report.warnings.is_empty());
    }
}
