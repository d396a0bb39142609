use crate::db::models::assignment::{
    AssignmentRecord, BulkAssignEntry, BulkAssignFailure, BulkAssignReport, StaffDaySummary,
};
use crate::db::models::audit::ChangeType;
use crate::db::queries::audit::{self, StaffNameCache};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// Failure modes of the remote assignment store. A conflict means the
/// backend rejected a concurrent modification of the same `(staff, date)`
/// row; everything else is a transport problem.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("assignment for {staff_id} on {date} was changed by another session")]
    Conflict { staff_id: String, date: NaiveDate },

    #[error("transport failure: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Typed façade over the remote assignment store. One method per remote
/// operation; no business logic lives here.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// All assignment records for a date, optionally narrowed to one team.
    async fn list(
        &self,
        date: NaiveDate,
        team_id: Option<&str>,
    ) -> Result<Vec<AssignmentRecord>, StoreError>;

    /// Put a staff member on a team for a date, superseding any prior
    /// assignment for that `(staff, date)`.
    async fn assign(
        &self,
        staff_id: &str,
        team_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError>;

    /// Take a staff member off whatever team they are on for a date.
    async fn remove(&self, staff_id: &str, date: NaiveDate) -> Result<(), StoreError>;

    /// The derived booking-linkage view for the given staff ids.
    async fn summarize(
        &self,
        staff_ids: &[String],
        date: NaiveDate,
    ) -> Result<Vec<StaffDaySummary>, StoreError>;

    /// Best-effort batch assign: failed entries are reported, the rest
    /// commit independently.
    async fn bulk_assign(&self, entries: &[BulkAssignEntry]) -> Result<BulkAssignReport, StoreError> {
        let mut assigned = 0;
        let mut failed = Vec::new();
        for entry in entries {
            match self.assign(&entry.staff_id, &entry.team_id, entry.date).await {
                Ok(()) => assigned += 1,
                Err(e) => failed.push(BulkAssignFailure {
                    staff_id: entry.staff_id.clone(),
                    date: entry.date,
                    reason: e.to_string(),
                }),
            }
        }
        Ok(BulkAssignReport { assigned, failed })
    }
}

fn map_sqlx_err(e: sqlx::Error, staff_id: &str, date: NaiveDate) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if let Some(code) = db_err.code() {
            // 23505 unique violation, 40001 serialization failure
            if code == "23505" || code == "40001" {
                return StoreError::Conflict {
                    staff_id: staff_id.to_string(),
                    date,
                };
            }
        }
    }
    StoreError::Transport(e.to_string())
}

/// Production store backed by Postgres. Audit transitions are recorded
/// best-effort after each committed mutation; an audit failure never fails
/// the mutation itself.
#[derive(Clone)]
pub struct PgAssignmentStore {
    pool: PgPool,
    names: StaffNameCache,
}

impl PgAssignmentStore {
    pub fn new(pool: PgPool, names: StaffNameCache) -> Self {
        Self { pool, names }
    }

    async fn record_audit(
        &self,
        change_type: ChangeType,
        staff_id: &str,
        old_team_id: Option<&str>,
        new_team_id: Option<&str>,
        date: NaiveDate,
    ) {
        if let Err(e) = audit::record_transition(
            &self.pool,
            &self.names,
            staff_id,
            old_team_id,
            new_team_id,
            date,
            change_type,
        )
        .await
        {
            tracing::warn!(staff_id, %date, "failed to record audit transition: {e}");
        }
    }
}

#[async_trait]
impl AssignmentStore for PgAssignmentStore {
    async fn list(
        &self,
        date: NaiveDate,
        team_id: Option<&str>,
    ) -> Result<Vec<AssignmentRecord>, StoreError> {
        let result = match team_id {
            Some(team_id) => {
                sqlx::query_as::<_, AssignmentRecord>(
                    r#"
                    SELECT staff_id, team_id, assignment_date AS date, assigned_at
                    FROM staff_assignments
                    WHERE assignment_date = $1 AND team_id = $2
                    ORDER BY staff_id
                    "#,
                )
                .bind(date)
                .bind(team_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, AssignmentRecord>(
                    r#"
                    SELECT staff_id, team_id, assignment_date AS date, assigned_at
                    FROM staff_assignments
                    WHERE assignment_date = $1
                    ORDER BY staff_id
                    "#,
                )
                .bind(date)
                .fetch_all(&self.pool)
                .await
            }
        };
        result.map_err(|e| StoreError::Transport(e.to_string()))
    }

    async fn assign(
        &self,
        staff_id: &str,
        team_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let old_team: Option<String> = sqlx::query_scalar(
            "DELETE FROM staff_assignments WHERE staff_id = $1 AND assignment_date = $2 RETURNING team_id",
        )
        .bind(staff_id)
        .bind(date)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_err(e, staff_id, date))?;

        // A concurrent insert between the delete and this insert trips the
        // (staff_id, assignment_date) primary key and surfaces as a conflict.
        sqlx::query(
            "INSERT INTO staff_assignments (staff_id, team_id, assignment_date) VALUES ($1, $2, $3)",
        )
        .bind(staff_id)
        .bind(team_id)
        .bind(date)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_err(e, staff_id, date))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_err(e, staff_id, date))?;

        let change_type = match old_team.as_deref() {
            Some(old) if old != team_id => ChangeType::Move,
            _ => ChangeType::Assign,
        };
        self.record_audit(
            change_type,
            staff_id,
            old_team.as_deref(),
            Some(team_id),
            date,
        )
        .await;

        Ok(())
    }

    async fn remove(&self, staff_id: &str, date: NaiveDate) -> Result<(), StoreError> {
        let old_team: Option<String> = sqlx::query_scalar(
            "DELETE FROM staff_assignments WHERE staff_id = $1 AND assignment_date = $2 RETURNING team_id",
        )
        .bind(staff_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, staff_id, date))?;

        match old_team {
            // Nothing matched: another session already removed or moved it.
            None => Err(StoreError::Conflict {
                staff_id: staff_id.to_string(),
                date,
            }),
            Some(old) => {
                self.record_audit(ChangeType::Remove, staff_id, Some(&old), None, date)
                    .await;
                Ok(())
            }
        }
    }

    async fn summarize(
        &self,
        staff_ids: &[String],
        date: NaiveDate,
    ) -> Result<Vec<StaffDaySummary>, StoreError> {
        if staff_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, StaffDaySummary>(
            r#"
            SELECT sa.staff_id, sa.team_id, COUNT(tb.booking_id)::BIGINT AS booking_count
            FROM staff_assignments sa
            LEFT JOIN team_bookings tb
                ON tb.team_id = sa.team_id AND tb.booking_date = sa.assignment_date
            WHERE sa.assignment_date = $1 AND sa.staff_id = ANY($2)
            GROUP BY sa.staff_id, sa.team_id
            ORDER BY sa.staff_id
            "#,
        )
        .bind(date)
        .bind(staff_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Transport(e.to_string()))
    }
}

/// One committed transition, as seen by the in-memory store. Mirrors what
/// the Postgres impl writes to the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransition {
    pub change_type: ChangeType,
    pub staff_id: String,
    pub old_team_id: Option<String>,
    pub new_team_id: Option<String>,
    pub date: NaiveDate,
}

/// In-memory store for tests and local development. Booking linkage and
/// summary rows can be staged independently of the assignment rows, so
/// divergence between the two views is reproducible on demand.
#[derive(Default)]
pub struct InMemoryAssignmentStore {
    rows: RwLock<HashMap<(String, NaiveDate), String>>,
    bookings: RwLock<HashMap<(String, NaiveDate), Vec<String>>>,
    // staff/date -> Some(row) replaces the derived row, None hides it
    summary_overrides: RwLock<HashMap<(String, NaiveDate), Option<StaffDaySummary>>>,
    fail_next: Mutex<Option<StoreError>>,
    fail_next_list: Mutex<Option<StoreError>>,
    transitions: Mutex<Vec<RecordedTransition>>,
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the booking linkage for a team on a date.
    pub async fn set_bookings(&self, team_id: &str, date: NaiveDate, booking_ids: Vec<String>) {
        self.bookings
            .write()
            .await
            .insert((team_id.to_string(), date), booking_ids);
    }

    /// Force the derived view for one staff id: `Some(summary)` replaces the
    /// computed row, `None` drops it entirely (no summary data).
    pub async fn override_summary(
        &self,
        staff_id: &str,
        date: NaiveDate,
        summary: Option<StaffDaySummary>,
    ) {
        self.summary_overrides
            .write()
            .await
            .insert((staff_id.to_string(), date), summary);
    }

    /// Make the next mutation fail with the given error.
    pub async fn fail_next_mutation(&self, error: StoreError) {
        *self.fail_next.lock().await = Some(error);
    }

    /// Make the next list fetch fail with the given error.
    pub async fn fail_next_list(&self, error: StoreError) {
        *self.fail_next_list.lock().await = Some(error);
    }

    pub async fn transitions(&self) -> Vec<RecordedTransition> {
        self.transitions.lock().await.clone()
    }

    pub async fn team_for(&self, staff_id: &str, date: NaiveDate) -> Option<String> {
        self.rows
            .read()
            .await
            .get(&(staff_id.to_string(), date))
            .cloned()
    }

    async fn take_injected_failure(&self) -> Option<StoreError> {
        self.fail_next.lock().await.take()
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn list(
        &self,
        date: NaiveDate,
        team_id: Option<&str>,
    ) -> Result<Vec<AssignmentRecord>, StoreError> {
        if let Some(error) = self.fail_next_list.lock().await.take() {
            return Err(error);
        }
        let rows = self.rows.read().await;
        let mut records = Vec::new();
        for ((staff_id, row_date), team) in rows.iter() {
            if *row_date != date {
                continue;
            }
            if let Some(filter) = team_id {
                if filter != team.as_str() {
                    continue;
                }
            }
            records.push(AssignmentRecord {
                staff_id: staff_id.clone(),
                team_id: team.clone(),
                date,
                assigned_at: None,
            });
        }
        records.sort_by(|a, b| a.staff_id.cmp(&b.staff_id));
        Ok(records)
    }

    async fn assign(
        &self,
        staff_id: &str,
        team_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        if let Some(error) = self.take_injected_failure().await {
            return Err(error);
        }
        let old_team = self
            .rows
            .write()
            .await
            .insert((staff_id.to_string(), date), team_id.to_string());
        let change_type = match old_team.as_deref() {
            Some(old) if old != team_id => ChangeType::Move,
            _ => ChangeType::Assign,
        };
        self.transitions.lock().await.push(RecordedTransition {
            change_type,
            staff_id: staff_id.to_string(),
            old_team_id: old_team,
            new_team_id: Some(team_id.to_string()),
            date,
        });
        Ok(())
    }

    async fn remove(&self, staff_id: &str, date: NaiveDate) -> Result<(), StoreError> {
        if let Some(error) = self.take_injected_failure().await {
            return Err(error);
        }
        let old_team = self.rows.write().await.remove(&(staff_id.to_string(), date));
        match old_team {
            None => Err(StoreError::Conflict {
                staff_id: staff_id.to_string(),
                date,
            }),
            Some(old) => {
                self.transitions.lock().await.push(RecordedTransition {
                    change_type: ChangeType::Remove,
                    staff_id: staff_id.to_string(),
                    old_team_id: Some(old),
                    new_team_id: None,
                    date,
                });
                Ok(())
            }
        }
    }

    async fn summarize(
        &self,
        staff_ids: &[String],
        date: NaiveDate,
    ) -> Result<Vec<StaffDaySummary>, StoreError> {
        let rows = self.rows.read().await;
        let bookings = self.bookings.read().await;
        let overrides = self.summary_overrides.read().await;

        let mut summaries = Vec::new();
        for staff_id in staff_ids {
            if let Some(forced) = overrides.get(&(staff_id.clone(), date)) {
                if let Some(summary) = forced {
                    summaries.push(summary.clone());
                }
                continue;
            }
            if let Some(team_id) = rows.get(&(staff_id.clone(), date)) {
                let booking_count = bookings
                    .get(&(team_id.clone(), date))
                    .map(|ids| ids.len() as i64)
                    .unwrap_or(0);
                summaries.push(StaffDaySummary {
                    staff_id: staff_id.clone(),
                    team_id: Some(team_id.clone()),
                    booking_count,
                });
            }
        }
        summaries.sort_by(|a, b| a.staff_id.cmp(&b.staff_id));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    #[tokio::test]
    async fn it_should_supersede_a_prior_assignment_and_record_a_move() {
        let store = InMemoryAssignmentStore::new();
        store.assign("s1", "team-1", date()).await.unwrap();
        store.assign("s1", "team-2", date()).await.unwrap();

        let records = store.list(date(), None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].team_id, "team-2");

        let transitions = store.transitions().await;
        assert_eq!(transitions[1].change_type, ChangeType::Move);
        assert_eq!(transitions[1].old_team_id.as_deref(), Some("team-1"));
    }

    #[tokio::test]
    async fn it_should_report_a_conflict_when_removing_a_missing_row() {
        let store = InMemoryAssignmentStore::new();
        store.assign("s1", "team-1", date()).await.unwrap();
        store.remove("s1", date()).await.unwrap();

        let err = store.remove("s1", date()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn it_should_count_staged_bookings_in_the_summary() {
        let store = InMemoryAssignmentStore::new();
        store.assign("s1", "team-1", date()).await.unwrap();
        store
            .set_bookings("team-1", date(), vec!["b1".into(), "b2".into()])
            .await;

        let summaries = store.summarize(&["s1".to_string()], date()).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].booking_count, 2);
        assert_eq!(summaries[0].team_id.as_deref(), Some("team-1"));
    }

    #[tokio::test]
    async fn it_should_continue_past_failures_in_a_bulk_assign() {
        let store = InMemoryAssignmentStore::new();
        store
            .fail_next_mutation(StoreError::Transport("backend unreachable".into()))
            .await;
        let entries = vec![
            BulkAssignEntry {
                staff_id: "s1".into(),
                team_id: "team-1".into(),
                date: date(),
            },
            BulkAssignEntry {
                staff_id: "s2".into(),
                team_id: "team-1".into(),
                date: date(),
            },
        ];

        let report = store.bulk_assign(&entries).await.unwrap();
        assert_eq!(report.assigned, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].staff_id, "s1");
    }
}
