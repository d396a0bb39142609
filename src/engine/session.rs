use crate::db::models::assignment::AssignmentRecord;
use crate::engine::cache::DayRoster;
use crate::engine::feed::ChangeFeedHub;
use crate::engine::oplog::{OperationLog, OperationLogEntry};
use crate::engine::store::{AssignmentStore, StoreError};
use crate::engine::validator::{self, ValidationReport};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Steps of one assignment mutation, logged to the operation trail as the
/// workflow moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    OptimisticApplied,
    RemoteCommitting,
    RemoteFailed,
    RemoteCommitted,
    PostValidating,
}

impl fmt::Display for MutationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MutationPhase::OptimisticApplied => "optimistic update applied",
            MutationPhase::RemoteCommitting => "committing to remote store",
            MutationPhase::RemoteFailed => "remote commit failed",
            MutationPhase::RemoteCommitted => "remote commit succeeded",
            MutationPhase::PostValidating => "running post-commit validation",
        };
        f.write_str(label)
    }
}

/// Terminal result of one assignment mutation, named by what happened to
/// the cache.
#[derive(Debug)]
pub enum MutationOutcome {
    /// Remote commit succeeded and the consistency check found no errors
    /// (warnings tolerated).
    Settled(ValidationReport),
    /// Remote commit succeeded but the consistency check found errors. The
    /// cache keeps the new value: the remote write stands, and reverting
    /// locally would misrepresent server state.
    SettledWithIssues(ValidationReport),
    /// Remote commit failed; the cache was restored to its pre-mutation
    /// snapshot and the session is back to idle.
    RolledBack(StoreError),
    /// The active date changed mid-flight; settling/validation was abandoned
    /// and no late result was applied.
    Cancelled,
}

/// User-facing events the UI layer renders as toasts/banners.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionNotice {
    RosterReloaded {
        date: NaiveDate,
        records: usize,
    },
    RefreshFailed {
        date: NaiveDate,
        message: String,
    },
    MutationFailed {
        staff_id: String,
        conflict: bool,
        message: String,
    },
    MutationSettled {
        staff_id: String,
        warnings: usize,
    },
    /// The operation itself succeeded; the follow-up consistency check did
    /// not come back clean.
    ConsistencyIssues {
        date: NaiveDate,
        errors: usize,
        warnings: usize,
    },
}

/// One UI session working a single active date: owns the roster cache,
/// serializes same-staff mutations, runs the settle-then-validate workflow
/// and reacts to change feed events. Constructed explicitly with its store
/// handle; there is no process-wide instance.
pub struct AssignmentSession {
    id: Uuid,
    store: Arc<dyn AssignmentStore>,
    roster: Mutex<DayRoster>,
    oplog: OperationLog,
    staff_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    settle_delay: Duration,
    cancel: Mutex<CancellationToken>,
    last_report: Mutex<Option<ValidationReport>>,
    notices: broadcast::Sender<SessionNotice>,
}

impl AssignmentSession {
    pub fn new(store: Arc<dyn AssignmentStore>, date: NaiveDate, settle_delay: Duration) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self {
            id: Uuid::new_v4(),
            store,
            roster: Mutex::new(DayRoster::new(date)),
            oplog: OperationLog::new(),
            staff_locks: Mutex::new(HashMap::new()),
            settle_delay,
            cancel: Mutex::new(CancellationToken::new()),
            last_report: Mutex::new(None),
            notices,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn date(&self) -> NaiveDate {
        self.roster.lock().await.date()
    }

    pub async fn roster_snapshot(&self) -> Vec<AssignmentRecord> {
        self.roster.lock().await.snapshot()
    }

    /// Revision channel of the underlying cache; bumps on every mutation.
    pub async fn subscribe_roster(&self) -> watch::Receiver<u64> {
        self.roster.lock().await.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub async fn last_report(&self) -> Option<ValidationReport> {
        self.last_report.lock().await.clone()
    }

    pub async fn operation_trail(&self) -> Vec<OperationLogEntry> {
        self.oplog.snapshot().await
    }

    /// Replace the cache with a freshly fetched set. A fetch failure leaves
    /// an empty, error-reported roster; it never propagates to the caller.
    pub async fn refresh(&self) {
        let date = self.date().await;
        match self.store.list(date, None).await {
            Ok(records) => {
                let count = records.len();
                let mut roster = self.roster.lock().await;
                if roster.date() != date {
                    return; // date switched while the fetch was in flight
                }
                roster.replace_all(records);
                drop(roster);
                self.oplog
                    .record(format!("reloaded {count} assignments for {date}"))
                    .await;
                self.notify(SessionNotice::RosterReloaded {
                    date,
                    records: count,
                });
            }
            Err(e) => {
                let mut roster = self.roster.lock().await;
                if roster.date() != date {
                    return;
                }
                roster.clear();
                drop(roster);
                tracing::warn!(session = %self.id, %date, "roster reload failed: {e}");
                self.oplog
                    .record(format!("reload failed for {date}: {e}"))
                    .await;
                self.notify(SessionNotice::RefreshFailed {
                    date,
                    message: e.to_string(),
                });
            }
        }
    }

    /// Run a reconciliation pass now and retain its report, unless the date
    /// switched while it ran.
    pub async fn revalidate(&self) -> ValidationReport {
        let token = self.current_token().await;
        let date = self.date().await;
        let report = match validator::validate(self.store.as_ref(), date).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(session = %self.id, %date, "validation pass failed: {e}");
                ValidationReport::check_failed(date, e.to_string())
            }
        };
        if token.is_cancelled() {
            return report;
        }
        self.retain_report(&report).await;
        report
    }

    /// Assign a staff member to a team on the active date.
    ///
    /// The settling delay between commit and validation is a bounded wait
    /// for downstream booking linkage, not a guarantee; a pass that runs
    /// before linkage lands reports warnings, not errors.
    pub async fn assign(&self, staff_id: &str, team_id: &str) -> MutationOutcome {
        self.mutate(staff_id, Some(team_id)).await
    }

    /// Take a staff member off their team on the active date.
    pub async fn unassign(&self, staff_id: &str) -> MutationOutcome {
        self.mutate(staff_id, None).await
    }

    async fn mutate(&self, staff_id: &str, new_team_id: Option<&str>) -> MutationOutcome {
        let token = self.current_token().await;

        // Same-staff mutations wait for the in-flight one's terminal state;
        // different staff proceed concurrently.
        let lock = self.staff_lock(staff_id).await;
        let _guard = lock.lock().await;

        let (date, transaction) = {
            let mut roster = self.roster.lock().await;
            let date = roster.date();
            (date, roster.apply_optimistic(staff_id, new_team_id))
        };
        self.trace(staff_id, MutationPhase::OptimisticApplied).await;

        self.trace(staff_id, MutationPhase::RemoteCommitting).await;
        let result = match new_team_id {
            Some(team_id) => self.store.assign(staff_id, team_id, date).await,
            None => self.store.remove(staff_id, date).await,
        };

        if let Err(error) = result {
            self.trace(staff_id, MutationPhase::RemoteFailed).await;
            let mut roster = self.roster.lock().await;
            if roster.date() == date {
                roster.rollback(transaction);
            }
            drop(roster);
            self.oplog
                .record(format!("rolled back optimistic update for {staff_id}: {error}"))
                .await;
            self.notify(SessionNotice::MutationFailed {
                staff_id: staff_id.to_string(),
                conflict: error.is_conflict(),
                message: error.to_string(),
            });
            return MutationOutcome::RolledBack(error);
        }
        self.trace(staff_id, MutationPhase::RemoteCommitted).await;

        // Bounded settling wait for downstream linkage generation.
        tokio::select! {
            _ = token.cancelled() => {
                self.oplog
                    .record(format!("abandoned settling for {staff_id}: date switched"))
                    .await;
                return MutationOutcome::Cancelled;
            }
            _ = tokio::time::sleep(self.settle_delay) => {}
        }

        self.trace(staff_id, MutationPhase::PostValidating).await;
        let report = match validator::validate(self.store.as_ref(), date).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(session = %self.id, %date, "post-commit validation failed: {e}");
                ValidationReport::check_failed(date, e.to_string())
            }
        };

        if token.is_cancelled() {
            // The roster now belongs to another date; drop the late result.
            return MutationOutcome::Cancelled;
        }
        self.retain_report(&report).await;

        if report.errors.is_empty() {
            self.oplog
                .record(format!(
                    "settled mutation for {staff_id} ({} warnings)",
                    report.warnings.len()
                ))
                .await;
            self.notify(SessionNotice::MutationSettled {
                staff_id: staff_id.to_string(),
                warnings: report.warnings.len(),
            });
            MutationOutcome::Settled(report)
        } else {
            // The remote commit stands; surface the divergence instead of
            // lying about server state by undoing the cache.
            self.oplog
                .record(format!(
                    "mutation for {staff_id} committed but validation found {} errors",
                    report.errors.len()
                ))
                .await;
            self.notify(SessionNotice::ConsistencyIssues {
                date,
                errors: report.errors.len(),
                warnings: report.warnings.len(),
            });
            MutationOutcome::SettledWithIssues(report)
        }
    }

    /// Point the session at another date: cancels in-flight settling,
    /// validation and feed listeners for the old date, then reloads.
    pub async fn switch_date(&self, date: NaiveDate) {
        {
            let mut cancel = self.cancel.lock().await;
            cancel.cancel();
            *cancel = CancellationToken::new();
        }
        {
            let mut roster = self.roster.lock().await;
            roster.reset_for(date);
        }
        self.oplog
            .record(format!("switched active date to {date}"))
            .await;
        self.refresh().await;
    }

    /// Cancel everything in flight; called when the session ends.
    pub async fn shutdown(&self) {
        self.cancel.lock().await.cancel();
    }

    /// Listen for remote changes to the active date: any event triggers a
    /// full reload plus re-validation, regardless of which actor caused it.
    /// Duplicate or out-of-order deliveries are harmless since a reload is
    /// always a full resync. The binding ends when the session's date
    /// switches or the binding is detached/dropped.
    pub async fn attach_feed(session: &Arc<Self>, hub: &ChangeFeedHub) -> FeedBinding {
        let date = session.date().await;
        let mut receiver = hub.subscribe(date);
        let token = session.current_token().await;
        let session = Arc::clone(session);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    change = receiver.recv() => match change {
                        Ok(change) => {
                            session
                                .oplog
                                .record(format!(
                                    "remote {:?} for {} on {date}, resyncing",
                                    change.event_type, change.staff_id
                                ))
                                .await;
                            session.refresh().await;
                            session.revalidate().await;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            // Missed notifications; a full resync covers them.
                            session.refresh().await;
                            session.revalidate().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        FeedBinding { handle }
    }

    async fn retain_report(&self, report: &ValidationReport) {
        *self.last_report.lock().await = Some(report.clone());
    }

    async fn current_token(&self) -> CancellationToken {
        self.cancel.lock().await.clone()
    }

    async fn staff_lock(&self, staff_id: &str) -> Arc<Mutex<()>> {
        self.staff_locks
            .lock()
            .await
            .entry(staff_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn trace(&self, staff_id: &str, phase: MutationPhase) {
        self.oplog.record(format!("{staff_id}: {phase}")).await;
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is fine; notices are fire-and-forget.
        let _ = self.notices.send(notice);
    }
}

/// Handle for a running change feed listener. Dropping or detaching it
/// stops the listener task, so subscriptions never outlive their date view.
pub struct FeedBinding {
    handle: JoinHandle<()>,
}

impl FeedBinding {
    pub fn detach(self) {
        self.handle.abort();
    }
}

impl Drop for FeedBinding {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
