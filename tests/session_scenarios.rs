//! End-to-end workflow tests for the assignment session: optimistic update,
//! remote commit, settling, post-validation, rollback, cross-session
//! conflicts and change feed resync, all against the in-memory store.

use chrono::NaiveDate;
use crewsync::db::models::audit::ChangeType;
use crewsync::engine::feed::{AssignmentChange, ChangeEventType, ChangeFeedHub};
use crewsync::engine::session::{AssignmentSession, MutationOutcome, SessionNotice};
use crewsync::engine::store::{AssignmentStore, InMemoryAssignmentStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

const SETTLE: Duration = Duration::from_millis(10);

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
}

fn new_session(store: &Arc<InMemoryAssignmentStore>) -> Arc<AssignmentSession> {
    let store: Arc<dyn AssignmentStore> = store.clone();
    Arc::new(AssignmentSession::new(store, date(), SETTLE))
}

#[tokio::test]
async fn scenario_a_assign_with_bookings_settles_clean() {
    let store = Arc::new(InMemoryAssignmentStore::new());
    store
        .set_bookings("team-3", date(), vec!["b1".into(), "b2".into()])
        .await;
    let session = new_session(&store);
    session.refresh().await;

    let outcome = session.assign("s1", "team-3").await;

    match outcome {
        MutationOutcome::Settled(report) => {
            assert!(report.is_valid);
            assert!(report.warnings.is_empty());
            assert_eq!(report.booking_counts.get("s1"), Some(&2));
        }
        other => panic!("expected Settled, got {other:?}"),
    }
    assert_eq!(
        session.roster_snapshot().await[0].team_id,
        "team-3".to_string()
    );
    assert_eq!(store.team_for("s1", date()).await.as_deref(), Some("team-3"));

    let transitions = store.transitions().await;
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].change_type, ChangeType::Assign);
}

#[tokio::test]
async fn scenario_b_transport_failure_rolls_the_cache_back() {
    let store = Arc::new(InMemoryAssignmentStore::new());
    let session = new_session(&store);
    session.refresh().await;
    let mut notices = session.subscribe_notices();

    store
        .fail_next_mutation(StoreError::Transport("backend unreachable".into()))
        .await;
    let outcome = session.assign("s1", "team-3").await;

    match outcome {
        MutationOutcome::RolledBack(StoreError::Transport(_)) => {}
        other => panic!("expected RolledBack(Transport), got {other:?}"),
    }
    // s1 had no prior assignment, so the rollback restores "absent".
    assert!(session.roster_snapshot().await.is_empty());
    assert!(store.team_for("s1", date()).await.is_none());

    let notice = notices.recv().await.unwrap();
    match notice {
        SessionNotice::MutationFailed {
            staff_id, conflict, ..
        } => {
            assert_eq!(staff_id, "s1");
            assert!(!conflict);
        }
        other => panic!("expected MutationFailed, got {other:?}"),
    }

    // Back to idle: the next mutation for the same staff member proceeds.
    let outcome = session.assign("s1", "team-3").await;
    assert!(matches!(outcome, MutationOutcome::Settled(_)));
}

#[tokio::test]
async fn scenario_c_zero_booking_team_settles_with_a_warning() {
    let store = Arc::new(InMemoryAssignmentStore::new());
    let session = new_session(&store);
    session.refresh().await;

    let outcome = session.assign("s1", "team-9").await;

    match outcome {
        MutationOutcome::Settled(report) => {
            assert!(report.is_valid);
            assert_eq!(report.warnings.len(), 1);
            assert!(report.warnings[0].message.contains("s1"));
        }
        other => panic!("expected Settled with warnings, got {other:?}"),
    }
    // Warnings never undo the cache.
    assert_eq!(session.roster_snapshot().await.len(), 1);
}

#[tokio::test]
async fn scenario_d_losing_session_rolls_back_then_feed_corrects_it() {
    let store = Arc::new(InMemoryAssignmentStore::new());
    store.assign("s1", "team-1", date()).await.unwrap();

    let hub = ChangeFeedHub::new();
    let winner = new_session(&store);
    let loser = new_session(&store);
    winner.refresh().await;
    loser.refresh().await;
    let _binding = AssignmentSession::attach_feed(&loser, &hub).await;

    // The winning session's remove commits first.
    let outcome = winner.unassign("s1").await;
    assert!(matches!(outcome, MutationOutcome::Settled(_)));

    // The losing session's remove hits a row that is already gone.
    let outcome = loser.unassign("s1").await;
    match outcome {
        MutationOutcome::RolledBack(StoreError::Conflict { staff_id, .. }) => {
            assert_eq!(staff_id, "s1");
        }
        other => panic!("expected RolledBack(Conflict), got {other:?}"),
    }
    // Rollback restores the loser's pre-mutation view: s1 still assigned.
    assert_eq!(loser.roster_snapshot().await.len(), 1);

    // The winner's change propagates over the feed and corrects the loser.
    hub.publish(AssignmentChange {
        event_type: ChangeEventType::Delete,
        staff_id: "s1".into(),
        date: date(),
    });
    for _ in 0..100 {
        if loser.roster_snapshot().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(loser.roster_snapshot().await.is_empty());
}

#[tokio::test]
async fn committed_mutation_with_divergent_view_keeps_the_cache() {
    let store = Arc::new(InMemoryAssignmentStore::new());
    store
        .override_summary(
            "s1",
            date(),
            Some(crewsync::db::models::assignment::StaffDaySummary {
                staff_id: "s1".into(),
                team_id: Some("team-2".into()),
                booking_count: 4,
            }),
        )
        .await;
    let session = new_session(&store);
    session.refresh().await;

    let outcome = session.assign("s1", "team-1").await;

    match outcome {
        MutationOutcome::SettledWithIssues(report) => {
            assert!(!report.is_valid);
            assert_eq!(report.errors.len(), 1);
        }
        other => panic!("expected SettledWithIssues, got {other:?}"),
    }
    // The remote commit stands, so the cache keeps the new assignment.
    assert_eq!(session.roster_snapshot().await[0].team_id, "team-1");
    assert_eq!(store.team_for("s1", date()).await.as_deref(), Some("team-1"));
}

#[tokio::test]
async fn switching_dates_cancels_the_inflight_validation() {
    let store = Arc::new(InMemoryAssignmentStore::new());
    let session = Arc::new(AssignmentSession::new(
        Arc::clone(&store) as Arc<dyn AssignmentStore>,
        date(),
        Duration::from_millis(300),
    ));
    session.refresh().await;

    let worker = Arc::clone(&session);
    let inflight = tokio::spawn(async move { worker.assign("s1", "team-3").await });

    // Let the mutation commit and enter its settling wait, then switch away.
    tokio::time::sleep(Duration::from_millis(50)).await;
    session
        .switch_date(NaiveDate::from_ymd_opt(2025, 6, 11).unwrap())
        .await;

    let outcome = inflight.await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Cancelled));
    // No late validation result may land on the reloaded roster.
    assert!(session.last_report().await.is_none());
    assert_eq!(session.date().await, NaiveDate::from_ymd_opt(2025, 6, 11).unwrap());
}

#[tokio::test]
async fn reloading_twice_without_mutations_is_idempotent() {
    let store = Arc::new(InMemoryAssignmentStore::new());
    store.assign("s1", "team-1", date()).await.unwrap();
    store.assign("s2", "team-2", date()).await.unwrap();
    let session = new_session(&store);

    session.refresh().await;
    let first = session.roster_snapshot().await;
    session.refresh().await;
    let second = session.roster_snapshot().await;

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[tokio::test]
async fn same_staff_mutations_serialize_in_request_order() {
    let store = Arc::new(InMemoryAssignmentStore::new());
    store.set_bookings("team-2", date(), vec!["b1".into()]).await;
    let session = new_session(&store);
    session.refresh().await;

    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.assign("s1", "team-1").await })
    };
    // Give the first mutation time to take the staff lock.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.assign("s1", "team-2").await })
    };

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert!(matches!(first, MutationOutcome::Settled(_)));
    assert!(matches!(second, MutationOutcome::Settled(_)));

    // The second request ran after the first reached its terminal state.
    assert_eq!(store.team_for("s1", date()).await.as_deref(), Some("team-2"));
    assert_eq!(session.roster_snapshot().await[0].team_id, "team-2");

    let transitions = store.transitions().await;
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[1].change_type, ChangeType::Move);
    assert_eq!(transitions[1].old_team_id.as_deref(), Some("team-1"));
}

#[tokio::test]
async fn feed_events_trigger_reload_and_revalidation() {
    let store = Arc::new(InMemoryAssignmentStore::new());
    store.set_bookings("team-1", date(), vec!["b1".into()]).await;
    let hub = ChangeFeedHub::new();
    let session = new_session(&store);
    session.refresh().await;
    let _binding = AssignmentSession::attach_feed(&session, &hub).await;
    assert!(session.last_report().await.is_none());

    // Another actor writes directly to the store, then the feed announces it.
    store.assign("s2", "team-1", date()).await.unwrap();
    hub.publish(AssignmentChange {
        event_type: ChangeEventType::Insert,
        staff_id: "s2".into(),
        date: date(),
    });

    for _ in 0..100 {
        if session.last_report().await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let report = session.last_report().await.expect("revalidation should have run");
    assert!(report.is_valid);
    assert_eq!(session.roster_snapshot().await.len(), 1);
    assert_eq!(session.roster_snapshot().await[0].staff_id, "s2");
}

#[tokio::test]
async fn failed_reload_reports_and_leaves_an_empty_roster() {
    let store = Arc::new(InMemoryAssignmentStore::new());
    store.assign("s1", "team-1", date()).await.unwrap();
    let session = new_session(&store);
    session.refresh().await;
    assert_eq!(session.roster_snapshot().await.len(), 1);
    let mut notices = session.subscribe_notices();

    store
        .fail_next_list(StoreError::Transport("backend unreachable".into()))
        .await;
    session.refresh().await;

    // A failed fetch never propagates; the roster is emptied and reported.
    assert!(session.roster_snapshot().await.is_empty());
    match notices.recv().await.unwrap() {
        SessionNotice::RefreshFailed { message, .. } => {
            assert!(message.contains("backend unreachable"));
        }
        other => panic!("expected RefreshFailed, got {other:?}"),
    }

    // The next successful reload recovers the full set.
    session.refresh().await;
    assert_eq!(session.roster_snapshot().await.len(), 1);
}
