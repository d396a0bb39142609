use crate::config::Config;
use crate::db::queries::audit::StaffNameCache;
use crate::engine::feed::ChangeFeedHub;
use crate::engine::session::AssignmentSession;
use crate::engine::store::{AssignmentStore, PgAssignmentStore};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, Query, State};
use axum::response::IntoResponse;
use axum::{routing::get, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

/// Register the websocket session route
pub fn session_routes() -> Router<PgPool> {
    Router::new().route("/assignments/session", get(open_session))
}

#[derive(Debug, Deserialize)]
pub struct SessionParams {
    date: NaiveDate,
}

/// Commands a connected client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum SessionCommand {
    Assign { staff_id: String, team_id: String },
    Remove { staff_id: String },
    Refresh,
    Validate,
    SwitchDate { date: NaiveDate },
}

/// Upgrade to a websocket hosting one [`AssignmentSession`] for the
/// requested date. The socket streams roster snapshots, notices and
/// validation reports; mutations run through the full optimistic
/// commit-settle-validate workflow.
async fn open_session(
    State(pool): State<PgPool>,
    Extension(hub): Extension<Arc<ChangeFeedHub>>,
    Extension(names): Extension<StaffNameCache>,
    Query(params): Query<SessionParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, pool, hub, names, params.date))
}

async fn run_session(
    mut socket: WebSocket,
    pool: PgPool,
    hub: Arc<ChangeFeedHub>,
    names: StaffNameCache,
    date: NaiveDate,
) {
    let config = Config::get();
    let store: Arc<dyn AssignmentStore> = Arc::new(PgAssignmentStore::new(pool, names));
    let session = Arc::new(AssignmentSession::new(store, date, config.settle_delay));
    tracing::info!(session = %session.id(), %date, "assignment session opened");

    session.refresh().await;
    let mut binding = AssignmentSession::attach_feed(&session, &hub).await;
    let mut notices = session.subscribe_notices();
    let mut revisions = session.subscribe_roster().await;
    revisions.borrow_and_update();

    if !send_roster(&mut socket, &session).await {
        session.shutdown().await;
        return;
    }
    let report = session.revalidate().await;
    let _ = send_json(&mut socket, json!({ "kind": "report", "report": report })).await;

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<SessionCommand>(text.as_str()) {
                        Ok(command) => {
                            if let Some(new_binding) =
                                dispatch(&session, &hub, &mut socket, command).await
                            {
                                binding.detach();
                                binding = new_binding;
                            }
                        }
                        Err(e) => {
                            let frame = json!({ "kind": "error", "message": format!("unrecognized command: {e}") });
                            if !send_json(&mut socket, frame).await {
                                break;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong/binary: nothing to do
                Some(Err(_)) => break,
            },
            notice = notices.recv() => {
                if let Ok(notice) = notice {
                    let frame = json!({ "kind": "notice", "notice": notice });
                    if !send_json(&mut socket, frame).await {
                        break;
                    }
                }
            },
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                revisions.borrow_and_update();
                if !send_roster(&mut socket, &session).await {
                    break;
                }
            }
        }
    }

    binding.detach();
    session.shutdown().await;
    tracing::info!(session = %session.id(), "assignment session closed");
}

/// Handle one command. Returns a replacement feed binding when the active
/// date changed.
async fn dispatch(
    session: &Arc<AssignmentSession>,
    hub: &Arc<ChangeFeedHub>,
    socket: &mut WebSocket,
    command: SessionCommand,
) -> Option<crate::engine::session::FeedBinding> {
    match command {
        SessionCommand::Assign { staff_id, team_id } => {
            // Run off the socket loop so the UI stays responsive through
            // the settling delay; the outcome arrives as notices.
            let session = Arc::clone(session);
            tokio::spawn(async move {
                session.assign(&staff_id, &team_id).await;
            });
            None
        }
        SessionCommand::Remove { staff_id } => {
            let session = Arc::clone(session);
            tokio::spawn(async move {
                session.unassign(&staff_id).await;
            });
            None
        }
        SessionCommand::Refresh => {
            session.refresh().await;
            None
        }
        SessionCommand::Validate => {
            let report = session.revalidate().await;
            let _ = send_json(socket, json!({ "kind": "report", "report": report })).await;
            None
        }
        SessionCommand::SwitchDate { date } => {
            session.switch_date(date).await;
            let binding = AssignmentSession::attach_feed(session, hub).await;
            Some(binding)
        }
    }
}

async fn send_roster(socket: &mut WebSocket, session: &Arc<AssignmentSession>) -> bool {
    let frame = json!({
        "kind": "roster",
        "date": session.date().await,
        "records": session.roster_snapshot().await,
    });
    send_json(socket, frame).await
}

async fn send_json(socket: &mut WebSocket, frame: serde_json::Value) -> bool {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .is_ok()
}
