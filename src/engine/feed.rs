use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const FEED_CHANNEL_CAPACITY: usize = 32;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeEventType {
    Insert,
    Update,
    Delete,
}

/// One remote row change on the assignment table, as announced on the push
/// channel. Delivery is at-least-once and possibly out of order; consumers
/// resync with a full reload, so duplicates are harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentChange {
    pub event_type: ChangeEventType,
    pub staff_id: String,
    pub date: NaiveDate,
}

/// Fan-out point between the push channel and the per-date sessions.
/// Each date gets its own broadcast channel, created on first subscribe.
pub struct ChangeFeedHub {
    channels: Mutex<HashMap<NaiveDate, broadcast::Sender<AssignmentChange>>>,
}

impl ChangeFeedHub {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, date: NaiveDate) -> broadcast::Receiver<AssignmentChange> {
        let mut channels = self.channels.lock().expect("feed hub lock poisoned");
        channels
            .entry(date)
            .or_insert_with(|| broadcast::channel(FEED_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn publish(&self, change: AssignmentChange) {
        let channels = self.channels.lock().expect("feed hub lock poisoned");
        if let Some(sender) = channels.get(&change.date) {
            // No receivers for the date is fine; nobody is viewing it.
            let _ = sender.send(change);
        }
    }
}

impl Default for ChangeFeedHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridge Postgres LISTEN/NOTIFY into the hub. The migration trigger emits
/// one JSON payload per row change on staff_assignments. Reconnects with a
/// fixed backoff; missed notifications during an outage are only recovered
/// by the next explicit refresh.
pub fn spawn_change_feed_pump(
    pool: PgPool,
    channel: String,
    hub: std::sync::Arc<ChangeFeedHub>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let mut listener = match PgListener::connect_with(&pool).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::warn!("change feed connect failed: {e}");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    continue;
                }
            };
            if let Err(e) = listener.listen(&channel).await {
                tracing::warn!("change feed LISTEN {channel} failed: {e}");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
            tracing::info!("change feed listening on {channel}");

            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match serde_json::from_str::<AssignmentChange>(notification.payload()) {
                            Ok(change) => hub.publish(change),
                            Err(e) => {
                                tracing::warn!(
                                    "unparseable change feed payload {:?}: {e}",
                                    notification.payload()
                                );
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("change feed connection lost: {e}");
                        break;
                    }
                }
            }
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    #[tokio::test]
    async fn it_should_deliver_changes_to_subscribers_of_the_same_date() {
        let hub = ChangeFeedHub::new();
        let mut rx = hub.subscribe(date());
        hub.publish(AssignmentChange {
            event_type: ChangeEventType::Delete,
            staff_id: "s1".into(),
            date: date(),
        });
        let change = rx.recv().await.unwrap();
        assert_eq!(change.staff_id, "s1");
        assert_eq!(change.event_type, ChangeEventType::Delete);
    }

    #[tokio::test]
    async fn it_should_not_cross_dates() {
        let hub = ChangeFeedHub::new();
        let other = NaiveDate::from_ymd_opt(2025, 6, 11).unwrap();
        let mut rx = hub.subscribe(other);
        hub.publish(AssignmentChange {
            event_type: ChangeEventType::Insert,
            staff_id: "s1".into(),
            date: date(),
        });
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn it_should_parse_the_trigger_payload() {
        let payload = r#"{"event_type":"delete","staff_id":"s1","date":"2025-06-10"}"#;
        let change: AssignmentChange = serde_json::from_str(payload).unwrap();
        assert_eq!(change.event_type, ChangeEventType::Delete);
        assert_eq!(change.date, date());
    }
}
