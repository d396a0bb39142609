use chrono::{NaiveDateTime, Utc};
use serde::Serialize;

/// Keep only the most recent entries; older ones fall off the front.
const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct OperationLogEntry {
    pub at: NaiveDateTime,
    pub message: String,
}

/// Bounded in-memory trail of the session's most recent operational steps.
/// Diagnostic only, never persisted.
pub struct OperationLog {
    entries: tokio::sync::Mutex<Vec<OperationLogEntry>>,
    capacity: usize,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: tokio::sync::Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, message: impl Into<String>) {
        let mut entries = self.entries.lock().await;
        entries.push(OperationLogEntry {
            at: Utc::now().naive_utc(),
            message: message.into(),
        });
        if entries.len() > self.capacity {
            entries.remove(0);
        }
    }

    pub async fn snapshot(&self) -> Vec<OperationLogEntry> {
        self.entries.lock().await.clone()
    }
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn it_should_keep_only_the_most_recent_entries() {
        let log = OperationLog::new();
        for i in 0..15 {
            log.record(format!("step {i}")).await;
        }
        let entries = log.snapshot().await;
        assert_eq!(entries.len(), 10);
        assert_eq!(entries.first().unwrap().message, "step 5");
        assert_eq!(entries.last().unwrap().message, "step 14");
    }

    #[tokio::test]
    async fn it_should_preserve_insertion_order() {
        let log = OperationLog::with_capacity(3);
        log.record("a").await;
        log.record("b").await;
        log.record("c").await;
        let messages: Vec<_> = log
            .snapshot()
            .await
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["a", "b", "c"]);
    }
}
