use crate::db::models::assignment::AssignmentRecord;
use chrono::NaiveDate;
use std::collections::HashMap;
use tokio::sync::watch;

/// Snapshot of the cache state for one staff id, taken before an optimistic
/// mutation. Rolling back with it restores exactly the captured prior value.
#[derive(Debug, Clone)]
pub struct RosterTransaction {
    pub staff_id: String,
    pub previous: Option<AssignmentRecord>,
}

/// Session-held set of assignment records for one active date, keyed by
/// staff id. The map key carries the one-team-per-staff-per-date invariant;
/// inserting for a staff id always displaces any prior record.
///
/// Every mutation bumps a watch channel so the UI layer can re-render off
/// the cache without polling.
pub struct DayRoster {
    date: NaiveDate,
    records: HashMap<String, AssignmentRecord>,
    revision: watch::Sender<u64>,
}

impl DayRoster {
    pub fn new(date: NaiveDate) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            date,
            records: HashMap::new(),
            revision,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, staff_id: &str) -> Option<&AssignmentRecord> {
        self.records.get(staff_id)
    }

    /// Records sorted by staff id, for stable snapshots over the wire.
    pub fn snapshot(&self) -> Vec<AssignmentRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.staff_id.cmp(&b.staff_id));
        records
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Replace the whole set with a freshly fetched one (full reload).
    pub fn replace_all(&mut self, records: Vec<AssignmentRecord>) {
        self.records.clear();
        for record in records {
            self.records.insert(record.staff_id.clone(), record);
        }
        self.bump();
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.bump();
    }

    /// Empty the roster and point it at a new date (date switch).
    pub fn reset_for(&mut self, date: NaiveDate) {
        self.date = date;
        self.records.clear();
        self.bump();
    }

    /// Apply a mutation before the remote call completes. `Some(team)`
    /// supersedes any existing record for the staff id; `None` removes it.
    /// The returned transaction restores the prior state via [`rollback`].
    ///
    /// [`rollback`]: DayRoster::rollback
    pub fn apply_optimistic(
        &mut self,
        staff_id: &str,
        new_team_id: Option<&str>,
    ) -> RosterTransaction {
        let previous = self.records.remove(staff_id);
        if let Some(team_id) = new_team_id {
            self.records.insert(
                staff_id.to_string(),
                AssignmentRecord {
                    staff_id: staff_id.to_string(),
                    team_id: team_id.to_string(),
                    date: self.date,
                    assigned_at: None,
                },
            );
        }
        self.bump();
        RosterTransaction {
            staff_id: staff_id.to_string(),
            previous,
        }
    }

    /// Undo one optimistic mutation using the snapshot it returned.
    pub fn rollback(&mut self, transaction: RosterTransaction) {
        match transaction.previous {
            Some(record) => {
                self.records.insert(transaction.staff_id, record);
            }
            None => {
                self.records.remove(&transaction.staff_id);
            }
        }
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}
