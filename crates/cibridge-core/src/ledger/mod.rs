//! The triggered-job ledger.
//!
//! Every trigger performed through cibridge gets one [`TriggerRecord`]
//! here. The ledger is owned explicitly (usually behind an `Arc`) and all
//! mutations go through one mutex: read the current record, compute the
//! next one, persist the full collection, then commit in memory. The lock
//! is never held across a call to the CI server.
//!
//! Saves are synchronous and may fsync. Async callers go through
//! [`blocking_write`] so a multi-threaded runtime moves other tasks off the
//! worker while the disk flushes.

mod store;
mod sync;

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info};

use crate::domain::{BridgeError, Observation, Result, TriggerId, TriggerRecord};

pub use store::{JsonFileStore, LedgerStore, MemoryStore};
pub use sync::{SyncFailure, SyncOptions, SyncReport};

pub struct TriggerLedger {
    store: Box<dyn LedgerStore>,
    records: Mutex<Vec<TriggerRecord>>,
}

impl TriggerLedger {
    /// Load the ledger from `store`.
    pub fn open(store: impl LedgerStore + 'static) -> Result<Self> {
        let records = store.load()?;
        info!(
            store = %store.describe(),
            records = records.len(),
            "trigger ledger loaded"
        );
        Ok(Self {
            store: Box::new(store),
            records: Mutex::new(records),
        })
    }

    pub fn open_file(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(JsonFileStore::new(path))
    }

    /// Ledger that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryStore::new()),
            records: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TriggerRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new record and persist.
    pub fn create(&self, record: TriggerRecord) -> Result<TriggerRecord> {
        let mut records = self.lock();
        if records.iter().any(|r| r.trigger_id == record.trigger_id) {
            return Err(BridgeError::ConcurrencyFault(format!(
                "trigger id {} already exists",
                record.trigger_id
            )));
        }

        let mut next = records.clone();
        next.push(record.clone());
        self.store.save(&next)?;
        *records = next;

        debug!(trigger_id = %record.trigger_id, job = %record.job_name, "trigger recorded");
        Ok(record)
    }

    pub fn get(&self, trigger_id: &TriggerId) -> Result<TriggerRecord> {
        self.lock()
            .iter()
            .find(|r| &r.trigger_id == trigger_id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("trigger {trigger_id}")))
    }

    /// All records, oldest trigger first.
    pub fn list(&self) -> Vec<TriggerRecord> {
        let mut records = self.lock().clone();
        records.sort_by_key(|r| r.triggered_at);
        records
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Apply `observation` to the current version of a record.
    ///
    /// The record is re-read under the lock, so concurrent observers never
    /// overwrite each other with stale snapshots. A failed save leaves the
    /// in-memory state untouched.
    pub fn record_observation(
        &self,
        trigger_id: &TriggerId,
        observation: Observation,
    ) -> Result<TriggerRecord> {
        let mut records = self.lock();
        let index = records
            .iter()
            .position(|r| &r.trigger_id == trigger_id)
            .ok_or_else(|| BridgeError::NotFound(format!("trigger {trigger_id}")))?;

        let previous = records[index].status;
        let updated = records[index].observe(observation, Utc::now());
        if updated == records[index] {
            return Ok(updated);
        }

        let mut next = records.clone();
        next[index] = updated.clone();
        self.store.save(&next)?;
        *records = next;

        if updated.status != previous {
            debug!(
                trigger_id = %trigger_id,
                from = %previous,
                to = %updated.status,
                build_number = ?updated.build_number,
                "trigger status changed"
            );
        }
        Ok(updated)
    }
}

/// Run a ledger write from async code.
///
/// On a multi-threaded runtime the write runs under `block_in_place`;
/// elsewhere (current-thread runtime, no runtime) it runs inline.
pub(crate) fn blocking_write<T>(write: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(write)
        }
        _ => write(),
    }
}

impl std::fmt::Debug for TriggerLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerLedger")
            .field("store", &self.store.describe())
            .field("records", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TriggerStatus;
    use chrono::Duration;
    use cibridge_gateway::BuildParameters;
    use std::sync::Arc;

    fn record_at(job: &str, offset_secs: i64) -> TriggerRecord {
        let at = Utc::now() + Duration::seconds(offset_secs);
        TriggerRecord::queued_at(job, BuildParameters::new(), 1, at)
    }

    #[test]
    fn test_create_and_get() {
        let ledger = TriggerLedger::in_memory();
        let record = ledger.create(record_at("demo/build", 0)).unwrap();
        assert_eq!(ledger.get(&record.trigger_id).unwrap(), record);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_duplicate_create_is_a_fault() {
        let ledger = TriggerLedger::in_memory();
        let record = ledger.create(record_at("demo/build", 0)).unwrap();
        let err = ledger.create(record).unwrap_err();
        assert!(matches!(err, BridgeError::ConcurrencyFault(_)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_unknown_trigger_is_not_found() {
        let ledger = TriggerLedger::in_memory();
        assert!(ledger.get(&TriggerId::new()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_is_oldest_first() {
        let ledger = TriggerLedger::in_memory();
        let newest = ledger.create(record_at("c", 10)).unwrap();
        let oldest = ledger.create(record_at("a", -10)).unwrap();
        let middle = ledger.create(record_at("b", 0)).unwrap();

        let ids: Vec<_> = ledger.list().into_iter().map(|r| r.trigger_id).collect();
        assert_eq!(
            ids,
            vec![oldest.trigger_id, middle.trigger_id, newest.trigger_id]
        );
    }

    #[test]
    fn test_failed_save_keeps_memory_state() {
        let store = Arc::new(MemoryStore::new());
        let ledger = TriggerLedger::open(store.clone()).unwrap();
        let record = ledger.create(record_at("demo/build", 0)).unwrap();

        store.set_fail_saves(true);
        let err = ledger
            .record_observation(
                &record.trigger_id,
                Observation::BuildAssigned { build_number: 5 },
            )
            .unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));

        let current = ledger.get(&record.trigger_id).unwrap();
        assert_eq!(current.status, TriggerStatus::Queued);
        assert!(current.build_number.is_none());

        assert!(ledger.create(record_at("other", 1)).is_err());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_terminal_observation_skips_save() {
        let store = Arc::new(MemoryStore::new());
        let ledger = TriggerLedger::open(store.clone()).unwrap();
        let record = ledger.create(record_at("demo/build", 0)).unwrap();
        ledger
            .record_observation(&record.trigger_id, Observation::QueueCancelled)
            .unwrap();
        let saves = store.saves();

        let again = ledger
            .record_observation(&record.trigger_id, Observation::StillQueued)
            .unwrap();
        assert_eq!(again.status, TriggerStatus::QueueCancelled);
        assert_eq!(store.saves(), saves);
    }

    #[test]
    fn test_open_picks_up_existing_records() {
        let seeded = record_at("demo/build", 0);
        let store = Arc::new(MemoryStore::with_records(vec![seeded.clone()]));
        let ledger = TriggerLedger::open(store.clone()).unwrap();
        assert_eq!(ledger.list(), vec![seeded.clone()]);

        let updated = ledger
            .record_observation(
                &seeded.trigger_id,
                Observation::BuildAssigned { build_number: 9 },
            )
            .unwrap();
        assert_eq!(updated.build_number, Some(9));
        assert_eq!(store.saved(), vec![updated]);
        assert_eq!(store.saves(), 1);
    }

    #[test]
    fn test_blocking_write_without_runtime_runs_inline() {
        let ledger = TriggerLedger::in_memory();
        let record = blocking_write(|| ledger.create(record_at("demo/build", 0))).unwrap();
        assert_eq!(ledger.get(&record.trigger_id).unwrap(), record);
    }
}
