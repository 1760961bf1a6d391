//! Backing stores for the trigger ledger.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::NamedTempFile;

use crate::domain::{BridgeError, Result, TriggerRecord};

/// Where the ledger keeps its records between process invocations.
///
/// `save` always receives the complete collection and must replace the
/// previous version as a whole.
pub trait LedgerStore: Send + Sync {
    fn load(&self) -> Result<Vec<TriggerRecord>>;

    fn save(&self, records: &[TriggerRecord]) -> Result<()>;

    /// Human readable location, used in logs.
    fn describe(&self) -> String;
}

impl<S: LedgerStore + ?Sized> LedgerStore for Arc<S> {
    fn load(&self) -> Result<Vec<TriggerRecord>> {
        (**self).load()
    }

    fn save(&self, records: &[TriggerRecord]) -> Result<()> {
        (**self).save(records)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Ledger persisted as one pretty-printed JSON array.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn corrupt(&self, reason: impl Into<String>) -> BridgeError {
        BridgeError::StoreCorrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<Vec<TriggerRecord>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BridgeError::Io(e)),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<TriggerRecord> =
            serde_json::from_str(&text).map_err(|e| self.corrupt(e.to_string()))?;

        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.trigger_id.clone()) {
                return Err(self.corrupt(format!(
                    "duplicate trigger id {}",
                    record.trigger_id
                )));
            }
            record.validate().map_err(|reason| self.corrupt(reason))?;
        }
        Ok(records)
    }

    fn save(&self, records: &[TriggerRecord]) -> Result<()> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_vec_pretty(records)?;

        // Write next to the target, then rename over it.
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Process-local store, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<TriggerRecord>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<TriggerRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Make every following save fail with an I/O error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Snapshot of what was last saved.
    pub fn saved(&self) -> Vec<TriggerRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Vec<TriggerRecord>> {
        Ok(self.saved())
    }

    fn save(&self, records: &[TriggerRecord]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated write failure",
            )));
        }
        *self.records.lock().unwrap_or_else(PoisonError::into_inner) = records.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cibridge_gateway::BuildParameters;

    fn record(job: &str) -> TriggerRecord {
        TriggerRecord::queued(job, BuildParameters::new(), 7)
    }

    #[test]
    fn test_missing_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nope.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_whitespace_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "  \n\t").unwrap();
        assert!(JsonFileStore::new(&path).load().unwrap().is_empty());
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("ledger.json");
        let store = JsonFileStore::new(&path);
        store.save(&[record("demo/build")]).unwrap();
        assert!(path.exists());
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "{not json").unwrap();
        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, BridgeError::StoreCorrupt { .. }));
    }

    #[test]
    fn test_duplicate_ids_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let one = record("demo/build");
        let store = JsonFileStore::new(&path);
        store.save(&[one.clone(), one]).unwrap();

        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("duplicate trigger id"));
    }

    #[test]
    fn test_memory_store_failures() {
        let store = MemoryStore::new();
        store.save(&[record("a")]).unwrap();
        store.set_fail_saves(true);
        assert!(store.save(&[]).is_err());
        assert_eq!(store.saved().len(), 1);
        assert_eq!(store.saves(), 1);
    }
}
