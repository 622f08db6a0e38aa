//! Durable record of content hashes that have already been ingested.
//!
//! The ledger is a single JSON array of hash strings on disk. Every mutation
//! rewrites the whole file through a temp-file-then-rename swap so a crash
//! mid-write never leaves a truncated ledger behind. Chunk-level entries are
//! namespaced with a `chunk:` prefix so they can never collide with document
//! hashes.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

const CHUNK_PREFIX: &str = "chunk:";

pub struct IngestionLedger {
    path: PathBuf,
    entries: Mutex<HashSet<String>>,
}

impl IngestionLedger {
    /// Open a ledger at `path`, loading existing entries. A missing file is
    /// an empty ledger; a malformed file is an error rather than silent data
    /// loss.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read ledger {}", path.display()))?;
            let hashes: Vec<String> = serde_json::from_str(&raw)
                .with_context(|| format!("ledger {} is not a JSON array of strings", path.display()))?;
            hashes.into_iter().collect()
        } else {
            HashSet::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn contains(&self, document_hash: &str) -> bool {
        self.lock().contains(document_hash)
    }

    pub fn contains_chunk(&self, chunk_hash: &str) -> bool {
        self.lock().contains(&format!("{CHUNK_PREFIX}{chunk_hash}"))
    }

    /// Record a document hash and persist. Returns false if it was already
    /// present (and skips the disk write).
    pub fn record(&self, document_hash: &str) -> Result<bool> {
        self.record_raw(document_hash.to_string())
    }

    pub fn record_chunk(&self, chunk_hash: &str) -> Result<bool> {
        self.record_raw(format!("{CHUNK_PREFIX}{chunk_hash}"))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn record_raw(&self, entry: String) -> Result<bool> {
        // The lock is held across the write-and-swap: concurrent writers
        // share one temp path, so an unserialized persist could rename a
        // stale snapshot over a newer one or steal another writer's temp
        // file mid-swap.
        let mut entries = self.lock();
        if !entries.insert(entry.clone()) {
            return Ok(false);
        }
        let mut all: Vec<String> = entries.iter().cloned().collect();
        all.sort();
        if let Err(err) = self.persist(&all) {
            entries.remove(&entry);
            return Err(err);
        }
        Ok(true)
    }

    fn persist(&self, entries: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("failed to write ledger temp file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to swap ledger into {}", self.path.display()))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // A poisoned ledger mutex means a panic mid-insert; the set itself is
        // still coherent, so recover the guard.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = IngestionLedger::open(dir.path().join("ledger.json")).unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.contains("abc"));
    }

    #[test]
    fn test_record_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let ledger = IngestionLedger::open(&path).unwrap();
        assert!(ledger.record("doc1").unwrap());
        assert!(!ledger.record("doc1").unwrap());
        assert!(ledger.record_chunk("c1").unwrap());

        let reopened = IngestionLedger::open(&path).unwrap();
        assert!(reopened.contains("doc1"));
        assert!(reopened.contains_chunk("c1"));
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_chunk_namespace_does_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = IngestionLedger::open(dir.path().join("ledger.json")).unwrap();
        ledger.record("samehash").unwrap();
        assert!(!ledger.contains_chunk("samehash"));
        ledger.record_chunk("samehash").unwrap();
        assert!(ledger.contains("samehash"));
        assert!(ledger.contains_chunk("samehash"));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_file_is_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = IngestionLedger::open(&path).unwrap();
        ledger.record("b").unwrap();
        ledger.record("a").unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let parsed: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "{not json").unwrap();
        assert!(IngestionLedger::open(&path).is_err());
    }

    #[test]
    fn test_concurrent_records_persist_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = IngestionLedger::open(&path).unwrap();

        std::thread::scope(|scope| {
            for i in 0..64 {
                let ledger = &ledger;
                scope.spawn(move || {
                    ledger.record(&format!("hash-{i}")).unwrap();
                });
            }
        });

        let reopened = IngestionLedger::open(&path).unwrap();
        assert_eq!(reopened.len(), 64);
        for i in 0..64 {
            assert!(reopened.contains(&format!("hash-{i}")));
        }
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("ledger.json");
        let ledger = IngestionLedger::open(&path).unwrap();
        ledger.record("x").unwrap();
        assert!(path.exists());
    }
}
