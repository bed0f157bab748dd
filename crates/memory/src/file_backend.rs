//! File-based state store — persistent JSON-lines storage.
//!
//! Each line is a JSON-encoded `StoredRecord`. Saving a record with an
//! existing `(kind, id)` replaces it.
//!
//! Storage location: `~/.taskwright/state/records.jsonl` unless configured.
//!
//! This backend is simple, portable, human-inspectable, and needs no
//! database.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskwright_core::error::StoreError;
use taskwright_core::store::{RecordKind, StateStore, StoreQuery, StoredRecord};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::in_memory::run_query;

/// A file-backed store using JSONL (one JSON object per line).
///
/// Records are loaded into memory on creation and flushed to disk on every
/// save. This gives fast reads with durable writes.
pub struct JsonFileStore {
    path: PathBuf,
    records: Arc<RwLock<HashMap<(RecordKind, String), StoredRecord>>>,
}

impl JsonFileStore {
    /// Create a new file-backed store at the given path.
    ///
    /// If the file exists, records are loaded from it.
    /// If the file does not exist, starts empty (file created on first write).
    pub fn new(path: PathBuf) -> Self {
        let records = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = records.len(), "File state store loaded");
        Self {
            path,
            records: Arc::new(RwLock::new(records)),
        }
    }

    /// Default path: `~/.taskwright/state/records.jsonl`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".taskwright")
            .join("state")
            .join("records.jsonl")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load records from a JSONL file. Later lines win for the same key.
    fn load_from_disk(path: &Path) -> HashMap<(RecordKind, String), StoredRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return HashMap::new(), // not created yet
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<StoredRecord>(line) {
                Ok(record) => Some(((record.kind, record.id.clone()), record)),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted state record");
                    None
                }
            })
            .collect()
    }

    /// Flush all records to disk as JSONL.
    async fn flush(&self) -> Result<(), StoreError> {
        let records = self.records.read().await;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("Failed to create state directory: {e}")))?;
        }

        let mut ordered: Vec<&StoredRecord> = records.values().collect();
        ordered.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));

        let mut content = String::new();
        for record in ordered {
            let line = serde_json::to_string(record)
                .map_err(|e| StoreError::Serialization(format!("Failed to serialize record: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(&self.path, &content)
            .map_err(|e| StoreError::Storage(format!("Failed to write state file: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn save(&self, record: StoredRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert((record.kind, record.id.clone()), record);
        self.flush().await
    }

    async fn load(&self, kind: RecordKind, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.records.read().await.get(&(kind, id.to_string())).cloned())
    }

    async fn query(&self, query: StoreQuery) -> Result<Vec<StoredRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(run_query(records.values(), &query))
    }
}
