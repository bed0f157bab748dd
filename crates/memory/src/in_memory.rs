//! In-memory state store — useful for testing and ephemeral runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use taskwright_core::error::StoreError;
use taskwright_core::store::{RecordKind, StateStore, StoreQuery, StoredRecord};
use tokio::sync::RwLock;

/// An in-memory store keyed by `(kind, id)`.
/// Useful for testing and runs where persistence isn't needed.
pub struct InMemoryStore {
    records: Arc<RwLock<HashMap<(RecordKind, String), StoredRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter, order newest-first, and truncate.
pub(crate) fn run_query<'a>(
    records: impl Iterator<Item = &'a StoredRecord>,
    query: &StoreQuery,
) -> Vec<StoredRecord> {
    let mut results: Vec<StoredRecord> = records.filter(|r| query.matches(r)).cloned().collect();
    results.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    if let Some(limit) = query.limit {
        results.truncate(limit);
    }
    results
}

#[async_trait]
impl StateStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save(&self, record: StoredRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert((record.kind, record.id.clone()), record);
        Ok(())
    }

    async fn load(&self, kind: RecordKind, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.records.read().await.get(&(kind, id.to_string())).cloned())
    }

    async fn query(&self, query: StoreQuery) -> Result<Vec<StoredRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(run_query(records.values(), &query))
    }
}
