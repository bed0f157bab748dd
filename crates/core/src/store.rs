//! State store trait — the persistence boundary.
//!
//! Task states, steps, results, gates and project snapshots pass through a
//! [`StateStore`] as JSON payloads. The concrete technology is up to the
//! backend; the engine only needs `save`, `load` and `query`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::task::ProjectId;

/// The kind of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    TaskState,
    Step,
    TaskResult,
    Gate,
    Project,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordKind::TaskState => "task_state",
            RecordKind::Step => "step",
            RecordKind::TaskResult => "task_result",
            RecordKind::Gate => "gate",
            RecordKind::Project => "project",
        };
        f.write_str(s)
    }
}

/// A single stored record. `(kind, id)` is the key; saving again replaces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub kind: RecordKind,
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,

    pub payload: serde_json::Value,

    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Serialize `value` into a record.
    pub fn encode<T: Serialize>(
        kind: RecordKind,
        id: impl Into<String>,
        project_id: Option<ProjectId>,
        value: &T,
    ) -> Result<Self, StoreError> {
        let payload = serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self {
            kind,
            id: id.into(),
            project_id,
            payload,
            updated_at: Utc::now(),
        })
    }

    /// Deserialize the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// A query over stored records. Empty filters match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreQuery {
    #[serde(default)]
    pub kind: Option<RecordKind>,

    #[serde(default)]
    pub project_id: Option<ProjectId>,

    /// Maximum number of results (most recently updated first)
    #[serde(default)]
    pub limit: Option<usize>,
}

impl StoreQuery {
    pub fn kind(kind: RecordKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn in_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &StoredRecord) -> bool {
        self.kind.is_none_or(|k| k == record.kind)
            && self
                .project_id
                .as_ref()
                .is_none_or(|p| record.project_id.as_ref() == Some(p))
    }
}

/// The core StateStore trait.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The name of this backend (e.g., "in_memory", "file").
    fn name(&self) -> &str;

    /// Insert or replace a record.
    async fn save(&self, record: StoredRecord) -> Result<(), StoreError>;

    /// Load one record by key.
    async fn load(&self, kind: RecordKind, id: &str) -> Result<Option<StoredRecord>, StoreError>;

    /// Query records, most recently updated first.
    async fn query(&self, query: StoreQuery) -> Result<Vec<StoredRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_payload() {
        let rec = StoredRecord::encode(
            RecordKind::Project,
            "p1",
            Some(ProjectId::from("p1")),
            &serde_json::json!({"goal": "ship"}),
        )
        .unwrap();
        let value: serde_json::Value = rec.decode().unwrap();
        assert_eq!(value["goal"], "ship");
    }

    #[test]
    fn query_filters_by_kind_and_project() {
        let rec = StoredRecord::encode(RecordKind::Step, "s1", Some(ProjectId::from("p1")), &1).unwrap();
        assert!(StoreQuery::default().matches(&rec));
        assert!(StoreQuery::kind(RecordKind::Step).matches(&rec));
        assert!(!StoreQuery::kind(RecordKind::Gate).matches(&rec));
        assert!(!StoreQuery::kind(RecordKind::Step)
            .in_project(ProjectId::from("p2"))
            .matches(&rec));
    }
}
