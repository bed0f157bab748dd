//! Project artifact store and the `artifacts` tool.
//!
//! Artifacts are named text blobs shared by every task in a project. Agents
//! and the orchestrator reach them only through the tool surface, so every
//! read sees the current content.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use taskwright_core::error::ToolError;
use taskwright_core::task::ProjectId;
use taskwright_core::tool::{ARTIFACT_TOOL, Tool, ToolOutput};
use tokio::sync::RwLock;
use tracing::debug;

/// Per-project artifact storage. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct ArtifactStore {
    projects: Arc<RwLock<HashMap<ProjectId, BTreeMap<String, String>>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write (or overwrite) an artifact.
    pub async fn write(&self, project_id: &ProjectId, name: &str, content: &str) {
        self.projects
            .write()
            .await
            .entry(project_id.clone())
            .or_default()
            .insert(name.to_string(), content.to_string());
    }

    pub async fn read(&self, project_id: &ProjectId, name: &str) -> Option<String> {
        self.projects
            .read()
            .await
            .get(project_id)
            .and_then(|artifacts| artifacts.get(name).cloned())
    }

    /// Artifact names in a project, sorted.
    pub async fn list(&self, project_id: &ProjectId) -> Vec<String> {
        self.projects
            .read()
            .await
            .get(project_id)
            .map(|artifacts| artifacts.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Exposes an [`ArtifactStore`] as the `artifacts` tool.
///
/// Operations:
/// - `read {project_id, name}` → `{name, content}`
/// - `write {project_id, name, content}` → `{name, bytes}` plus the written artifact
/// - `list {project_id}` → `{names}`
pub struct ArtifactTool {
    store: ArtifactStore,
}

impl ArtifactTool {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

fn required_str<'a>(parameters: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    parameters[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

#[async_trait]
impl Tool for ArtifactTool {
    fn name(&self) -> &str {
        ARTIFACT_TOOL
    }

    fn description(&self) -> &str {
        "Read, write and list the artifacts shared by every task in a project."
    }

    fn operations(&self) -> &[&str] {
        &["read", "write", "list"]
    }

    async fn execute(&self, operation: &str, parameters: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let project_id = ProjectId::from(required_str(&parameters, "project_id")?);

        match operation {
            "read" => {
                let name = required_str(&parameters, "name")?;
                let content = self.store.read(&project_id, name).await.ok_or_else(|| ToolError::ExecutionFailed {
                    tool_name: ARTIFACT_TOOL.into(),
                    reason: format!("artifact not found: {name}"),
                })?;
                Ok(ToolOutput::data(serde_json::json!({ "name": name, "content": content })))
            }
            "write" => {
                let name = required_str(&parameters, "name")?;
                let content = required_str(&parameters, "content")?;
                self.store.write(&project_id, name, content).await;
                debug!(project = %project_id, artifact = name, bytes = content.len(), "Artifact written");

                let mut artifacts = BTreeMap::new();
                artifacts.insert(name.to_string(), content.to_string());
                Ok(ToolOutput {
                    data: serde_json::json!({ "name": name, "bytes": content.len() }),
                    artifacts,
                })
            }
            "list" => {
                let names = self.store.list(&project_id).await;
                Ok(ToolOutput::data(serde_json::json!({ "names": names })))
            }
            other => Err(ToolError::InvalidArguments(format!("unsupported operation: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read() {
        let store = ArtifactStore::new();
        let tool = ArtifactTool::new(store.clone());

        let out = tool
            .execute(
                "write",
                serde_json::json!({"project_id": "p1", "name": "design.md", "content": "# Design"}),
            )
            .await
            .unwrap();
        assert_eq!(out.artifacts.get("design.md").map(String::as_str), Some("# Design"));

        let out = tool
            .execute("read", serde_json::json!({"project_id": "p1", "name": "design.md"}))
            .await
            .unwrap();
        assert_eq!(out.data["content"], "# Design");
        assert_eq!(store.read(&ProjectId::from("p1"), "design.md").await.as_deref(), Some("# Design"));
    }

    #[tokio::test]
    async fn projects_are_isolated() {
        let store = ArtifactStore::new();
        store.write(&ProjectId::from("p1"), "a.txt", "one").await;

        assert!(store.read(&ProjectId::from("p2"), "a.txt").await.is_none());
        assert!(store.list(&ProjectId::from("p2")).await.is_empty());
    }

    #[tokio::test]
    async fn list_is_sorted() {
        let store = ArtifactStore::new();
        let project = ProjectId::from("p1");
        store.write(&project, "b.txt", "").await;
        store.write(&project, "a.txt", "").await;

        let tool = ArtifactTool::new(store);
        let out = tool.execute("list", serde_json::json!({"project_id": "p1"})).await.unwrap();
        assert_eq!(out.data["names"], serde_json::json!(["a.txt", "b.txt"]));
    }

    #[tokio::test]
    async fn missing_artifact_is_an_error() {
        let tool = ArtifactTool::new(ArtifactStore::new());
        let err = tool
            .execute("read", serde_json::json!({"project_id": "p1", "name": "nope"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("artifact not found"));
    }

    #[tokio::test]
    async fn missing_arguments_are_rejected() {
        let tool = ArtifactTool::new(ArtifactStore::new());
        let err = tool.execute("write", serde_json::json!({"project_id": "p1"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
