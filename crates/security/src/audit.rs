//! Audit logging — structured tool-invocation logging.
//!
//! Every call through the [`crate::AuditedInvoker`] produces one entry; its
//! id is the `audit_ref` returned to the caller. Only the most recent
//! entries stay in memory; sinks see all of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Entries kept in memory unless configured otherwise.
pub const DEFAULT_RETENTION: usize = 10_000;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Requester id (agent id or "orchestrator")
    pub actor: String,
    /// Requester agent type
    pub role: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A tool operation was executed
    ToolInvocation { tool_name: String, operation: String },
    /// A tool call was rejected by policy
    ToolDenied { tool_name: String, operation: String },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Trait for audit log sinks (where events are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Audit logger keeping entries in memory and forwarding them to sinks.
pub struct AuditLogger {
    entries: Mutex<VecDeque<AuditEntry>>,
    retention: usize,
    sinks: Vec<Box<dyn AuditSink>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("retention", &self.retention)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            retention: DEFAULT_RETENTION,
            sinks,
            next_id: AtomicU64::new(1),
        }
    }

    /// Keep at most `retention` entries in memory, dropping the oldest.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    // A panicking sink must not disable auditing for everyone else.
    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an audit event and return its reference.
    pub fn log(
        &self,
        event: AuditEvent,
        actor: &str,
        role: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) -> String {
        let id = format!("audit-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = AuditEntry {
            id: id.clone(),
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            role: role.into(),
            outcome,
            details,
        };

        {
            let mut entries = self.lock();
            if entries.len() >= self.retention {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        for sink in &self.sinks {
            sink.record(&entry);
        }
        id
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Look up one entry by its reference.
    pub fn get(&self, id: &str) -> Option<AuditEntry> {
        self.lock().iter().find(|e| e.id == id).cloned()
    }

    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.lock().iter().filter(|e| &e.outcome == outcome).cloned().collect()
    }

    /// Count of retained entries.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Entries logged since creation, retained or not.
    pub fn total_logged(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - 1
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            audit_ref = %entry.id,
            event = ?entry.event,
            actor = %entry.actor,
            role = %entry.role,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}
