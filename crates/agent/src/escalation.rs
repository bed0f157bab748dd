//! Escalation gates — suspension points waiting on a human decision.
//!
//! A gate is created once per trigger and resolved at most once. Waiters
//! subscribe to a `watch` channel, so an `await` never polls and wakes as
//! soon as the gate is resolved. A wait that times out leaves the gate
//! pending for later manual resolution.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskwright_core::error::GateError;
use taskwright_core::event::{DomainEvent, EventBus};
use taskwright_core::gate::{GateDecision, GateId, GateRecord, GateScope, GateStatus};
use taskwright_core::store::{RecordKind, StateStore, StoredRecord};
use taskwright_core::task::ProjectId;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct GateEntry {
    record: GateRecord,
    status: watch::Sender<GateStatus>,
}

/// The resolution a waiter receives.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub decision: GateDecision,
    pub payload: Option<serde_json::Value>,
}

/// Registry of escalation gates shared by every loop and the orchestrator.
pub struct EscalationGates {
    gates: RwLock<HashMap<GateId, GateEntry>>,
    event_bus: Arc<EventBus>,
    store: Option<Arc<dyn StateStore>>,
}

impl EscalationGates {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            gates: RwLock::new(HashMap::new()),
            event_bus,
            store: None,
        }
    }

    /// Persist gates on create and resolve.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    async fn persist(&self, record: &GateRecord) {
        let Some(store) = &self.store else {
            return;
        };
        let saved = match StoredRecord::encode(
            RecordKind::Gate,
            record.gate_id.0.clone(),
            Some(record.scope.project_id().clone()),
            record,
        ) {
            Ok(stored) => store.save(stored).await,
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            warn!(gate_id = %record.gate_id, error = %e, "Failed to persist escalation gate");
        }
    }

    /// Open a new pending gate.
    pub async fn create(&self, scope: GateScope, reason: impl Into<String>, context: serde_json::Value) -> GateId {
        let record = GateRecord::pending(scope, reason, context);
        let gate_id = record.gate_id.clone();
        let (status, _) = watch::channel(GateStatus::Pending);
        let event = DomainEvent::GateOpened {
            gate_id: gate_id.clone(),
            project_id: record.scope.project_id().clone(),
            reason: record.reason.clone(),
            timestamp: Utc::now(),
        };
        info!(gate_id = %gate_id, project_id = %record.scope.project_id(), reason = %record.reason, "Escalation gate opened");
        self.persist(&record).await;

        // Registered before announcing, so a subscriber can resolve it at once.
        self.gates
            .write()
            .await
            .insert(gate_id.clone(), GateEntry { record, status });
        self.event_bus.publish(event);
        gate_id
    }

    /// Resolve a pending gate. A second resolution is an invalid-state error.
    pub async fn resolve(
        &self,
        gate_id: &GateId,
        decision: GateDecision,
        payload: Option<serde_json::Value>,
    ) -> Result<GateRecord, GateError> {
        let record = {
            let mut gates = self.gates.write().await;
            let entry = gates
                .get_mut(gate_id)
                .ok_or_else(|| GateError::NotFound(gate_id.0.clone()))?;
            if !entry.record.is_pending() {
                return Err(GateError::InvalidState {
                    gate_id: gate_id.0.clone(),
                    status: entry.record.status.to_string(),
                });
            }
            entry.record.status = decision.into();
            entry.record.resolution_payload = payload;
            entry.record.resolved_at = Some(Utc::now());
            entry.status.send_replace(entry.record.status);
            entry.record.clone()
        };

        info!(gate_id = %gate_id, decision = ?decision, "Escalation gate resolved");
        self.event_bus.publish(DomainEvent::GateResolved {
            gate_id: gate_id.clone(),
            decision,
            timestamp: Utc::now(),
        });
        self.persist(&record).await;
        Ok(record)
    }

    /// Wait for a gate's resolution, up to `timeout`.
    pub async fn await_resolution(
        &self,
        gate_id: &GateId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Resolution, GateError> {
        let mut receiver = {
            let gates = self.gates.read().await;
            let entry = gates.get(gate_id).ok_or_else(|| GateError::NotFound(gate_id.0.clone()))?;
            entry.status.subscribe()
        };

        // The watch guard must not outlive the wait, or the future stops being `Send`.
        let resolved = async { receiver.wait_for(|s| *s != GateStatus::Pending).await.map(|_| ()) };
        let waited = tokio::select! {
            _ = cancel.cancelled() => return Err(GateError::Cancelled(gate_id.0.clone())),
            waited = tokio::time::timeout(timeout, resolved) => waited,
        };

        match waited {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => return Err(GateError::NotFound(gate_id.0.clone())),
            Err(_) => {
                warn!(gate_id = %gate_id, timeout_secs = timeout.as_secs(), "Escalation gate unresolved before timeout");
                return Err(GateError::TimedOut {
                    gate_id: gate_id.0.clone(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        }

        let record = self.get(gate_id).await.ok_or_else(|| GateError::NotFound(gate_id.0.clone()))?;
        let decision = match record.status {
            GateStatus::Approved => GateDecision::Approved,
            GateStatus::Rejected => GateDecision::Rejected,
            GateStatus::Pending => {
                return Err(GateError::InvalidState {
                    gate_id: gate_id.0.clone(),
                    status: record.status.to_string(),
                });
            }
        };
        Ok(Resolution {
            decision,
            payload: record.resolution_payload,
        })
    }

    pub async fn get(&self, gate_id: &GateId) -> Option<GateRecord> {
        self.gates.read().await.get(gate_id).map(|e| e.record.clone())
    }

    /// All gates, oldest first, optionally filtered by status.
    pub async fn list(&self, status: Option<GateStatus>) -> Vec<GateRecord> {
        let mut records: Vec<GateRecord> = self
            .gates
            .read()
            .await
            .values()
            .filter(|e| status.is_none_or(|s| e.record.status == s))
            .map(|e| e.record.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Pending gates scoped to `project_id` (task or project scope).
    pub async fn pending_for_project(&self, project_id: &ProjectId) -> Vec<GateRecord> {
        self.list(Some(GateStatus::Pending))
            .await
            .into_iter()
            .filter(|r| r.scope.project_id() == project_id)
            .collect()
    }
}
