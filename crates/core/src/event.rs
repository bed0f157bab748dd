//! Domain event system — decoupled communication between components.
//!
//! Events are published when something interesting happens in the engine.
//! Other components (and operators) can subscribe without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::gate::{GateDecision, GateId};
use crate::task::{ProjectId, TaskId, TaskStatus};

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An agent loop picked up a task
    TaskStarted {
        task_id: TaskId,
        project_id: ProjectId,
        agent_type: String,
        timestamp: DateTime<Utc>,
    },

    /// A step was appended to a task's history
    StepRecorded {
        task_id: TaskId,
        step_number: u32,
        success: bool,
        progress: f64,
        timestamp: DateTime<Utc>,
    },

    /// The loop detector fired
    LoopDetected {
        task_id: TaskId,
        category: String,
        timestamp: DateTime<Utc>,
    },

    /// An escalation gate was opened
    GateOpened {
        gate_id: GateId,
        project_id: ProjectId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An escalation gate was resolved
    GateResolved {
        gate_id: GateId,
        decision: GateDecision,
        timestamp: DateTime<Utc>,
    },

    /// An agent loop stopped
    TaskFinished {
        task_id: TaskId,
        project_id: ProjectId,
        status: TaskStatus,
        steps: usize,
        timestamp: DateTime<Utc>,
    },

    /// The orchestrator decided what happens next in a project
    DecisionMade {
        project_id: ProjectId,
        decision: String,
        defaulted: bool,
        timestamp: DateTime<Utc>,
    },

    /// A project changed lifecycle state
    ProjectStateChanged {
        project_id: ProjectId,
        state: String,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::LoopDetected {
            task_id: TaskId::from("t1"),
            category: "unknown-tool".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::LoopDetected { task_id, category, .. } => {
                assert_eq!(task_id, &TaskId::from("t1"));
                assert_eq!(category, "unknown-tool");
            }
            _ => panic!("Expected LoopDetected event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ErrorOccurred {
            context: "test".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
