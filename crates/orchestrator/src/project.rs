//! Project bookkeeping: lifecycle state, the priority task queue, and the
//! bounded history the orchestrator shows the advisor.

use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use taskwright_agent::TaskHandle;
use taskwright_core::gate::GateId;
use taskwright_core::state::TaskResult;
use taskwright_core::task::{ProjectId, Task, TaskId, TaskStatus};

/// Lifecycle of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProjectState {
    /// Accepting and running tasks
    Active,
    /// New task creation is blocked on a project gate
    Suspended { gate_id: GateId },
    /// Nothing queued, nothing running, and the advisor chose to wait
    Idle,
    /// Marked complete; terminal
    Completed { summary: Option<String> },
    /// A human rejected the project gate; terminal
    Halted { gate_id: GateId },
}

impl ProjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectState::Active => "active",
            ProjectState::Suspended { .. } => "suspended",
            ProjectState::Idle => "idle",
            ProjectState::Completed { .. } => "completed",
            ProjectState::Halted { .. } => "halted",
        }
    }

    /// Terminal states never accept tasks again.
    pub fn is_closed(&self) -> bool {
        matches!(self, ProjectState::Completed { .. } | ProjectState::Halted { .. })
    }

    /// Whether queued tasks may be started.
    pub fn can_dispatch(&self) -> bool {
        matches!(self, ProjectState::Active)
    }
}

/// What the orchestrator remembers about a finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub agent_type: String,
    pub goal: String,
    pub status: TaskStatus,
    pub reason: Option<String>,
    pub progress_score: f64,
    pub steps: usize,
    pub artifacts: Vec<String>,
}

impl TaskSummary {
    pub fn new(task: &Task, result: &TaskResult) -> Self {
        Self {
            task_id: task.task_id.clone(),
            agent_type: task.agent_type.clone(),
            goal: task.goal.clone(),
            status: result.status,
            reason: result.reason.clone(),
            progress_score: result.progress_score,
            steps: result.step_count(),
            artifacts: result.produced_artifacts.iter().cloned().collect(),
        }
    }
}

#[derive(Clone)]
struct Queued {
    priority: u8,
    seq: Reverse<u64>,
    task: Task,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

/// Highest priority first; FIFO among equal priorities.
#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn push(&mut self, task: Task) {
        let seq = Reverse(self.next_seq);
        self.next_seq += 1;
        self.heap.push(Queued {
            priority: task.priority,
            seq,
            task,
        });
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.heap.pop().map(|q| q.task)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Queued tasks in the order they will be popped.
    pub fn ordered(&self) -> Vec<Task> {
        let mut queued = self.heap.clone().into_sorted_vec();
        queued.reverse();
        queued.into_iter().map(|q| q.task).collect()
    }

    /// Drop every queued task, returning their ids.
    pub fn drain(&mut self) -> Vec<TaskId> {
        self.heap.drain().map(|q| q.task.task_id).collect()
    }
}

/// A task currently bound to an agent loop.
pub(crate) struct InFlight {
    pub agent_type: String,
    pub goal: String,
    pub handle: TaskHandle,
}

/// One project's mutable state, guarded by the orchestrator.
pub struct Project {
    pub project_id: ProjectId,
    pub goal: String,
    pub phase: Option<String>,
    pub state: ProjectState,
    pub(crate) queue: TaskQueue,
    pub(crate) in_flight: HashMap<TaskId, InFlight>,
    history: VecDeque<TaskSummary>,
    history_window: usize,
    pub tasks_completed: usize,
}

impl Project {
    pub fn new(project_id: ProjectId, goal: impl Into<String>, history_window: usize) -> Self {
        Self {
            project_id,
            goal: goal.into(),
            phase: None,
            state: ProjectState::Active,
            queue: TaskQueue::default(),
            in_flight: HashMap::new(),
            history: VecDeque::with_capacity(history_window),
            history_window,
            tasks_completed: 0,
        }
    }

    /// Record a completion, keeping only the last `history_window` summaries.
    pub fn remember(&mut self, summary: TaskSummary) {
        if self.history_window == 0 {
            return;
        }
        if self.history.len() == self.history_window {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    pub fn history(&self) -> impl Iterator<Item = &TaskSummary> {
        self.history.iter()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Nothing queued and nothing running.
    pub fn is_quiescent(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            project_id: self.project_id.clone(),
            goal: self.goal.clone(),
            phase: self.phase.clone(),
            state: self.state.clone(),
            queued: self.queue.len(),
            in_flight: self.in_flight.keys().cloned().collect(),
            history: self.history.iter().cloned().collect(),
            tasks_completed: self.tasks_completed,
        }
    }
}

/// Read-only view of a project, also its persisted form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project_id: ProjectId,
    pub goal: String,
    pub phase: Option<String>,
    pub state: ProjectState,
    pub queued: usize,
    pub in_flight: Vec<TaskId>,
    pub history: Vec<TaskSummary>,
    pub tasks_completed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(goal: &str, priority: u8) -> Task {
        Task::new(ProjectId::from("p"), "coder", goal).with_priority(priority)
    }

    #[test]
    fn queue_pops_highest_priority_then_fifo() {
        let mut q = TaskQueue::default();
        q.push(task("a", 1));
        q.push(task("b", 5));
        q.push(task("c", 1));
        q.push(task("d", 5));

        let peeked: Vec<String> = q.ordered().into_iter().map(|t| t.goal).collect();
        let order: Vec<String> = std::iter::from_fn(|| q.pop()).map(|t| t.goal).collect();
        assert_eq!(peeked, order);
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn history_is_bounded() {
        let mut p = Project::new(ProjectId::from("p"), "goal", 2);
        for goal in ["one", "two", "three"] {
            let t = task(goal, 0);
            let result = taskwright_core::state::TaskState::new(&t, "a", 5).finalize(TaskStatus::Success, None, None);
            p.remember(TaskSummary::new(&t, &result));
        }
        let goals: Vec<&str> = p.history().map(|s| s.goal.as_str()).collect();
        assert_eq!(goals, vec!["two", "three"]);
    }

    #[test]
    fn closed_states() {
        assert!(ProjectState::Completed { summary: None }.is_closed());
        assert!(!ProjectState::Idle.is_closed());
        assert!(
            !ProjectState::Suspended {
                gate_id: GateId::from("g")
            }
            .can_dispatch()
        );
    }
}
