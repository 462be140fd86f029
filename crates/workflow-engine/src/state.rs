//! Node execution states

use serde::{Deserialize, Serialize};

/// Execution state of a single node within one run
///
/// States only move forward during a run; a terminal state is final
/// until the engine is reset for the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting for dependencies
    Pending,
    /// All dependencies met, not started
    Ready,
    /// Backend call in flight
    Running,
    /// Finished successfully
    Completed,
    /// Execution failed
    Error,
    /// Not run because an upstream node failed
    Skipped,
    /// Stopped by the user
    Cancelled,
}

impl NodeState {
    /// Whether no further transition is allowed in this run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Completed | NodeState::Error | NodeState::Skipped | NodeState::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal forward transition
    pub fn can_transition_to(&self, next: NodeState) -> bool {
        use NodeState::*;
        match (self, next) {
            (Pending, Ready | Running | Skipped | Cancelled) => true,
            (Ready, Running | Skipped | Cancelled) => true,
            (Running, Completed | Error | Cancelled) => true,
            _ => false,
        }
    }

    /// Lower-case name as shown in the editor
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Ready => "ready",
            NodeState::Running => "running",
            NodeState::Completed => "completed",
            NodeState::Error => "error",
            NodeState::Skipped => "skipped",
            NodeState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate state of a composite from its internal nodes' states
///
/// Error wins, then running; completed only when every node completed;
/// otherwise the weakest non-terminal state present.
pub fn composite_state(states: &[NodeState]) -> NodeState {
    if states.is_empty() {
        return NodeState::Pending;
    }

    let any = |wanted: NodeState| states.iter().any(|s| *s == wanted);

    if any(NodeState::Error) {
        NodeState::Error
    } else if any(NodeState::Running) {
        NodeState::Running
    } else if states.iter().all(|s| *s == NodeState::Completed) {
        NodeState::Completed
    } else if any(NodeState::Skipped) {
        NodeState::Skipped
    } else if any(NodeState::Cancelled) {
        NodeState::Cancelled
    } else if any(NodeState::Ready) {
        NodeState::Ready
    } else {
        NodeState::Pending
    }
}
