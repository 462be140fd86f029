//! Event types for streaming workflow progress
//!
//! Events are sent from the engine to the editor (or any consumer)
//! to report node state changes, results, errors and run boundaries.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state::NodeState;
use crate::types::{NodeId, Port};
use crate::validation::ValidationIssue;

/// Trait for sending workflow events
///
/// This abstracts over the transport mechanism (channel, log, collector)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkflowEvent {
    /// Run started
    #[serde(rename = "workflow-start", rename_all = "camelCase")]
    WorkflowStarted {
        execution_id: String,
        node_count: usize,
    },

    /// A node moved to a new state
    #[serde(rename = "node-state-change", rename_all = "camelCase")]
    NodeStateChanged { node_id: NodeId, state: NodeState },

    /// A node's execution began
    #[serde(rename = "node-start", rename_all = "camelCase")]
    NodeStarted { node_id: NodeId },

    /// A node produced its outputs
    #[serde(rename_all = "camelCase")]
    NodeResult { node_id: NodeId, outputs: Vec<Port> },

    /// A node finished, successfully or not
    #[serde(rename_all = "camelCase")]
    NodeDone { node_id: NodeId },

    /// A node failed
    #[serde(rename_all = "camelCase")]
    NodeError { node_id: NodeId, error: String },

    /// A node was skipped because an upstream node failed
    #[serde(rename_all = "camelCase")]
    NodeSkipped { node_id: NodeId, reason: String },

    /// Run finished without being stopped
    #[serde(rename_all = "camelCase")]
    WorkflowDone { execution_id: String, success: bool },

    /// Run could not proceed
    #[serde(rename_all = "camelCase")]
    WorkflowError { execution_id: String, error: String },

    /// Run was stopped by the user
    #[serde(rename_all = "camelCase")]
    WorkflowStopped { execution_id: String },

    /// Validation found blocking errors; nothing ran
    #[serde(rename = "validation-error")]
    ValidationFailed { errors: Vec<ValidationIssue> },

    /// Validation found warnings; the run proceeds
    ValidationWarnings { warnings: Vec<ValidationIssue> },
}

impl WorkflowEvent {
    /// Create a node state change event
    pub fn state_changed(node_id: &str, state: NodeState) -> Self {
        Self::NodeStateChanged {
            node_id: node_id.to_string(),
            state,
        }
    }

    /// Create a node error event
    pub fn node_error(node_id: &str, error: impl Into<String>) -> Self {
        Self::NodeError {
            node_id: node_id.to_string(),
            error: error.into(),
        }
    }

    /// The node this event is about, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStateChanged { node_id, .. }
            | Self::NodeStarted { node_id }
            | Self::NodeResult { node_id, .. }
            | Self::NodeDone { node_id }
            | Self::NodeError { node_id, .. }
            | Self::NodeSkipped { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Forwards events into a tokio channel
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that drains it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.sender
            .send(event)
            .map_err(|_| EventError::channel_closed())
    }
}
