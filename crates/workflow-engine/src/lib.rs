//! Workflow Engine - validation, composite expansion and scheduling for
//! node-graph workflows
//!
//! Workflows are authored in an editor as typed nodes wired port to port.
//! This crate turns such a graph into a correctly ordered, fault-tolerant,
//! cancellable execution:
//!
//! - Graph model with edit-time connection checks
//! - Exhaustive validation (cycles, unconnected inputs, dangling edges, ...)
//! - Inlining of composite nodes into a flat execution graph
//! - Concurrent root-chain scheduling with skip propagation and cancellation
//!
//! # Architecture
//!
//! - `FlowDocument`: the editor's persisted `{nodes, edges}` JSON
//! - `WorkflowGraph`: internal graph with resolved successor lists
//! - `ExecutionGraph`: flattened graph plus composite port mappings
//! - `WorkflowEngine`: runs an execution graph through a `NodeExecutor`
//! - `EventSink`: typed event streaming to any consumer
//!
//! # Example
//!
//! ```ignore
//! use workflow_engine::{prepare, EngineConfig, FlowDocument, HttpNodeExecutor, WorkflowEngine};
//!
//! let config = EngineConfig::default();
//! let doc = FlowDocument::load("workflow.json").await?;
//! let prepared = prepare(&doc, &config)?;
//!
//! let mut engine = WorkflowEngine::new(Arc::new(HttpNodeExecutor::from_config(&config)), config);
//! engine.bind_model(prepared.graph);
//! let report = engine.start().await;
//! ```

pub mod builder;
pub mod composite;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod model;
pub mod pipeline;
pub mod remote;
pub mod state;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::WorkflowBuilder;
pub use composite::{expand_composites, ExecutionGraph, PortMapping, PortTarget};
pub use config::EngineConfig;
pub use document::FlowDocument;
pub use engine::{ExecutionIssue, ExecutionReport, WorkflowEngine};
pub use error::{EngineError, Result};
pub use events::{ChannelEventSink, EventSink, NullEventSink, VecEventSink, WorkflowEvent};
pub use executor::{ExecutionRequest, ExecutionResponse, NodeExecutor, NodeOutputs, OutputValue};
pub use model::{build_graph_model, root_nodes};
pub use pipeline::{prepare, PreparedWorkflow};
pub use remote::HttpNodeExecutor;
pub use state::NodeState;
pub use types::{are_compatible, GraphEdge, GraphNode, NodeKind, Port, PortDataType, WorkflowGraph};
pub use validation::{validate_workflow, ValidationIssue, ValidationReport};
