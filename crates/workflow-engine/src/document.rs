//! Persisted editor format
//!
//! The editor saves and exports workflows as `{ nodes, edges }` where each
//! node wraps its ports and bindings in a `data` object next to its canvas
//! position. Fields this crate does not understand are kept, so loading and
//! saving a document does not lose editor-specific data. Exporting a
//! [`WorkflowGraph`] keeps node positions but not those unknown fields.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::NodeState;
pub use crate::types::Position;
use crate::types::{GraphEdge, GraphNode, NodeId, NodeKind, Port, WorkflowGraph};

/// Node payload as stored by the editor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNodeData {
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub inputs: Vec<Port>,
    #[serde(default)]
    pub outputs: Vec<Port>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodekind: Option<NodeKind>,
    /// Embedded graph of a composite node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<FlowDocument>,
    /// Editor fields this crate does not interpret
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A node as stored by the editor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Missing or empty ids are dropped on import
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: FlowNodeData,
}

/// An edge as stored by the editor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub source: String,
    pub source_handle: String,
    pub target: String,
    pub target_handle: String,
    /// Editor-only fields (styling, markers, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A complete persisted workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDocument {
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

impl FlowDocument {
    /// Parse a document from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a document from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let doc = Self::from_json(&content)?;
        log::debug!(
            "Loaded workflow from {:?}: {} nodes, {} edges",
            path.as_ref(),
            doc.nodes.len(),
            doc.edges.len()
        );
        Ok(doc)
    }

    /// Write the document to a JSON file, creating parent directories
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, self.to_json_pretty()?).await?;
        Ok(())
    }

    /// Export an internal graph back to the editor format
    ///
    /// When `states` is given, each node's `status` reflects its state.
    pub fn from_graph(graph: &WorkflowGraph, states: Option<&HashMap<NodeId, NodeState>>) -> Self {
        let nodes = graph
            .nodes
            .iter()
            .map(|node| export_node(node, states))
            .collect();
        let edges = graph.edges.iter().map(export_edge).collect();
        Self { nodes, edges }
    }
}

impl WorkflowGraph {
    /// Export to the editor format
    pub fn to_document(&self, states: Option<&HashMap<NodeId, NodeState>>) -> FlowDocument {
        FlowDocument::from_graph(self, states)
    }
}

fn export_node(node: &GraphNode, states: Option<&HashMap<NodeId, NodeState>>) -> FlowNode {
    let status = states
        .and_then(|s| s.get(&node.id))
        .map(|state| state.as_str().to_string());

    FlowNode {
        id: node.id.clone(),
        node_type: node.kind.clone(),
        position: node.position,
        data: FlowNodeData {
            label: node.label.clone(),
            status,
            inputs: node.inputs.clone(),
            outputs: node.outputs.clone(),
            package_name: node.package_name.clone(),
            node_name: node.node_name.clone(),
            nodekind: Some(node.nodekind),
            graph: node
                .graph
                .as_deref()
                .map(|inner| FlowDocument::from_graph(inner, None)),
            extra: serde_json::Map::new(),
        },
    }
}

fn export_edge(edge: &GraphEdge) -> FlowEdge {
    FlowEdge {
        id: edge.id.clone(),
        source: edge.source.clone(),
        source_handle: edge.source_handle.clone(),
        target: edge.target.clone(),
        target_handle: edge.target_handle.clone(),
        extra: serde_json::Map::new(),
    }
}
