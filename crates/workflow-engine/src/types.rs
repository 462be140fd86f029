//! Core types for workflow graphs
//!
//! These types define the structure of workflow graphs, including
//! nodes, edges, ports, and their metadata.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Unique identifier for a port
pub type PortId = String;

/// The data type of a port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDataType {
    /// Accepts any type
    #[default]
    Any,
    /// Floating point number
    Float,
    /// Integer number
    Int,
    /// Text string
    String,
    /// Boolean value
    Boolean,
    /// One of a fixed set of options
    Enum,
    /// Key/value object
    #[serde(alias = "dict")]
    Object,
    /// List of values
    Array,
    /// File reference
    File,
    /// Filesystem path
    Path,
    /// Color value
    Color,
    /// Callable reference
    Function,
    /// No value
    None,
}

impl PortDataType {
    /// Check if this type can connect to another type
    pub fn is_compatible_with(&self, other: &PortDataType) -> bool {
        // Any type is compatible with everything
        if matches!(self, PortDataType::Any) || matches!(other, PortDataType::Any) {
            return true;
        }

        self == other
    }
}

/// Whether an output of `output` type may feed an input of `input` type
pub fn are_compatible(output: PortDataType, input: PortDataType) -> bool {
    output.is_compatible_with(&input)
}

/// An input or output port on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    /// Identifier, unique within the owning node
    pub id: PortId,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Data type of the port
    #[serde(rename = "type", default)]
    pub data_type: PortDataType,
    /// Current value (preset for sources, computed for outputs)
    #[serde(default)]
    pub value: serde_json::Value,
    /// Whether an input may stay unconnected
    #[serde(default)]
    pub optional: bool,
    /// Allowed values for enum ports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_options: Option<Vec<String>>,
}

impl Port {
    /// Create a required port with no value
    pub fn new(id: impl Into<String>, name: impl Into<String>, data_type: PortDataType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            data_type,
            value: serde_json::Value::Null,
            optional: false,
            enum_options: None,
        }
    }

    /// Mark this port as optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Set a preset value
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = value;
        self
    }
}

/// Whether a node runs on the backend or is an inlined sub-graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Executes directly through the node executor
    #[default]
    Atomic,
    /// Carries an embedded graph, expanded before execution
    Composite,
}

/// An edge connecting two ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Unique identifier for this edge (may be empty)
    #[serde(default)]
    pub id: EdgeId,
    /// Source node ID
    pub source: NodeId,
    /// Source port ID
    pub source_handle: PortId,
    /// Target node ID
    pub target: NodeId,
    /// Target port ID
    pub target_handle: PortId,
}

impl GraphEdge {
    /// Create an edge with a derived id
    pub fn new(
        source: impl Into<String>,
        source_handle: impl Into<String>,
        target: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        let source = source.into();
        let source_handle = source_handle.into();
        let target = target.into();
        let target_handle = target_handle.into();
        Self {
            id: format!("{}:{}->{}:{}", source, source_handle, target, target_handle),
            source,
            source_handle,
            target,
            target_handle,
        }
    }
}

/// Canvas position of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node instance in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Editor node type (e.g. "custom", "float")
    #[serde(default)]
    pub kind: String,
    /// Human-readable label
    #[serde(default)]
    pub label: String,
    /// Where the editor draws the node
    #[serde(default)]
    pub position: Position,
    /// Input ports
    #[serde(default)]
    pub inputs: Vec<Port>,
    /// Output ports
    #[serde(default)]
    pub outputs: Vec<Port>,
    /// Package providing the node's implementation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    /// Node name within the package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Atomic or composite
    #[serde(default)]
    pub nodekind: NodeKind,
    /// Embedded sub-graph for composite nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<Box<WorkflowGraph>>,
    /// Direct successors, resolved from the edge list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next: Vec<NodeId>,
}

impl GraphNode {
    /// Create an atomic node without ports
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "custom".to_string(),
            label: label.into(),
            position: Position::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            package_name: None,
            node_name: None,
            nodekind: NodeKind::Atomic,
            graph: None,
            next: Vec::new(),
        }
    }

    /// Whether this node is a composite carrying an embedded graph
    pub fn is_composite(&self) -> bool {
        self.nodekind == NodeKind::Composite && self.graph.is_some()
    }

    /// Package and node name, when both are declared
    pub fn package_binding(&self) -> Option<(&str, &str)> {
        match (self.package_name.as_deref(), self.node_name.as_deref()) {
            (Some(package), Some(node)) if !package.is_empty() && !node.is_empty() => {
                Some((package, node))
            }
            _ => None,
        }
    }

    /// Label used to name exposed ports: label, else node name, else id
    pub fn display_label(&self) -> &str {
        if !self.label.is_empty() {
            &self.label
        } else if let Some(name) = self.node_name.as_deref().filter(|n| !n.is_empty()) {
            name
        } else {
            &self.id
        }
    }

    /// Find an input port by ID
    pub fn input(&self, port_id: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.id == port_id)
    }

    /// Find an output port by ID
    pub fn output(&self, port_id: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.id == port_id)
    }
}

/// A workflow graph: nodes plus the edges between their ports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    /// Nodes in the graph
    pub nodes: Vec<GraphNode>,
    /// Edges connecting nodes
    pub edges: Vec<GraphEdge>,
}

impl WorkflowGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a graph from nodes and edges, resolving successor lists
    pub fn from_parts(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Self {
        let mut graph = Self { nodes, edges };
        graph.rebuild_successors();
        graph
    }

    /// Recompute every node's `next` list from the edge list
    ///
    /// Successors keep edge order, appear once, and only reference
    /// nodes present in the graph.
    pub fn rebuild_successors(&mut self) {
        let ids: HashSet<NodeId> = self.nodes.iter().map(|n| n.id.clone()).collect();
        for node in &mut self.nodes {
            let mut next: Vec<NodeId> = Vec::new();
            for edge in self.edges.iter().filter(|e| e.source == node.id) {
                if ids.contains(&edge.target) && !next.contains(&edge.target) {
                    next.push(edge.target.clone());
                }
            }
            node.next = next;
        }
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check whether a node exists
    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a node by ID (mutable)
    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Get edges going out of a node
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Get the IDs of nodes that this node depends on (upstream nodes)
    pub fn predecessors(&self, node_id: &str) -> Vec<NodeId> {
        let mut preds: Vec<NodeId> = Vec::new();
        for edge in self.incoming_edges(node_id) {
            if !preds.contains(&edge.source) {
                preds.push(edge.source.clone());
            }
        }
        preds
    }

    /// Get the IDs of nodes that depend on this node (downstream nodes)
    pub fn successors(&self, node_id: &str) -> &[NodeId] {
        self.find_node(node_id)
            .map(|n| n.next.as_slice())
            .unwrap_or(&[])
    }

    /// All transitive successors of a node, each listed once
    pub fn descendants(&self, node_id: &str) -> Vec<NodeId> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<&str> = self.successors(node_id).iter().rev().map(|s| s.as_str()).collect();
        visited.insert(node_id);

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            order.push(current.to_string());
            for next in self.successors(current).iter().rev() {
                if !visited.contains(next.as_str()) {
                    stack.push(next.as_str());
                }
            }
        }

        order
    }

    /// Node ids that are not the target of any edge, in graph order
    pub fn root_nodes(&self) -> Vec<NodeId> {
        let children: HashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.next.iter().map(|s| s.as_str()))
            .collect();

        self.nodes
            .iter()
            .filter(|n| !children.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Add an edge after checking it at edit time
    ///
    /// Both endpoints must exist, the source must be an output and the
    /// target an input, the types must be compatible, and the target
    /// input must not already be connected.
    pub fn connect(&mut self, edge: GraphEdge) -> Result<()> {
        let source = self
            .find_node(&edge.source)
            .ok_or_else(|| EngineError::NodeNotFound(edge.source.clone()))?;
        let target = self
            .find_node(&edge.target)
            .ok_or_else(|| EngineError::NodeNotFound(edge.target.clone()))?;

        let output = source.output(&edge.source_handle).ok_or_else(|| {
            EngineError::InvalidConnection(format!(
                "node '{}' has no output '{}'",
                edge.source, edge.source_handle
            ))
        })?;
        let input = target.input(&edge.target_handle).ok_or_else(|| {
            EngineError::InvalidConnection(format!(
                "node '{}' has no input '{}'",
                edge.target, edge.target_handle
            ))
        })?;

        if !are_compatible(output.data_type, input.data_type) {
            return Err(EngineError::InvalidConnection(format!(
                "cannot connect {:?} output '{}' to {:?} input '{}'",
                output.data_type, edge.source_handle, input.data_type, edge.target_handle
            )));
        }

        if self
            .incoming_edges(&edge.target)
            .any(|e| e.target_handle == edge.target_handle)
        {
            return Err(EngineError::InvalidConnection(format!(
                "input '{}' on node '{}' is already connected",
                edge.target_handle, edge.target
            )));
        }

        let (source_id, target_id) = (edge.source.clone(), edge.target.clone());
        self.edges.push(edge);
        if let Some(node) = self.find_node_mut(&source_id) {
            if !node.next.contains(&target_id) {
                node.next.push(target_id);
            }
        }
        Ok(())
    }

    /// Remove the edge feeding an input port, returning it
    pub fn disconnect(&mut self, target: &str, target_handle: &str) -> Option<GraphEdge> {
        let pos = self
            .edges
            .iter()
            .position(|e| e.target == target && e.target_handle == target_handle)?;
        let removed = self.edges.remove(pos);
        self.rebuild_successors();
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, input: PortDataType, output: PortDataType) -> GraphNode {
        let mut n = GraphNode::new(id, id.to_uppercase());
        n.inputs.push(Port::new("in", "in", input));
        n.outputs.push(Port::new("out", "out", output));
        n
    }

    #[test]
    fn test_port_data_type_compatibility() {
        assert!(PortDataType::Any.is_compatible_with(&PortDataType::String));
        assert!(PortDataType::String.is_compatible_with(&PortDataType::Any));
        assert!(are_compatible(PortDataType::Float, PortDataType::Float));
        assert!(!are_compatible(PortDataType::Float, PortDataType::String));
        assert!(!are_compatible(PortDataType::Int, PortDataType::Float));
    }

    #[test]
    fn test_port_deserializes_dict_and_missing_type() {
        let port: Port = serde_json::from_value(serde_json::json!({
            "id": "p", "name": "p", "type": "dict"
        }))
        .unwrap();
        assert_eq!(port.data_type, PortDataType::Object);

        let port: Port = serde_json::from_value(serde_json::json!({"id": "q"})).unwrap();
        assert_eq!(port.data_type, PortDataType::Any);
        assert!(!port.optional);
    }

    #[test]
    fn test_successors_and_roots() {
        let graph = WorkflowGraph::from_parts(
            vec![
                node("a", PortDataType::Any, PortDataType::Any),
                node("b", PortDataType::Any, PortDataType::Any),
                node("c", PortDataType::Any, PortDataType::Any),
            ],
            vec![GraphEdge::new("a", "out", "b", "in")],
        );

        assert_eq!(graph.successors("a"), ["b".to_string()]);
        assert_eq!(graph.predecessors("b"), vec!["a"]);
        assert_eq!(graph.root_nodes(), vec!["a", "c"]);
    }

    #[test]
    fn test_descendants_visits_each_node_once() {
        let graph = WorkflowGraph::from_parts(
            vec![
                node("a", PortDataType::Any, PortDataType::Any),
                node("b", PortDataType::Any, PortDataType::Any),
                node("c", PortDataType::Any, PortDataType::Any),
                node("d", PortDataType::Any, PortDataType::Any),
            ],
            vec![
                GraphEdge::new("a", "out", "b", "in"),
                GraphEdge::new("a", "out", "c", "in"),
                GraphEdge::new("b", "out", "d", "in"),
                GraphEdge::new("c", "out", "d", "in"),
            ],
        );

        assert_eq!(graph.descendants("a"), vec!["b", "d", "c"]);
    }

    #[test]
    fn test_connect_rejects_incompatible_types() {
        let mut graph = WorkflowGraph::from_parts(
            vec![
                node("a", PortDataType::Any, PortDataType::Float),
                node("b", PortDataType::String, PortDataType::Any),
            ],
            vec![],
        );

        let err = graph
            .connect(GraphEdge::new("a", "out", "b", "in"))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConnection(_)));
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn test_connect_rejects_second_incoming_edge() {
        let mut graph = WorkflowGraph::from_parts(
            vec![
                node("a", PortDataType::Float, PortDataType::Float),
                node("b", PortDataType::Float, PortDataType::Float),
                node("c", PortDataType::Float, PortDataType::Float),
            ],
            vec![],
        );

        graph.connect(GraphEdge::new("a", "out", "c", "in")).unwrap();
        assert_eq!(graph.successors("a"), ["c".to_string()]);
        assert!(graph.connect(GraphEdge::new("b", "out", "c", "in")).is_err());

        // Fan-out from one output is fine
        graph.connect(GraphEdge::new("a", "out", "b", "in")).unwrap();
        assert_eq!(graph.successors("a").len(), 2);
    }

    #[test]
    fn test_connect_unknown_node() {
        let mut graph = WorkflowGraph::from_parts(
            vec![node("a", PortDataType::Any, PortDataType::Any)],
            vec![],
        );
        let err = graph
            .connect(GraphEdge::new("a", "out", "ghost", "in"))
            .unwrap_err();
        assert!(matches!(err, EngineError::NodeNotFound(id) if id == "ghost"));
    }

    #[test]
    fn test_disconnect_updates_successors() {
        let mut graph = WorkflowGraph::from_parts(
            vec![
                node("a", PortDataType::Any, PortDataType::Any),
                node("b", PortDataType::Any, PortDataType::Any),
            ],
            vec![GraphEdge::new("a", "out", "b", "in")],
        );

        let removed = graph.disconnect("b", "in").unwrap();
        assert_eq!(removed.source, "a");
        assert!(graph.successors("a").is_empty());
        assert_eq!(graph.root_nodes(), vec!["a", "b"]);
    }
}
