//! Fluent builder for workflow graphs
//!
//! Provides a fluent API for constructing graphs programmatically.

use crate::types::{GraphEdge, GraphNode, NodeKind, Port, PortDataType, WorkflowGraph};

/// Fluent builder for constructing workflow graphs
///
/// # Example
///
/// ```ignore
/// let graph = WorkflowBuilder::new()
///     .add_node("source", "Source")
///     .with_output(Port::new("out", "out", PortDataType::Float).with_value(json!(2.0)))
///     .add_node("double", "Double")
///     .with_package("openalea.math", "double")
///     .with_input(Port::new("in", "in", PortDataType::Float))
///     .with_output(Port::new("out", "out", PortDataType::Float))
///     .add_edge("source", "out", "double", "in")
///     .build();
/// ```
#[derive(Default)]
pub struct WorkflowBuilder {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    edge_counter: usize,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an atomic node without ports
    pub fn add_node(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.nodes.push(GraphNode::new(id, label));
        self
    }

    /// Add a node with one `any` input "in" and one `any` output "out"
    ///
    /// The input is optional when `root` is true so the node validates
    /// without an upstream connection.
    pub fn add_step(self, id: impl Into<String>, root: bool) -> Self {
        let id = id.into();
        let input = Port::new("in", "in", PortDataType::Any);
        let input = if root { input.optional() } else { input };
        self.add_node(id.clone(), id)
            .with_input(input)
            .with_output(Port::new("out", "out", PortDataType::Any))
    }

    /// Add a composite node carrying an embedded graph
    pub fn add_composite(
        mut self,
        id: impl Into<String>,
        label: impl Into<String>,
        graph: WorkflowGraph,
    ) -> Self {
        let mut node = GraphNode::new(id, label);
        node.nodekind = NodeKind::Composite;
        node.graph = Some(Box::new(graph));
        self.nodes.push(node);
        self
    }

    /// Add an input port to the most recently added node
    pub fn with_input(mut self, port: Port) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.inputs.push(port);
        }
        self
    }

    /// Add an output port to the most recently added node
    pub fn with_output(mut self, port: Port) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.outputs.push(port);
        }
        self
    }

    /// Bind the most recently added node to a package node
    pub fn with_package(mut self, package_name: impl Into<String>, node_name: impl Into<String>) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.package_name = Some(package_name.into());
            node.node_name = Some(node_name.into());
        }
        self
    }

    /// Add an edge between two nodes (auto-generates edge ID)
    pub fn add_edge(
        mut self,
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        self.edge_counter += 1;
        self.edges.push(GraphEdge {
            id: format!("edge-{}", self.edge_counter),
            source: source.into(),
            source_handle: source_port.into(),
            target: target.into(),
            target_handle: target_port.into(),
        });
        self
    }

    /// Connect `out` of `source` to `in` of `target`
    pub fn chain(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.add_edge(source, "out", target, "in")
    }

    /// Build the graph without validation
    pub fn build(self) -> WorkflowGraph {
        WorkflowGraph::from_parts(self.nodes, self.edges)
    }
}
