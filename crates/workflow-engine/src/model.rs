//! Graph model construction
//!
//! Turns the editor's node/edge collections into the internal
//! [`WorkflowGraph`] with resolved successor lists. The transform is pure:
//! malformed nodes are left out rather than reported.

use crate::document::{FlowDocument, FlowEdge, FlowNode};
use crate::types::{GraphEdge, GraphNode, NodeId, WorkflowGraph};

/// Build the internal graph from editor nodes and edges
///
/// Nodes without an id are dropped. Composite nodes keep their embedded
/// graph, converted the same way.
pub fn build_graph_model(nodes: &[FlowNode], edges: &[FlowEdge]) -> WorkflowGraph {
    let nodes: Vec<GraphNode> = nodes.iter().filter_map(convert_node).collect();
    let edges: Vec<GraphEdge> = edges.iter().map(convert_edge).collect();

    WorkflowGraph::from_parts(nodes, edges)
}

/// Node ids with no incoming edge, in graph order
pub fn root_nodes(graph: &WorkflowGraph) -> Vec<NodeId> {
    graph.root_nodes()
}

impl From<&FlowDocument> for WorkflowGraph {
    fn from(doc: &FlowDocument) -> Self {
        build_graph_model(&doc.nodes, &doc.edges)
    }
}

fn convert_node(node: &FlowNode) -> Option<GraphNode> {
    if node.id.trim().is_empty() {
        log::debug!("Dropping editor node without id (label '{}')", node.data.label);
        return None;
    }

    let data = &node.data;
    Some(GraphNode {
        id: node.id.clone(),
        kind: node.node_type.clone(),
        label: data.label.clone(),
        position: node.position,
        inputs: data.inputs.clone(),
        outputs: data.outputs.clone(),
        package_name: data.package_name.clone(),
        node_name: data.node_name.clone(),
        nodekind: data.nodekind.unwrap_or_default(),
        graph: data
            .graph
            .as_ref()
            .map(|inner| Box::new(WorkflowGraph::from(inner))),
        next: Vec::new(),
    })
}

fn convert_edge(edge: &FlowEdge) -> GraphEdge {
    GraphEdge {
        id: edge.id.clone(),
        source: edge.source.clone(),
        source_handle: edge.source_handle.clone(),
        target: edge.target.clone(),
        target_handle: edge.target_handle.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FlowNodeData;
    use crate::types::NodeKind;

    fn flow_node(id: &str) -> FlowNode {
        FlowNode {
            id: id.to_string(),
            node_type: "custom".to_string(),
            data: FlowNodeData {
                label: id.to_uppercase(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn flow_edge(source: &str, target: &str) -> FlowEdge {
        FlowEdge {
            id: format!("{}-{}", source, target),
            source: source.to_string(),
            source_handle: "out".to_string(),
            target: target.to_string(),
            target_handle: "in".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_chain_has_single_root() {
        let graph = build_graph_model(
            &[flow_node("A"), flow_node("B"), flow_node("C")],
            &[flow_edge("A", "B"), flow_edge("B", "C")],
        );

        assert_eq!(root_nodes(&graph), vec!["A"]);
        assert_eq!(graph.successors("B"), ["C".to_string()]);
    }

    #[test]
    fn test_forest_roots_in_graph_order() {
        let graph = build_graph_model(
            &[flow_node("A"), flow_node("B"), flow_node("C")],
            &[flow_edge("A", "B")],
        );

        assert_eq!(root_nodes(&graph), vec!["A", "C"]);
    }

    #[test]
    fn test_nodes_without_id_are_omitted() {
        let graph = build_graph_model(&[flow_node(""), flow_node("A")], &[]);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.nodes[0].id, "A");
    }

    #[test]
    fn test_preserves_bindings_and_ports() {
        let mut node = flow_node("A");
        node.data.package_name = Some("pkg".to_string());
        node.data.node_name = Some("op".to_string());
        node.data.inputs = vec![crate::types::Port::new("x", "x", Default::default())];

        let graph = build_graph_model(&[node], &[]);
        let converted = graph.find_node("A").unwrap();
        assert_eq!(converted.package_binding(), Some(("pkg", "op")));
        assert_eq!(converted.inputs[0].id, "x");
        assert_eq!(converted.label, "A");
    }

    #[test]
    fn test_dangling_edge_not_in_successors() {
        let graph = build_graph_model(&[flow_node("A")], &[flow_edge("A", "ghost")]);
        assert!(graph.successors("A").is_empty());
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn test_composite_graph_converted_recursively() {
        let mut composite = flow_node("comp");
        composite.data.nodekind = Some(NodeKind::Composite);
        composite.data.graph = Some(FlowDocument {
            nodes: vec![flow_node("n1"), flow_node("n2")],
            edges: vec![flow_edge("n1", "n2")],
        });

        let graph = build_graph_model(&[composite], &[]);
        let node = graph.find_node("comp").unwrap();
        assert!(node.is_composite());
        let inner = node.graph.as_ref().unwrap();
        assert_eq!(inner.root_nodes(), vec!["n1"]);
    }
}
