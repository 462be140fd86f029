//! Composite expansion
//!
//! A composite node carries an embedded graph. Before execution every
//! composite is inlined: its internal nodes are prefixed with
//! `<compositeId>::`, external edges are rewired to the internal ports the
//! composite exposes, and a [`PortMapping`] records the translation so
//! callers can still read results and state per composite.
//!
//! # Example
//!
//! ```ignore
//! let exec = expand_composites(&graph, 5);
//! assert!(exec.graph.nodes.iter().all(|n| !n.is_composite()));
//! let mapping = exec.mapping("group-1").unwrap();
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::state::NodeState;
use crate::types::{GraphEdge, GraphNode, NodeId, NodeKind, Port, PortId, WorkflowGraph};

/// Separator between a composite id and its internal node ids
pub const ID_SEPARATOR: &str = "::";

/// Where a composite port leads inside the expanded graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortTarget {
    /// Qualified id of the internal node (`compositeId::childId`)
    pub internal_node_id: NodeId,
    /// Port id on that internal node
    pub internal_port_id: PortId,
}

/// Translation table for one expanded composite instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub composite_id: NodeId,
    pub input_map: BTreeMap<PortId, PortTarget>,
    pub output_map: BTreeMap<PortId, PortTarget>,
    /// Qualified ids of the nodes the composite was replaced with
    pub internal_node_ids: Vec<NodeId>,
}

/// A flattened graph plus the mappings of every composite inlined into it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub graph: WorkflowGraph,
    /// One entry per expansion, innermost last
    pub mappings: Vec<PortMapping>,
}

impl ExecutionGraph {
    /// Wrap a graph that needs no expansion
    pub fn flat(graph: WorkflowGraph) -> Self {
        Self {
            graph,
            mappings: Vec::new(),
        }
    }

    /// Mapping of the composite with the given id
    pub fn mapping(&self, composite_id: &str) -> Option<&PortMapping> {
        self.mappings.iter().find(|m| m.composite_id == composite_id)
    }

    /// Index of mappings by composite id
    pub fn mappings_by_id(&self) -> HashMap<&str, &PortMapping> {
        self.mappings
            .iter()
            .map(|m| (m.composite_id.as_str(), m))
            .collect()
    }
}

/// An internal port with no internal edge attached
#[derive(Debug, Clone)]
struct ExposedPort {
    name: String,
    node_id: NodeId,
    port_id: PortId,
}

/// Inline every composite node, up to `max_depth` expansions
///
/// Nested composites are handled by re-scanning the graph after each
/// expansion. A graph without composites comes back unchanged.
pub fn expand_composites(graph: &WorkflowGraph, max_depth: usize) -> ExecutionGraph {
    let mut current = graph.clone();
    let mut mappings = Vec::new();

    while mappings.len() < max_depth {
        let Some(index) = current.nodes.iter().position(GraphNode::is_composite) else {
            break;
        };
        let (expanded, mapping) = expand_one(current, index);
        log::debug!(
            "Expanded composite '{}' into {} nodes",
            mapping.composite_id,
            mapping.internal_node_ids.len()
        );
        current = expanded;
        mappings.push(mapping);
    }

    for node in &current.nodes {
        if node.is_composite() {
            log::warn!(
                "Composite '{}' left unexpanded: depth limit of {} reached",
                node.id,
                max_depth
            );
        } else if node.nodekind == NodeKind::Composite {
            log::warn!("Composite '{}' has no embedded graph; left in place", node.id);
        }
    }

    if !mappings.is_empty() {
        log::info!(
            "Expanded {} composite(s): {} nodes, {} edges",
            mappings.len(),
            current.nodes.len(),
            current.edges.len()
        );
    }

    ExecutionGraph {
        graph: current,
        mappings,
    }
}

/// Replace the composite at `index` with its prefixed internal graph
fn expand_one(mut graph: WorkflowGraph, index: usize) -> (WorkflowGraph, PortMapping) {
    let composite = graph.nodes.remove(index);
    let inner = composite.graph.as_deref().cloned().unwrap_or_default();
    let mapping = map_ports(&composite, &inner);

    let mut edges: Vec<GraphEdge> = Vec::with_capacity(graph.edges.len() + inner.edges.len());
    for edge in graph.edges {
        match rewire_edge(edge, &mapping) {
            Ok(edge) => edges.push(edge),
            Err(edge) => log::warn!(
                "Dropping edge '{}' ({}:{} -> {}:{}): no matching port inside composite '{}'",
                edge.id,
                edge.source,
                edge.source_handle,
                edge.target,
                edge.target_handle,
                composite.id
            ),
        }
    }

    let mut nodes = graph.nodes;
    for mut node in inner.nodes {
        node.id = qualify(&composite.id, &node.id);
        node.next.clear();
        nodes.push(node);
    }
    for mut edge in inner.edges {
        if !edge.id.is_empty() {
            edge.id = qualify(&composite.id, &edge.id);
        }
        edge.source = qualify(&composite.id, &edge.source);
        edge.target = qualify(&composite.id, &edge.target);
        edges.push(edge);
    }

    (WorkflowGraph::from_parts(nodes, edges), mapping)
}

/// Point an external edge at the internal port it maps to
///
/// Returns the edge unchanged in `Err` when an end touching the composite
/// has no mapping.
fn rewire_edge(mut edge: GraphEdge, mapping: &PortMapping) -> Result<GraphEdge, GraphEdge> {
    if edge.source == mapping.composite_id {
        let Some(target) = mapping.output_map.get(&edge.source_handle) else {
            return Err(edge);
        };
        edge.source = target.internal_node_id.clone();
        edge.source_handle = target.internal_port_id.clone();
    }
    if edge.target == mapping.composite_id {
        let Some(target) = mapping.input_map.get(&edge.target_handle) else {
            return Err(edge);
        };
        edge.target = target.internal_node_id.clone();
        edge.target_handle = target.internal_port_id.clone();
    }
    Ok(edge)
}

/// Pair the composite's declared ports with the ports its graph exposes
///
/// A declared port takes the exposed port with the same name, else the
/// exposed port at its own position.
fn map_ports(composite: &GraphNode, inner: &WorkflowGraph) -> PortMapping {
    let (exposed_inputs, exposed_outputs) = exposed_ports(inner);

    let pair = |declared: &[Port], exposed: &[ExposedPort]| -> BTreeMap<PortId, PortTarget> {
        declared
            .iter()
            .enumerate()
            .filter_map(|(i, port)| {
                let found = exposed
                    .iter()
                    .find(|p| p.name == port.name)
                    .or_else(|| exposed.get(i))?;
                Some((
                    port.id.clone(),
                    PortTarget {
                        internal_node_id: qualify(&composite.id, &found.node_id),
                        internal_port_id: found.port_id.clone(),
                    },
                ))
            })
            .collect()
    };

    PortMapping {
        composite_id: composite.id.clone(),
        input_map: pair(&composite.inputs, &exposed_inputs),
        output_map: pair(&composite.outputs, &exposed_outputs),
        internal_node_ids: inner
            .nodes
            .iter()
            .map(|n| qualify(&composite.id, &n.id))
            .collect(),
    }
}

/// Inputs no internal edge targets and outputs no internal edge sources
fn exposed_ports(inner: &WorkflowGraph) -> (Vec<ExposedPort>, Vec<ExposedPort>) {
    let targeted: HashSet<(&str, &str)> = inner
        .edges
        .iter()
        .map(|e| (e.target.as_str(), e.target_handle.as_str()))
        .collect();
    let sourced: HashSet<(&str, &str)> = inner
        .edges
        .iter()
        .map(|e| (e.source.as_str(), e.source_handle.as_str()))
        .collect();

    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    for node in &inner.nodes {
        let label = node.display_label();
        collect_exposed(node, label, &node.inputs, "in", &targeted, &mut inputs);
        collect_exposed(node, label, &node.outputs, "out", &sourced, &mut outputs);
    }

    (inputs, outputs)
}

fn collect_exposed(
    node: &GraphNode,
    label: &str,
    ports: &[Port],
    direction: &str,
    wired: &HashSet<(&str, &str)>,
    exposed: &mut Vec<ExposedPort>,
) {
    for (i, port) in ports.iter().enumerate() {
        if wired.contains(&(node.id.as_str(), port.id.as_str())) {
            continue;
        }
        let port_name = if port.name.is_empty() {
            format!("{}_{}", direction, i)
        } else {
            port.name.clone()
        };
        exposed.push(ExposedPort {
            name: format!("{}_{}", label, port_name),
            node_id: node.id.clone(),
            port_id: port.id.clone(),
        });
    }
}

fn qualify(composite_id: &str, id: &str) -> String {
    format!("{}{}{}", composite_id, ID_SEPARATOR, id)
}

/// Find the value behind a composite output in the run's results
///
/// Looks the output up in `output_map`, then searches the internal node's
/// results by port id, then by name. When the internal node was itself an
/// expanded composite, resolution continues through its mapping.
pub fn resolve_composite_output(
    results: &HashMap<NodeId, Vec<Port>>,
    mapping: &PortMapping,
    output_id: &str,
    mappings_by_id: &HashMap<&str, &PortMapping>,
) -> Option<Port> {
    let mut visited = HashSet::new();
    resolve_output_inner(results, mapping, output_id, mappings_by_id, &mut visited)
}

fn resolve_output_inner(
    results: &HashMap<NodeId, Vec<Port>>,
    mapping: &PortMapping,
    output_id: &str,
    mappings_by_id: &HashMap<&str, &PortMapping>,
    visited: &mut HashSet<NodeId>,
) -> Option<Port> {
    let target = mapping.output_map.get(output_id)?;

    if let Some(outputs) = results.get(&target.internal_node_id) {
        let found = outputs
            .iter()
            .find(|p| p.id == target.internal_port_id)
            .or_else(|| outputs.iter().find(|p| p.name == target.internal_port_id));
        if let Some(port) = found {
            return Some(port.clone());
        }
    }

    let nested = mappings_by_id.get(target.internal_node_id.as_str())?;
    if !visited.insert(target.internal_node_id.clone()) {
        return None;
    }
    resolve_output_inner(
        results,
        nested,
        &target.internal_port_id,
        mappings_by_id,
        visited,
    )
}

/// States of every node a composite was replaced with, nested ones included
pub fn collect_composite_states(
    states: &HashMap<NodeId, NodeState>,
    mapping: &PortMapping,
    mappings_by_id: &HashMap<&str, &PortMapping>,
) -> Vec<NodeState> {
    let mut collected = Vec::new();
    let mut visited = HashSet::new();
    visited.insert(mapping.composite_id.clone());
    collect_states_inner(states, mapping, mappings_by_id, &mut visited, &mut collected);
    collected
}

fn collect_states_inner(
    states: &HashMap<NodeId, NodeState>,
    mapping: &PortMapping,
    mappings_by_id: &HashMap<&str, &PortMapping>,
    visited: &mut HashSet<NodeId>,
    collected: &mut Vec<NodeState>,
) {
    for id in &mapping.internal_node_ids {
        if let Some(state) = states.get(id) {
            collected.push(*state);
        } else if let Some(nested) = mappings_by_id.get(id.as_str()) {
            if visited.insert(id.clone()) {
                collect_states_inner(states, nested, mappings_by_id, visited, collected);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::types::PortDataType;
    use serde_json::json;

    /// Composite `cid` wrapping one node `n1` (input x, output y)
    fn single_node_composite() -> WorkflowGraph {
        let inner = WorkflowBuilder::new()
            .add_node("n1", "n1")
            .with_package("pkg", "op")
            .with_input(Port::new("x", "x", PortDataType::Any))
            .with_output(Port::new("y", "y", PortDataType::Any))
            .build();

        WorkflowBuilder::new()
            .add_step("P", true)
            .add_composite("cid", "Composite", inner)
            .with_input(Port::new("x_in", "x_in", PortDataType::Any))
            .with_output(Port::new("y_out", "y_out", PortDataType::Any))
            .add_step("Q", false)
            .add_edge("P", "out", "cid", "x_in")
            .add_edge("cid", "y_out", "Q", "in")
            .build()
    }

    #[test]
    fn test_flat_graph_is_unchanged() {
        let graph = WorkflowBuilder::new()
            .add_step("a", true)
            .add_step("b", false)
            .chain("a", "b")
            .build();

        let exec = expand_composites(&graph, 5);
        assert_eq!(exec.graph, graph);
        assert!(exec.mappings.is_empty());
    }

    #[test]
    fn test_single_internal_node_rewires_edges() {
        let exec = expand_composites(&single_node_composite(), 5);
        let graph = &exec.graph;

        let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["P", "Q", "cid::n1"]);

        let incoming: Vec<_> = graph.incoming_edges("cid::n1").collect();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source, "P");
        assert_eq!(incoming[0].target_handle, "x");

        let outgoing: Vec<_> = graph.outgoing_edges("cid::n1").collect();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].source_handle, "y");
        assert_eq!(outgoing[0].target, "Q");

        assert!(graph
            .edges
            .iter()
            .all(|e| e.source != "cid" && e.target != "cid"));
        assert_eq!(graph.successors("P"), ["cid::n1".to_string()]);

        let mapping = exec.mapping("cid").unwrap();
        assert_eq!(mapping.internal_node_ids, vec!["cid::n1"]);
        assert_eq!(
            mapping.input_map["x_in"],
            PortTarget {
                internal_node_id: "cid::n1".to_string(),
                internal_port_id: "x".to_string(),
            }
        );
    }

    #[test]
    fn test_expansion_is_idempotent() {
        let once = expand_composites(&single_node_composite(), 5);
        let twice = expand_composites(&once.graph, 5);
        assert_eq!(twice.graph, once.graph);
        assert!(twice.mappings.is_empty());
    }

    #[test]
    fn test_ports_matched_by_name_before_index() {
        // Exposed inputs are "first_in" then "second_in"; the declared
        // order is reversed so only name matching pairs them correctly
        let inner = WorkflowBuilder::new()
            .add_node("a", "first")
            .with_input(Port::new("in", "in", PortDataType::Any))
            .add_node("b", "second")
            .with_input(Port::new("in", "in", PortDataType::Any))
            .build();
        let graph = WorkflowBuilder::new()
            .add_composite("c", "C", inner)
            .with_input(Port::new("p0", "second_in", PortDataType::Any))
            .with_input(Port::new("p1", "first_in", PortDataType::Any))
            .build();

        let exec = expand_composites(&graph, 5);
        let mapping = exec.mapping("c").unwrap();
        assert_eq!(mapping.input_map["p0"].internal_node_id, "c::b");
        assert_eq!(mapping.input_map["p1"].internal_node_id, "c::a");
    }

    #[test]
    fn test_internal_edges_are_prefixed() {
        let inner = WorkflowBuilder::new()
            .add_step("a", true)
            .add_step("b", false)
            .chain("a", "b")
            .build();
        let graph = WorkflowBuilder::new()
            .add_composite("c", "C", inner)
            .build();

        let exec = expand_composites(&graph, 5);
        let edge = &exec.graph.edges[0];
        assert_eq!(edge.id, "c::edge-1");
        assert_eq!(edge.source, "c::a");
        assert_eq!(edge.target, "c::b");
        assert_eq!(exec.graph.root_nodes(), vec!["c::a"]);
    }

    #[test]
    fn test_unmapped_external_edge_is_dropped() {
        let mut graph = single_node_composite();
        graph.edges.push(GraphEdge::new("cid", "ghost", "Q", "in"));

        let exec = expand_composites(&graph, 5);
        assert_eq!(exec.graph.edges.len(), 2);
    }

    fn nested_composite() -> WorkflowGraph {
        let innermost = WorkflowBuilder::new()
            .add_node("leaf", "leaf")
            .with_output(Port::new("v", "v", PortDataType::Any))
            .build();
        let middle = WorkflowBuilder::new()
            .add_composite("inner", "inner", innermost)
            .with_output(Port::new("mid_out", "leaf_v", PortDataType::Any))
            .build();
        WorkflowBuilder::new()
            .add_composite("outer", "outer", middle)
            .with_output(Port::new("result", "inner_mid_out", PortDataType::Any))
            .add_step("sink", false)
            .add_edge("outer", "result", "sink", "in")
            .build()
    }

    #[test]
    fn test_nested_composites_expand_fully() {
        let exec = expand_composites(&nested_composite(), 5);

        let ids: Vec<&str> = exec.graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["sink", "outer::inner::leaf"]);
        assert_eq!(exec.mappings.len(), 2);
        assert_eq!(exec.mappings[1].composite_id, "outer::inner");
        assert_eq!(exec.graph.edges[0].source, "outer::inner::leaf");
        assert_eq!(exec.graph.edges[0].source_handle, "v");
    }

    #[test]
    fn test_depth_limit_stops_expansion() {
        let exec = expand_composites(&nested_composite(), 1);
        assert_eq!(exec.mappings.len(), 1);
        assert!(exec
            .graph
            .find_node("outer::inner")
            .map(GraphNode::is_composite)
            .unwrap_or(false));
    }

    #[test]
    fn test_composite_without_graph_left_in_place() {
        let mut node = GraphNode::new("c", "C");
        node.nodekind = NodeKind::Composite;
        let graph = WorkflowGraph::from_parts(vec![node], vec![]);

        let exec = expand_composites(&graph, 5);
        assert_eq!(exec.graph, graph);
    }

    #[test]
    fn test_resolve_output_through_nested_mapping() {
        let exec = expand_composites(&nested_composite(), 5);
        let by_id = exec.mappings_by_id();

        let mut results = HashMap::new();
        results.insert(
            "outer::inner::leaf".to_string(),
            vec![Port::new("v", "v", PortDataType::Any).with_value(json!(42))],
        );

        let outer = exec.mapping("outer").unwrap();
        let port = resolve_composite_output(&results, outer, "result", &by_id).unwrap();
        assert_eq!(port.value, json!(42));
        assert!(resolve_composite_output(&results, outer, "missing", &by_id).is_none());
    }

    #[test]
    fn test_collect_states_descends_nested() {
        let exec = expand_composites(&nested_composite(), 5);
        let by_id = exec.mappings_by_id();

        let mut states = HashMap::new();
        states.insert("outer::inner::leaf".to_string(), NodeState::Running);
        states.insert("sink".to_string(), NodeState::Pending);

        let outer = exec.mapping("outer").unwrap();
        assert_eq!(
            collect_composite_states(&states, outer, &by_id),
            vec![NodeState::Running]
        );
    }
}
