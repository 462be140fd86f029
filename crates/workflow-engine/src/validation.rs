//! Graph validation for workflow graphs
//!
//! Validation is exhaustive: every check runs even after an earlier one
//! failed, and all issues are returned. Errors block execution; warnings
//! are informational.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{are_compatible, NodeId, NodeKind, PortDataType, PortId, WorkflowGraph};

/// A problem found while validating a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationIssue {
    /// The graph has no nodes
    EmptyWorkflow,
    /// A cycle runs through these nodes, in path order
    #[serde(rename_all = "camelCase")]
    CycleDetected { nodes: Vec<NodeId> },
    /// A required input port has no incoming edge
    #[serde(rename_all = "camelCase")]
    UnconnectedInput {
        node_id: NodeId,
        port_id: PortId,
        label: String,
        port_name: String,
    },
    /// An atomic node has neither a package nor a node name
    #[serde(rename_all = "camelCase")]
    MissingPackage { node_id: NodeId, label: String },
    /// An edge references a node that does not exist
    #[serde(rename_all = "camelCase")]
    UnknownNode { edge_id: String, node_id: NodeId },
    /// An edge references a port missing from its node
    #[serde(rename_all = "camelCase")]
    UnknownPort {
        edge_id: String,
        node_id: NodeId,
        port_id: PortId,
    },
    /// An edge connects incompatible port types
    #[serde(rename_all = "camelCase")]
    IncompatibleTypes {
        edge_id: String,
        source_type: PortDataType,
        target_type: PortDataType,
    },
    /// An input port is fed by more than one edge
    #[serde(rename_all = "camelCase")]
    MultipleIncoming {
        node_id: NodeId,
        port_id: PortId,
        count: usize,
    },
}

impl ValidationIssue {
    /// Stable issue code, e.g. `CYCLE_DETECTED`
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyWorkflow => "EMPTY_WORKFLOW",
            Self::CycleDetected { .. } => "CYCLE_DETECTED",
            Self::UnconnectedInput { .. } => "UNCONNECTED_INPUT",
            Self::MissingPackage { .. } => "MISSING_PACKAGE",
            Self::UnknownNode { .. } => "UNKNOWN_NODE",
            Self::UnknownPort { .. } => "UNKNOWN_PORT",
            Self::IncompatibleTypes { .. } => "INCOMPATIBLE_TYPES",
            Self::MultipleIncoming { .. } => "MULTIPLE_INCOMING",
        }
    }

    /// Whether this issue prevents execution
    pub fn is_blocking(&self) -> bool {
        !matches!(self, Self::MissingPackage { .. })
    }

    /// Node ids the issue refers to
    pub fn node_ids(&self) -> Vec<&str> {
        match self {
            Self::EmptyWorkflow | Self::IncompatibleTypes { .. } => Vec::new(),
            Self::CycleDetected { nodes } => nodes.iter().map(|n| n.as_str()).collect(),
            Self::UnconnectedInput { node_id, .. }
            | Self::MissingPackage { node_id, .. }
            | Self::UnknownNode { node_id, .. }
            | Self::UnknownPort { node_id, .. }
            | Self::MultipleIncoming { node_id, .. } => vec![node_id.as_str()],
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyWorkflow => write!(f, "The workflow is empty"),
            Self::CycleDetected { nodes } => {
                write!(f, "Cycle detected in the workflow: {}", nodes.join(" -> "))
            }
            Self::UnconnectedInput {
                label, port_name, ..
            } => {
                write!(
                    f,
                    "Node \"{}\" has unconnected mandatory input \"{}\"",
                    label, port_name
                )
            }
            Self::MissingPackage { label, .. } => {
                write!(f, "Node \"{}\" is missing package information", label)
            }
            Self::UnknownNode { edge_id, node_id } => {
                write!(f, "Edge '{}' references unknown node '{}'", edge_id, node_id)
            }
            Self::UnknownPort {
                edge_id,
                node_id,
                port_id,
            } => {
                write!(
                    f,
                    "Edge '{}' references unknown port '{}' on node '{}'",
                    edge_id, port_id, node_id
                )
            }
            Self::IncompatibleTypes {
                edge_id,
                source_type,
                target_type,
            } => {
                write!(
                    f,
                    "Edge '{}' connects incompatible types: {:?} -> {:?}",
                    edge_id, source_type, target_type
                )
            }
            Self::MultipleIncoming {
                node_id,
                port_id,
                count,
            } => {
                write!(
                    f,
                    "Input '{}' on node '{}' has {} incoming edges",
                    port_id, node_id, count
                )
            }
        }
    }
}

/// Outcome of validating a graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True iff there are no blocking errors
    pub valid: bool,
    /// Blocking issues
    pub errors: Vec<ValidationIssue>,
    /// Non-blocking issues
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) =
            issues.into_iter().partition(|issue| issue.is_blocking());
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Find the first error with the given code
    pub fn find_error(&self, code: &str) -> Option<&ValidationIssue> {
        self.errors.iter().find(|e| e.code() == code)
    }
}

/// Validate a workflow graph
///
/// Returns all issues found (not just the first), split into blocking
/// errors and warnings.
pub fn validate_workflow(graph: &WorkflowGraph) -> ValidationReport {
    let mut issues = Vec::new();

    if graph.is_empty() {
        issues.push(ValidationIssue::EmptyWorkflow);
    }
    detect_cycles(graph, &mut issues);
    validate_required_inputs(graph, &mut issues);
    validate_package_bindings(graph, &mut issues);
    validate_edge_references(graph, &mut issues);
    validate_edge_types(graph, &mut issues);
    validate_single_incoming(graph, &mut issues);

    ValidationReport::from_issues(issues)
}

/// Detect cycles with an iterative depth-first search
///
/// A back-edge to a node on the current path closes a cycle; the path
/// slice from that node is reported. The search keeps going so every
/// cycle found by the traversal is listed.
fn detect_cycles(graph: &WorkflowGraph, issues: &mut Vec<ValidationIssue>) {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in &graph.nodes {
        adjacency.insert(&node.id, Vec::new());
    }
    for edge in &graph.edges {
        if !adjacency.contains_key(edge.target.as_str()) {
            continue;
        }
        if let Some(neighbors) = adjacency.get_mut(edge.source.as_str()) {
            neighbors.push(&edge.target);
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();
    let mut reported: HashSet<Vec<&str>> = HashSet::new();

    for node in &graph.nodes {
        if visited.contains(node.id.as_str()) {
            continue;
        }

        // (node, index of the next neighbor to explore)
        let mut stack: Vec<(&str, usize)> = vec![(&node.id, 0)];
        visited.insert(&node.id);
        on_stack.insert(&node.id);

        while let Some(top) = stack.last_mut() {
            let (current, index) = *top;
            top.1 += 1;
            let neighbors = adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(&neighbor) = neighbors.get(index) {
                if on_stack.contains(neighbor) {
                    let start = stack
                        .iter()
                        .position(|(id, _)| *id == neighbor)
                        .unwrap_or(0);
                    let cycle: Vec<&str> = stack[start..].iter().map(|(id, _)| *id).collect();
                    if reported.insert(cycle.clone()) {
                        issues.push(ValidationIssue::CycleDetected {
                            nodes: cycle.into_iter().map(String::from).collect(),
                        });
                    }
                } else if visited.insert(neighbor) {
                    on_stack.insert(neighbor);
                    stack.push((neighbor, 0));
                }
            } else {
                on_stack.remove(current);
                stack.pop();
            }
        }
    }
}

/// Check that every non-optional input has an incoming edge
fn validate_required_inputs(graph: &WorkflowGraph, issues: &mut Vec<ValidationIssue>) {
    let connected: HashSet<(&str, &str)> = graph
        .edges
        .iter()
        .map(|e| (e.target.as_str(), e.target_handle.as_str()))
        .collect();

    for node in &graph.nodes {
        for port in &node.inputs {
            if !port.optional && !connected.contains(&(node.id.as_str(), port.id.as_str())) {
                issues.push(ValidationIssue::UnconnectedInput {
                    node_id: node.id.clone(),
                    port_id: port.id.clone(),
                    label: node.display_label().to_string(),
                    port_name: if port.name.is_empty() {
                        port.id.clone()
                    } else {
                        port.name.clone()
                    },
                });
            }
        }
    }
}

/// Warn about atomic nodes with no package binding at all
fn validate_package_bindings(graph: &WorkflowGraph, issues: &mut Vec<ValidationIssue>) {
    let missing = |value: &Option<String>| value.as_deref().map_or(true, str::is_empty);

    for node in &graph.nodes {
        if node.nodekind == NodeKind::Atomic
            && missing(&node.package_name)
            && missing(&node.node_name)
        {
            issues.push(ValidationIssue::MissingPackage {
                node_id: node.id.clone(),
                label: node.display_label().to_string(),
            });
        }
    }
}

/// Check that all edge endpoints exist, as nodes and as ports
fn validate_edge_references(graph: &WorkflowGraph, issues: &mut Vec<ValidationIssue>) {
    for edge in &graph.edges {
        match graph.find_node(&edge.source) {
            None => issues.push(ValidationIssue::UnknownNode {
                edge_id: edge.id.clone(),
                node_id: edge.source.clone(),
            }),
            Some(node) if node.output(&edge.source_handle).is_none() => {
                issues.push(ValidationIssue::UnknownPort {
                    edge_id: edge.id.clone(),
                    node_id: edge.source.clone(),
                    port_id: edge.source_handle.clone(),
                })
            }
            Some(_) => {}
        }

        match graph.find_node(&edge.target) {
            None => issues.push(ValidationIssue::UnknownNode {
                edge_id: edge.id.clone(),
                node_id: edge.target.clone(),
            }),
            Some(node) if node.input(&edge.target_handle).is_none() => {
                issues.push(ValidationIssue::UnknownPort {
                    edge_id: edge.id.clone(),
                    node_id: edge.target.clone(),
                    port_id: edge.target_handle.clone(),
                })
            }
            Some(_) => {}
        }
    }
}

/// Re-check type compatibility of every edge whose ports both exist
fn validate_edge_types(graph: &WorkflowGraph, issues: &mut Vec<ValidationIssue>) {
    for edge in &graph.edges {
        let output = graph
            .find_node(&edge.source)
            .and_then(|n| n.output(&edge.source_handle));
        let input = graph
            .find_node(&edge.target)
            .and_then(|n| n.input(&edge.target_handle));

        if let (Some(output), Some(input)) = (output, input) {
            if !are_compatible(output.data_type, input.data_type) {
                issues.push(ValidationIssue::IncompatibleTypes {
                    edge_id: edge.id.clone(),
                    source_type: output.data_type,
                    target_type: input.data_type,
                });
            }
        }
    }
}

/// Each input port accepts at most one edge
///
/// Issues are reported in the order the ports first appear as edge targets.
fn validate_single_incoming(graph: &WorkflowGraph, issues: &mut Vec<ValidationIssue>) {
    let mut counts: HashMap<(&str, &str), usize> = HashMap::new();
    let mut order: Vec<(&str, &str)> = Vec::new();
    for edge in &graph.edges {
        let key = (edge.target.as_str(), edge.target_handle.as_str());
        let count = counts.entry(key).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }

    for key in order {
        let count = counts[&key];
        if count > 1 {
            let (node_id, port_id) = key;
            issues.push(ValidationIssue::MultipleIncoming {
                node_id: node_id.to_string(),
                port_id: port_id.to_string(),
                count,
            });
        }
    }
}
