//! From persisted document to executable graph

use crate::composite::{expand_composites, ExecutionGraph};
use crate::config::EngineConfig;
use crate::document::FlowDocument;
use crate::error::{EngineError, Result};
use crate::model::build_graph_model;
use crate::validation::{validate_workflow, ValidationReport};

/// A validated, flattened workflow ready to bind to an engine
#[derive(Debug, Clone)]
pub struct PreparedWorkflow {
    pub graph: ExecutionGraph,
    /// Validation outcome; only warnings remain when preparation succeeded
    pub report: ValidationReport,
}

/// Build, validate and flatten a document
///
/// Blocking validation errors abort with [`EngineError::Validation`].
pub fn prepare(doc: &FlowDocument, config: &EngineConfig) -> Result<PreparedWorkflow> {
    let model = build_graph_model(&doc.nodes, &doc.edges);

    let report = validate_workflow(&model);
    if !report.valid {
        return Err(EngineError::Validation(report));
    }
    for warning in &report.warnings {
        log::warn!("Validation warning: {}", warning);
    }

    let graph = expand_composites(&model, config.max_composite_depth);
    log::info!(
        "Prepared workflow: {} nodes, {} edges, {} composite(s) expanded",
        graph.graph.len(),
        graph.graph.edges.len(),
        graph.mappings.len()
    );

    Ok(PreparedWorkflow { graph, report })
}
