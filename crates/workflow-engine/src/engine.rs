//! Workflow execution engine
//!
//! Runs a bound [`ExecutionGraph`] from its root nodes. Each root gets a
//! walker that follows its successor chain depth-first; walkers are polled
//! together, so independent chains overlap while nodes on one chain run in
//! order. A node is claimed only once every predecessor has completed, which
//! makes a node reachable from several chains run exactly once.
//!
//! # Key Concepts
//!
//! - **Claiming**: READY -> RUNNING happens under the run lock, so two
//!   walkers can never both start a node
//! - **Skip propagation**: a failed node marks every non-terminal
//!   descendant SKIPPED; sibling branches keep running
//! - **Cancellation**: `stop()` flags the run and cancels every unfinished
//!   node at once; results arriving afterwards are discarded

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::composite::{self, ExecutionGraph};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventSink, WorkflowEvent};
use crate::executor::{local_fallback, merge_outputs, ExecutionRequest, NodeExecutor};
use crate::state::{self, NodeState};
use crate::types::{GraphNode, NodeId, Port, WorkflowGraph};
use crate::validation::{validate_workflow, ValidationIssue};

/// A problem recorded during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionIssue {
    /// A node's execution failed
    #[serde(rename_all = "camelCase")]
    NodeFailed { node_id: NodeId, error: String },
    /// A node was skipped because an upstream node failed
    #[serde(rename_all = "camelCase")]
    NodeSkipped { node_id: NodeId, reason: String },
    /// The validation gate rejected the graph
    Validation { issue: ValidationIssue },
    /// The run could not start or proceed
    Engine { error: String },
}

impl ExecutionIssue {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeFailed { node_id, .. } | Self::NodeSkipped { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

/// Final outcome of `start()`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub execution_id: String,
    /// True iff the run was not stopped and no node ended in error
    pub success: bool,
    pub cancelled: bool,
    /// Output ports of every completed node
    pub results: BTreeMap<NodeId, Vec<Port>>,
    /// Failures, skips, and gate or engine errors
    pub errors: Vec<ExecutionIssue>,
    /// Node states when the run ended
    pub states: BTreeMap<NodeId, NodeState>,
}

impl ExecutionReport {
    fn rejected(errors: Vec<ExecutionIssue>) -> Self {
        Self {
            errors,
            ..Default::default()
        }
    }

    fn engine_error(error: EngineError) -> Self {
        Self::rejected(vec![ExecutionIssue::Engine {
            error: error.to_string(),
        }])
    }
}

/// Per-run state, guarded by one lock that is never held across an await
#[derive(Default)]
struct RunState {
    states: HashMap<NodeId, NodeState>,
    results: HashMap<NodeId, Vec<Port>>,
    issues: Vec<ExecutionIssue>,
}

impl RunState {
    /// Apply a forward transition; illegal ones are refused
    fn transition(&mut self, node_id: &str, next: NodeState) -> bool {
        match self.states.get_mut(node_id) {
            Some(state) if state.can_transition_to(next) => {
                *state = next;
                true
            }
            Some(state) => {
                log::debug!(
                    "Refusing transition of '{}' from {} to {}",
                    node_id,
                    state,
                    next
                );
                false
            }
            None => false,
        }
    }
}

/// Clears the running flag when a run ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Executes workflow graphs against a [`NodeExecutor`]
pub struct WorkflowEngine {
    executor: Arc<dyn NodeExecutor>,
    config: EngineConfig,
    model: Option<ExecutionGraph>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    run: Mutex<RunState>,
    running: AtomicBool,
    cancelled: AtomicBool,
    execution_id: Mutex<String>,
}

impl WorkflowEngine {
    pub fn new(executor: Arc<dyn NodeExecutor>, config: EngineConfig) -> Self {
        Self {
            executor,
            config,
            model: None,
            sinks: RwLock::new(Vec::new()),
            run: Mutex::new(RunState::default()),
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            execution_id: Mutex::new(String::new()),
        }
    }

    /// Bind the graph the next `start()` executes
    ///
    /// Node states are reset to PENDING.
    pub fn bind_model(&mut self, model: ExecutionGraph) {
        log::debug!(
            "Binding model with {} nodes and {} composite mappings",
            model.graph.len(),
            model.mappings.len()
        );
        let mut run = self.run.lock();
        *run = RunState::default();
        for node in &model.graph.nodes {
            run.states.insert(node.id.clone(), NodeState::Pending);
        }
        drop(run);
        self.model = Some(model);
    }

    /// The bound model, if any
    pub fn model(&self) -> Option<&ExecutionGraph> {
        self.model.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register an event listener
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Id of the current or most recent run
    pub fn execution_id(&self) -> String {
        self.execution_id.lock().clone()
    }

    pub fn node_state(&self, node_id: &str) -> Option<NodeState> {
        self.run.lock().states.get(node_id).copied()
    }

    pub fn node_states(&self) -> HashMap<NodeId, NodeState> {
        self.run.lock().states.clone()
    }

    /// Output ports of completed nodes
    pub fn results(&self) -> HashMap<NodeId, Vec<Port>> {
        self.run.lock().results.clone()
    }

    /// Forget results and put every node back to PENDING
    ///
    /// Ignored while a run is in progress.
    pub fn reset(&self) {
        if self.is_running() {
            log::warn!("Ignoring reset while a run is in progress");
            return;
        }
        let mut run = self.run.lock();
        run.results.clear();
        run.issues.clear();
        for state in run.states.values_mut() {
            *state = NodeState::Pending;
        }
    }

    /// Aggregate state of an expanded composite
    pub fn composite_state(&self, composite_id: &str) -> Option<NodeState> {
        let model = self.model.as_ref()?;
        let mapping = model.mapping(composite_id)?;
        let by_id = model.mappings_by_id();
        let states = self.node_states();
        let collected = composite::collect_composite_states(&states, mapping, &by_id);
        Some(state::composite_state(&collected))
    }

    /// Value of a composite output port after a run
    pub fn resolve_composite_output(&self, composite_id: &str, output_id: &str) -> Option<Port> {
        let model = self.model.as_ref()?;
        let mapping = model.mapping(composite_id)?;
        let by_id = model.mappings_by_id();
        let results = self.results();
        composite::resolve_composite_output(&results, mapping, output_id, &by_id)
    }

    /// Request cooperative cancellation of the current run
    ///
    /// Every node that has not finished becomes CANCELLED immediately.
    /// In-flight backend calls are not aborted; their results are dropped.
    pub fn stop(&self) {
        if !self.is_running() {
            return;
        }
        log::info!("Stopping workflow run {}", self.execution_id());
        self.cancelled.store(true, Ordering::SeqCst);

        let cancelled: Vec<NodeId> = {
            let mut run = self.run.lock();
            let ids: Vec<NodeId> = self
                .model
                .iter()
                .flat_map(|m| m.graph.nodes.iter().map(|n| n.id.clone()))
                .collect();
            ids.into_iter()
                .filter(|id| {
                    !run.states.get(id).map_or(true, NodeState::is_terminal)
                        && run.transition(id, NodeState::Cancelled)
                })
                .collect()
        };

        for node_id in &cancelled {
            self.emit(WorkflowEvent::state_changed(node_id, NodeState::Cancelled));
        }
        self.emit(WorkflowEvent::WorkflowStopped {
            execution_id: self.execution_id(),
        });
    }

    /// Run the bound model to completion, failure or cancellation
    pub async fn start(&self) -> ExecutionReport {
        let Some(model) = self.model.as_ref() else {
            log::warn!("Cannot start: no model bound");
            return ExecutionReport::engine_error(EngineError::NoModelBound);
        };

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("Cannot start: a run is already in progress");
            return ExecutionReport::engine_error(EngineError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        self.run_graph(&model.graph).await
    }

    async fn run_graph(&self, graph: &WorkflowGraph) -> ExecutionReport {
        self.cancelled.store(false, Ordering::SeqCst);
        let execution_id = uuid::Uuid::new_v4().to_string();
        *self.execution_id.lock() = execution_id.clone();

        if self.config.validate_before_run {
            let report = validate_workflow(graph);
            if !report.valid {
                log::warn!(
                    "Workflow validation failed with {} error(s)",
                    report.errors.len()
                );
                self.emit(WorkflowEvent::ValidationFailed {
                    errors: report.errors.clone(),
                });
                let mut rejected = ExecutionReport::rejected(
                    report
                        .errors
                        .into_iter()
                        .map(|issue| ExecutionIssue::Validation { issue })
                        .collect(),
                );
                rejected.execution_id = execution_id;
                return rejected;
            }
            if !report.warnings.is_empty() {
                self.emit(WorkflowEvent::ValidationWarnings {
                    warnings: report.warnings,
                });
            }
        }

        {
            let mut run = self.run.lock();
            *run = RunState::default();
            for node in &graph.nodes {
                run.states.insert(node.id.clone(), NodeState::Pending);
            }
        }

        log::info!(
            "Starting workflow run {} with {} nodes",
            execution_id,
            graph.len()
        );
        self.emit(WorkflowEvent::WorkflowStarted {
            execution_id: execution_id.clone(),
            node_count: graph.len(),
        });
        for node in &graph.nodes {
            self.emit(WorkflowEvent::state_changed(&node.id, NodeState::Pending));
        }

        let roots = graph.root_nodes();
        if roots.is_empty() {
            let error = "No root node found; check the connections".to_string();
            log::error!("Workflow run {} failed: {}", execution_id, error);
            self.emit(WorkflowEvent::WorkflowError {
                execution_id: execution_id.clone(),
                error: error.clone(),
            });
            self.run.lock().issues.push(ExecutionIssue::Engine { error });
            return self.snapshot(false, false);
        }
        log::debug!("Root nodes: {:?}", roots);

        join_all(roots.into_iter().map(|root| self.walk(graph, root))).await;

        if self.cancelled.load(Ordering::SeqCst) {
            log::info!("Workflow run {} stopped", execution_id);
            return self.snapshot(false, true);
        }

        let (has_errors, unfinished) = {
            let run = self.run.lock();
            let has_errors = run.states.values().any(|s| *s == NodeState::Error);
            let unfinished: Vec<NodeId> = graph
                .nodes
                .iter()
                .filter(|n| {
                    matches!(
                        run.states.get(&n.id),
                        Some(NodeState::Pending | NodeState::Ready)
                    )
                })
                .map(|n| n.id.clone())
                .collect();
            (has_errors, unfinished)
        };
        if !unfinished.is_empty() {
            let error = format!(
                "Nodes never became ready: {}",
                unfinished.join(", ")
            );
            log::error!("Workflow run {} failed: {}", execution_id, error);
            self.emit(WorkflowEvent::WorkflowError {
                execution_id: execution_id.clone(),
                error: error.clone(),
            });
            self.run.lock().issues.push(ExecutionIssue::Engine { error });
        }

        let success = !has_errors && unfinished.is_empty();
        log::info!(
            "Workflow run {} finished (success: {})",
            execution_id,
            success
        );
        self.emit(WorkflowEvent::WorkflowDone {
            execution_id,
            success,
        });
        self.snapshot(success, false)
    }

    /// Follow one root's successor chain depth-first
    async fn walk(&self, graph: &WorkflowGraph, root: NodeId) {
        let mut stack = vec![root];

        while let Some(node_id) = stack.pop() {
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }
            if !self.try_claim(graph, &node_id) {
                continue;
            }
            if self.execute_claimed(graph, &node_id).await {
                for next in graph.successors(&node_id).iter().rev() {
                    stack.push(next.clone());
                }
            }
        }
    }

    /// Move a node to RUNNING if all its predecessors completed
    fn try_claim(&self, graph: &WorkflowGraph, node_id: &str) -> bool {
        let changes = {
            let mut run = self.run.lock();
            let Some(&current) = run.states.get(node_id) else {
                return false;
            };
            if current.is_terminal() || current == NodeState::Running {
                return false;
            }

            let waiting_on = graph.predecessors(node_id).into_iter().find(|pred| {
                run.states
                    .get(pred)
                    .is_some_and(|s| *s != NodeState::Completed)
            });
            if let Some(pred) = waiting_on {
                log::debug!("Node '{}' waits for '{}'", node_id, pred);
                return false;
            }

            let mut changes = Vec::with_capacity(2);
            if current == NodeState::Pending && run.transition(node_id, NodeState::Ready) {
                changes.push(NodeState::Ready);
            }
            if !run.transition(node_id, NodeState::Running) {
                return false;
            }
            changes.push(NodeState::Running);
            changes
        };

        for state in changes {
            self.emit(WorkflowEvent::state_changed(node_id, state));
        }
        true
    }

    /// Execute a claimed node; true when it completed
    async fn execute_claimed(&self, graph: &WorkflowGraph, node_id: &str) -> bool {
        let Some(node) = graph.find_node(node_id) else {
            return false;
        };

        self.emit(WorkflowEvent::NodeStarted {
            node_id: node_id.to_string(),
        });
        let inputs = self.resolve_inputs(graph, node);
        log::debug!(
            "Executing '{}' ({}) with {} inputs",
            node_id,
            node.display_label(),
            inputs.len()
        );

        let outcome = self.invoke(node, &inputs).await;

        if self.cancelled.load(Ordering::SeqCst) {
            log::warn!("Discarding result of '{}' returned after stop", node_id);
            return false;
        }

        match outcome {
            Ok(outputs) => self.complete_node(node_id, outputs),
            Err(error) => {
                self.fail_node(graph, node_id, failure_message(error));
                false
            }
        }
    }

    /// Input ports with values taken from upstream results where wired
    fn resolve_inputs(&self, graph: &WorkflowGraph, node: &GraphNode) -> Vec<Port> {
        let run = self.run.lock();
        node.inputs
            .iter()
            .map(|port| {
                let mut port = port.clone();
                let upstream = graph
                    .incoming_edges(&node.id)
                    .find(|e| e.target_handle == port.id)
                    .and_then(|edge| {
                        let outputs = run.results.get(&edge.source)?;
                        outputs
                            .iter()
                            .find(|o| o.id == edge.source_handle)
                            .or_else(|| outputs.iter().find(|o| o.name == edge.source_handle))
                    });
                if let Some(output) = upstream {
                    port.value = output.value.clone();
                }
                port
            })
            .collect()
    }

    /// Compute a node's outputs through the executor or the local fallback
    async fn invoke(&self, node: &GraphNode, inputs: &[Port]) -> Result<Vec<Port>> {
        let mut outputs = node.outputs.clone();

        let Some(request) = ExecutionRequest::for_node(node, inputs) else {
            local_fallback(inputs, &mut outputs);
            return Ok(outputs);
        };

        let call = self.executor.execute(request);
        let response = match self.config.node_timeout() {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                EngineError::Timeout {
                    node_id: node.id.clone(),
                    seconds: limit.as_secs(),
                }
            })??,
            None => call.await?,
        };

        if !response.success {
            return Err(EngineError::failed(
                response
                    .error
                    .unwrap_or_else(|| format!("Execution failed for {}", node.id)),
            ));
        }
        if let Some(result) = response.outputs {
            merge_outputs(&mut outputs, result);
        }
        Ok(outputs)
    }

    fn complete_node(&self, node_id: &str, outputs: Vec<Port>) -> bool {
        let completed = {
            let mut run = self.run.lock();
            let ok = run.transition(node_id, NodeState::Completed);
            if ok {
                run.results.insert(node_id.to_string(), outputs.clone());
            }
            ok
        };
        if !completed {
            return false;
        }

        self.emit(WorkflowEvent::state_changed(node_id, NodeState::Completed));
        self.emit(WorkflowEvent::NodeResult {
            node_id: node_id.to_string(),
            outputs,
        });
        self.emit(WorkflowEvent::NodeDone {
            node_id: node_id.to_string(),
        });
        true
    }

    /// Mark a node ERROR and skip everything downstream of it
    fn fail_node(&self, graph: &WorkflowGraph, node_id: &str, message: String) {
        log::error!("Node '{}' failed: {}", node_id, message);

        let failed = {
            let mut run = self.run.lock();
            let ok = run.transition(node_id, NodeState::Error);
            if ok {
                run.issues.push(ExecutionIssue::NodeFailed {
                    node_id: node_id.to_string(),
                    error: message.clone(),
                });
            }
            ok
        };
        if !failed {
            return;
        }

        self.emit(WorkflowEvent::state_changed(node_id, NodeState::Error));
        self.emit(WorkflowEvent::node_error(node_id, message));
        self.emit(WorkflowEvent::NodeDone {
            node_id: node_id.to_string(),
        });

        let reason = format!("Dependency {} failed", node_id);
        let skipped: Vec<NodeId> = {
            let mut run = self.run.lock();
            let skipped: Vec<NodeId> = graph
                .descendants(node_id)
                .into_iter()
                .filter(|id| run.transition(id, NodeState::Skipped))
                .collect();
            for id in &skipped {
                run.issues.push(ExecutionIssue::NodeSkipped {
                    node_id: id.clone(),
                    reason: reason.clone(),
                });
            }
            skipped
        };

        for id in skipped {
            log::warn!("Skipping '{}': {}", id, reason);
            self.emit(WorkflowEvent::state_changed(&id, NodeState::Skipped));
            self.emit(WorkflowEvent::NodeSkipped {
                node_id: id,
                reason: reason.clone(),
            });
        }
    }

    /// Run one node on its own, outside any run
    ///
    /// Uses the node's preset input values. The node must have a package
    /// binding.
    pub async fn execute_node(&self, node: &GraphNode) -> Result<Vec<Port>> {
        if node.package_binding().is_none() {
            return Err(EngineError::failed(format!(
                "Node '{}' has no package binding",
                node.id
            )));
        }

        self.emit(WorkflowEvent::NodeStarted {
            node_id: node.id.clone(),
        });
        match self.invoke(node, &node.inputs).await {
            Ok(outputs) => {
                self.emit(WorkflowEvent::NodeResult {
                    node_id: node.id.clone(),
                    outputs: outputs.clone(),
                });
                self.emit(WorkflowEvent::NodeDone {
                    node_id: node.id.clone(),
                });
                Ok(outputs)
            }
            Err(error) => {
                log::error!("Manual execution of '{}' failed: {}", node.id, error);
                self.emit(WorkflowEvent::node_error(&node.id, error.to_string()));
                Err(error)
            }
        }
    }

    fn snapshot(&self, success: bool, cancelled: bool) -> ExecutionReport {
        let run = self.run.lock();
        ExecutionReport {
            execution_id: self.execution_id(),
            success,
            cancelled,
            results: run
                .results
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            errors: run.issues.clone(),
            states: run.states.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    fn emit(&self, event: WorkflowEvent) {
        let sinks = self.sinks.read().clone();
        for sink in sinks {
            if let Err(e) = sink.send(event.clone()) {
                log::warn!("Failed to deliver workflow event: {}", e);
            }
        }
    }
}

/// The message reported for a node failure
fn failure_message(error: EngineError) -> String {
    match error {
        EngineError::ExecutionFailed(message) => message,
        other => other.to_string(),
    }
}
