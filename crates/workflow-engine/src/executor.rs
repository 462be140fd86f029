//! Node execution seam
//!
//! The engine never computes package nodes itself. It hands each bound node
//! to a [`NodeExecutor`] and merges what comes back into the node's output
//! ports. Nodes without a package binding run a small local fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{GraphNode, NodeId, Port, PortDataType};

/// One resolved input value sent with a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputValue {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: PortDataType,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl From<&Port> for InputValue {
    fn from(port: &Port) -> Self {
        Self {
            id: port.id.clone(),
            name: port.name.clone(),
            data_type: port.data_type,
            value: port.value.clone(),
        }
    }
}

/// Request to execute one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub node_id: NodeId,
    pub package_name: String,
    pub node_name: String,
    pub inputs: Vec<InputValue>,
}

impl ExecutionRequest {
    /// Build a request for a bound node with already resolved inputs
    ///
    /// Returns `None` when the node lacks a package binding.
    pub fn for_node(node: &GraphNode, inputs: &[Port]) -> Option<Self> {
        let (package_name, node_name) = node.package_binding()?;
        Some(Self {
            node_id: node.id.clone(),
            package_name: package_name.to_string(),
            node_name: node_name.to_string(),
            inputs: inputs.iter().map(InputValue::from).collect(),
        })
    }
}

/// One output entry returned by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Outputs of a successful execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeOutputs {
    /// Per-port entries matched onto the node's outputs
    Ports(Vec<OutputValue>),
    /// A single value for the first output
    Value(serde_json::Value),
}

/// Backend answer for one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<NodeOutputs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResponse {
    /// A successful response with per-port outputs
    pub fn ok(outputs: Vec<OutputValue>) -> Self {
        Self {
            success: true,
            outputs: Some(NodeOutputs::Ports(outputs)),
            error: None,
        }
    }

    /// A failed response carrying a message
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            outputs: None,
            error: Some(error.into()),
        }
    }
}

/// Executes single nodes on behalf of the engine
///
/// `Err` means the call itself was rejected (transport failure etc.);
/// a computation failure comes back as `Ok` with `success: false`.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResponse>;
}

/// Merge backend outputs into a node's output ports
///
/// List entries match a port by id, then by name, then by index. Any other
/// value replaces the first output. Entries matching nothing are ignored.
pub fn merge_outputs(ports: &mut [Port], outputs: NodeOutputs) {
    match outputs {
        NodeOutputs::Ports(entries) => {
            for entry in entries {
                let position = entry
                    .id
                    .as_deref()
                    .and_then(|id| ports.iter().position(|p| p.id == id))
                    .or_else(|| {
                        entry
                            .name
                            .as_deref()
                            .and_then(|name| ports.iter().position(|p| p.name == name))
                    })
                    .or(entry.index.filter(|i| *i < ports.len()));

                match position {
                    Some(i) => ports[i].value = entry.value,
                    None => log::debug!(
                        "Ignoring output entry with no matching port (id={:?}, name={:?}, index={:?})",
                        entry.id,
                        entry.name,
                        entry.index
                    ),
                }
            }
        }
        NodeOutputs::Value(value) => {
            if let Some(first) = ports.first_mut() {
                first.value = value;
            }
        }
    }
}

/// Local computation for nodes without a package binding
///
/// A node with inputs writes the numeric sum of its input values to its
/// first output; non-numeric values are ignored. A source node keeps its
/// preset output values.
pub fn local_fallback(inputs: &[Port], outputs: &mut [Port]) {
    if inputs.is_empty() {
        return;
    }

    let sum: f64 = inputs.iter().filter_map(|p| p.value.as_f64()).sum();
    if let Some(first) = outputs.first_mut() {
        first.value = serde_json::Number::from_f64(sum)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted executor for engine tests

    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::error::EngineError;

    /// Per-node behaviour of [`ScriptedExecutor`]
    #[derive(Debug, Clone, Default)]
    pub struct Script {
        pub delay_ms: u64,
        pub fail: Option<String>,
        pub reject: bool,
        pub output: Option<serde_json::Value>,
    }

    /// Executor that echoes the first input (or a scripted value) after an
    /// optional delay, and records every call
    #[derive(Default)]
    pub struct ScriptedExecutor {
        scripts: HashMap<NodeId, Script>,
        calls: Mutex<Vec<NodeId>>,
        active: Mutex<HashSet<NodeId>>,
        max_active: Mutex<usize>,
    }

    impl ScriptedExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(mut self, node_id: &str, script: Script) -> Self {
            self.scripts.insert(node_id.to_string(), script);
            self
        }

        pub fn delay(self, node_id: &str, delay_ms: u64) -> Self {
            self.script(
                node_id,
                Script {
                    delay_ms,
                    ..Default::default()
                },
            )
        }

        pub fn failing(self, node_id: &str, message: &str) -> Self {
            self.script(
                node_id,
                Script {
                    fail: Some(message.to_string()),
                    ..Default::default()
                },
            )
        }

        pub fn calls(&self) -> Vec<NodeId> {
            self.calls.lock().clone()
        }

        pub fn max_concurrent(&self) -> usize {
            *self.max_active.lock()
        }
    }

    #[async_trait]
    impl NodeExecutor for ScriptedExecutor {
        async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResponse> {
            let script = self.scripts.get(&request.node_id).cloned().unwrap_or_default();
            self.calls.lock().push(request.node_id.clone());
            {
                let mut active = self.active.lock();
                active.insert(request.node_id.clone());
                let mut max = self.max_active.lock();
                *max = (*max).max(active.len());
            }

            if script.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
            }
            self.active.lock().remove(&request.node_id);

            if script.reject {
                return Err(EngineError::backend("connection refused"));
            }
            if let Some(message) = script.fail {
                return Ok(ExecutionResponse::failed(message));
            }

            let value = script.output.unwrap_or_else(|| {
                request
                    .inputs
                    .first()
                    .map(|input| input.value.clone())
                    .unwrap_or(serde_json::Value::Null)
            });
            Ok(ExecutionResponse {
                success: true,
                outputs: Some(NodeOutputs::Value(value)),
                error: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ports() -> Vec<Port> {
        vec![
            Port::new("sum", "Sum", PortDataType::Float),
            Port::new("count", "Count", PortDataType::Int),
        ]
    }

    #[test]
    fn test_merge_matches_id_then_name_then_index() {
        let mut outputs = ports();
        merge_outputs(
            &mut outputs,
            NodeOutputs::Ports(vec![
                OutputValue {
                    id: Some("count".to_string()),
                    value: json!(3),
                    ..Default::default()
                },
                OutputValue {
                    name: Some("Sum".to_string()),
                    value: json!(1.5),
                    ..Default::default()
                },
            ]),
        );
        assert_eq!(outputs[0].value, json!(1.5));
        assert_eq!(outputs[1].value, json!(3));

        merge_outputs(
            &mut outputs,
            NodeOutputs::Ports(vec![
                OutputValue {
                    index: Some(1),
                    value: json!(7),
                    ..Default::default()
                },
                OutputValue {
                    index: Some(9),
                    value: json!("lost"),
                    ..Default::default()
                },
            ]),
        );
        assert_eq!(outputs[1].value, json!(7));
    }

    #[test]
    fn test_merge_bare_value_overwrites_first_output() {
        let mut outputs = ports();
        merge_outputs(&mut outputs, NodeOutputs::Value(json!({"k": 1})));
        assert_eq!(outputs[0].value, json!({"k": 1}));
        assert_eq!(outputs[1].value, serde_json::Value::Null);
    }

    #[test]
    fn test_local_fallback_sums_numeric_inputs() {
        let inputs = vec![
            Port::new("a", "a", PortDataType::Float).with_value(json!(2)),
            Port::new("b", "b", PortDataType::Float).with_value(json!(0.5)),
            Port::new("c", "c", PortDataType::String).with_value(json!("x")),
        ];
        let mut outputs = ports();
        local_fallback(&inputs, &mut outputs);
        assert_eq!(outputs[0].value, json!(2.5));
    }

    #[test]
    fn test_local_fallback_keeps_source_presets() {
        let mut outputs = vec![Port::new("v", "v", PortDataType::Int).with_value(json!(4))];
        local_fallback(&[], &mut outputs);
        assert_eq!(outputs[0].value, json!(4));
    }

    #[test]
    fn test_response_decodes_both_output_shapes() {
        let list: ExecutionResponse = serde_json::from_str(
            r#"{"success": true, "outputs": [{"index": 0, "name": "out", "value": 3}]}"#,
        )
        .unwrap();
        assert!(matches!(list.outputs, Some(NodeOutputs::Ports(ref v)) if v[0].index == Some(0)));

        let bare: ExecutionResponse =
            serde_json::from_str(r#"{"success": true, "outputs": 12}"#).unwrap();
        assert_eq!(bare.outputs, Some(NodeOutputs::Value(json!(12))));

        let failed: ExecutionResponse =
            serde_json::from_str(r#"{"success": false, "error": "boom"}"#).unwrap();
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_request_uses_snake_case_fields() {
        let mut node = GraphNode::new("n1", "Add");
        node.package_name = Some("openalea.math".to_string());
        node.node_name = Some("+".to_string());
        let inputs = vec![Port::new("a", "a", PortDataType::Float).with_value(json!(1))];

        let request = ExecutionRequest::for_node(&node, &inputs).unwrap();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["node_id"], "n1");
        assert_eq!(json["package_name"], "openalea.math");
        assert_eq!(json["inputs"][0]["type"], "float");

        assert!(ExecutionRequest::for_node(&GraphNode::new("x", "X"), &[]).is_none());
    }
}
