//! Node outputs and token accounting
//!
//! Every handler produces a [`NodeOutput`]: a structured value (either a
//! scalar or a map keyed by output handle, default key `"default"`), free-form
//! metadata, and optional token usage. Outputs are owned by the execution
//! context for the lifetime of a run and read by downstream input resolution.

use crate::conversation::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which a single-valued output is stored when the value is a map.
pub const DEFAULT_HANDLE: &str = "default";

/// Token counts reported by an LLM call, accumulated per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens consumed
    pub input: u64,
    /// Completion tokens produced
    pub output: u64,
    /// Tokens served from provider-side cache
    pub cached: u64,
}

impl TokenUsage {
    /// Total tokens across input, output, and cached counts.
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cached
    }

    /// Add another usage record into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cached += other.cached;
    }
}

/// Result of executing one node.
///
/// `value` is either a scalar or a map keyed by output handle; downstream
/// arrows select a key by label, source handle, or [`DEFAULT_HANDLE`].
/// Condition handlers report their boolean through
/// `metadata["conditionResult"]` while passing their inputs through as the
/// value, so downstream nodes still receive data on either branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Structured output value
    pub value: Value,
    /// Free-form handler metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Token usage for LLM-backed nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// Node that produced this output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Nodes whose work this output accounts for (passthrough bookkeeping)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub executed_nodes: Vec<String>,
    /// Conversation fragments carried by person outputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<Vec<Message>>,
}

impl NodeOutput {
    /// Create an output with the given value and empty metadata.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            metadata: Map::new(),
            token_usage: None,
            node_id: None,
            executed_nodes: Vec::new(),
            conversation: None,
        }
    }

    /// Wrap a scalar under the default handle key.
    pub fn scalar(value: Value) -> Self {
        let mut map = Map::new();
        map.insert(DEFAULT_HANDLE.to_string(), value);
        Self::new(Value::Object(map))
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach token usage.
    pub fn with_tokens(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }

    /// Whether the handler reported this result as a skip rather than a run.
    pub fn is_skip(&self) -> bool {
        self.metadata
            .get("skipped")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether a skip result carries the previous output for downstream use.
    pub fn is_passthrough(&self) -> bool {
        self.metadata
            .get("passthrough")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Value stored under the default handle, or the whole value when scalar.
    pub fn default_value(&self) -> &Value {
        match &self.value {
            Value::Object(map) => map.get(DEFAULT_HANDLE).unwrap_or(&self.value),
            other => other,
        }
    }
}
