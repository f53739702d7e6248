//! Input resolution
//!
//! Builds a ready node's input map from its incoming arrows. For each arrow,
//! a value is extracted from the source output (arrow label key, then source
//! handle key, then `default`, then the whole value), run through the
//! arrow's content-type transformation, and stored under the arrow's label,
//! the target handle name, or `default`. Arrows are processed in source-id
//! order, so colliding keys resolve last-write-wins deterministically.
//!
//! Every resolved entry keeps its arrow metadata. That marker identifies the
//! value as cross-node data, which the forgetting strategies must never
//! touch; only history loaded from the conversation manager is filtered.

use crate::context::ExecutionContext;
use crate::graph::{Arrow, ArrowId, Node, NodeId, DEFAULT_HANDLE};
use crate::output::NodeOutput;
use crate::resolver::DependencyResolver;
use crate::transform::{transform, ContentType};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One input delivered through an arrow, with its provenance.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    /// Transformed value
    pub value: Value,
    /// Arrow that carried the value
    pub arrow_id: ArrowId,
    /// Arrow label, when present
    pub label: Option<String>,
    /// Content type that was applied
    pub content_type: ContentType,
    /// Source node id
    pub source_node: NodeId,
    /// Source handle the value was read from
    pub source_handle: String,
    /// Whether the arrow was a first-only input
    pub first_only: bool,
}

/// Input map for one node execution, keyed by resolved input name.
#[derive(Debug, Clone, Default)]
pub struct ResolvedInputs {
    entries: BTreeMap<String, ResolvedInput>,
}

impl ResolvedInputs {
    /// Number of distinct input keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no inputs were resolved.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Input under a key.
    pub fn get(&self, key: &str) -> Option<&ResolvedInput> {
        self.entries.get(key)
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResolvedInput)> {
        self.entries.iter()
    }

    /// Plain key/value view for handlers and templates.
    pub fn values(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// Single value passthrough: one input yields that value, several yield
    /// the whole map, none yields an empty object. Condition handlers use
    /// this to forward their inputs.
    pub fn collapsed_value(&self) -> Value {
        match self.entries.len() {
            0 => Value::Object(Map::new()),
            1 => self
                .entries
                .values()
                .next()
                .map(|entry| entry.value.clone())
                .unwrap_or(Value::Null),
            _ => Value::Object(self.values()),
        }
    }

    /// Messages carried by conversation-state inputs, in key order.
    pub fn conversation_fragments(&self) -> Vec<Value> {
        let mut fragments = Vec::new();
        for entry in self.entries.values() {
            if entry.content_type != ContentType::ConversationState {
                continue;
            }
            if let Some(Value::Array(messages)) = entry.value.get("messages") {
                fragments.extend(messages.iter().cloned());
            }
        }
        fragments
    }
}

/// Extract the per-arrow value from a source output.
///
/// Precedence: arrow label key, source handle key, `default` key, whole
/// value. Non-object outputs are taken whole.
fn extract_value(output: &NodeOutput, source_handle: &str, label: Option<&str>) -> Value {
    let Value::Object(map) = &output.value else {
        return output.value.clone();
    };
    if let Some(label) = label {
        if let Some(v) = map.get(label) {
            return v.clone();
        }
    }
    if let Some(v) = map.get(source_handle) {
        return v.clone();
    }
    if let Some(v) = map.get(DEFAULT_HANDLE) {
        return v.clone();
    }
    output.value.clone()
}

/// Key the resolved value is stored under: label, target handle, `default`.
fn input_key(arrow: &Arrow) -> String {
    if let Some(label) = &arrow.label {
        if !label.is_empty() {
            return label.clone();
        }
    }
    arrow.target.base_handle().to_string()
}

/// Build the input map for a ready node.
pub fn resolve(node: &Node, ctx: &ExecutionContext) -> ResolvedInputs {
    let execution_count = ctx.execution_count(&node.id);
    let mut arrows: Vec<&Arrow> = ctx.graph.incoming(&node.id).collect();
    arrows.sort_by(|a, b| {
        a.source
            .node_id
            .cmp(&b.source.node_id)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut inputs = ResolvedInputs::default();
    for arrow in arrows {
        let first_only = DependencyResolver::is_first_only(arrow, node);
        if first_only && execution_count > 0 {
            // Consumed on the first execution.
            continue;
        }

        let source_id = &arrow.source.node_id;
        let Some(output) = ctx.outputs.get(source_id) else {
            continue;
        };
        if let Some(source) = ctx.graph.node(source_id) {
            if source.kind == crate::graph::NodeKind::Condition
                && !DependencyResolver::branch_valid(arrow, ctx)
            {
                continue;
            }
        }

        let raw = extract_value(output, &arrow.source.handle, arrow.label.as_deref());
        let content_type = arrow.content_type.unwrap_or(ContentType::RawText);
        let value = transform(content_type, raw, arrow, output);

        tracing::debug!(
            node = %node.id,
            arrow = %arrow.id,
            source = %source_id,
            content_type = ?content_type,
            "resolved input"
        );

        inputs.entries.insert(
            input_key(arrow),
            ResolvedInput {
                value,
                arrow_id: arrow.id.clone(),
                label: arrow.label.clone(),
                content_type,
                source_node: source_id.clone(),
                source_handle: arrow.source.handle.clone(),
                first_only,
            },
        );
    }
    inputs
}
