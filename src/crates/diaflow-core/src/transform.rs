//! Arrow content-type transformations
//!
//! Each content type is a pure strategy applied to the value flowing through
//! an arrow: `transform(value, arrow, source_output) -> value`. Strategies
//! never fail the run; malformed configuration logs a warning and passes the
//! value through unchanged.

use crate::graph::Arrow;
use crate::output::NodeOutput;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Classification of the value flowing through an arrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Coerce scalars to strings; lists and maps pass through
    RawText,
    /// Normalize to a `{messages: [...]}` conversation payload
    ConversationState,
    /// Identity; reserved for variable-reference resolution
    Variable,
    /// Parse or stringify JSON per the arrow's data
    Json,
    /// Substitute placeholders in a template from the arrow's data
    Template,
    /// Reduce a list by a configured aggregation
    Aggregation,
    /// Drop items or keys failing a predicate
    Filter,
    /// React to upstream error outputs
    ErrorHandling,
}

fn arrow_data(arrow: &Arrow) -> Map<String, Value> {
    match &arrow.data {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// Apply a content-type strategy to a value.
pub fn transform(
    content_type: ContentType,
    value: Value,
    arrow: &Arrow,
    source: &NodeOutput,
) -> Value {
    match content_type {
        ContentType::RawText => raw_text(value),
        ContentType::ConversationState => conversation_state(value),
        ContentType::Variable => value,
        ContentType::Json => json_strategy(value, arrow),
        ContentType::Template => template_strategy(value, arrow, source),
        ContentType::Aggregation => aggregation(value, arrow),
        ContentType::Filter => filter(value, arrow),
        ContentType::ErrorHandling => error_handling(value, arrow, source),
    }
}

fn raw_text(value: Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => value,
        Value::String(_) => value,
        Value::Null => Value::String(String::new()),
        other => Value::String(other.to_string()),
    }
}

fn conversation_state(value: Value) -> Value {
    match value {
        Value::Object(ref map) if map.contains_key("messages") => value,
        Value::Array(messages) => json!({ "messages": messages }),
        other => json!({
            "messages": [{"role": "user", "content": raw_text(other)}]
        }),
    }
}

fn json_strategy(value: Value, arrow: &Arrow) -> Value {
    let data = arrow_data(arrow);
    if data.get("parse_json").and_then(Value::as_bool).unwrap_or(false) {
        if let Value::String(text) = &value {
            return match serde_json::from_str(text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(arrow = %arrow.id, error = %e, "failed to parse JSON");
                    value
                }
            };
        }
        return value;
    }
    if data
        .get("stringify_json")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let indent = data
            .get("json_indent")
            .and_then(Value::as_u64)
            .unwrap_or(2) as usize;
        return Value::String(stringify_with_indent(&value, indent));
    }
    value
}

fn stringify_with_indent(value: &Value, indent: usize) -> String {
    if indent == 0 {
        return value.to_string();
    }
    let pad = " ".repeat(indent);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    if serde::Serialize::serialize(value, &mut serializer).is_err() {
        return value.to_string();
    }
    String::from_utf8(buf).unwrap_or_else(|_| value.to_string())
}

fn template_strategy(value: Value, arrow: &Arrow, source: &NodeOutput) -> Value {
    let data = arrow_data(arrow);
    let Some(template) = data.get("template").and_then(Value::as_str) else {
        return value;
    };

    let mut bindings = Map::new();
    bindings.insert("value".to_string(), value.clone());
    if let Some(node_id) = &source.node_id {
        bindings.insert("source_node_id".to_string(), json!(node_id));
    }
    if let Some(label) = &arrow.label {
        bindings.insert("arrow_label".to_string(), json!(label));
    }
    bindings.insert(
        "metadata".to_string(),
        Value::Object(source.metadata.clone()),
    );

    let rendered = crate::template::render(template, &bindings);
    Value::String(rendered.content)
}

fn as_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn aggregation(value: Value, arrow: &Arrow) -> Value {
    let data = arrow_data(arrow);
    let kind = data
        .get("aggregation")
        .and_then(Value::as_str)
        .unwrap_or("list");
    let items = as_list(value);

    match kind {
        "concat" => Value::String(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" "),
        ),
        "sum" => {
            let sum: f64 = items.iter().filter_map(numeric).sum();
            json!(sum)
        }
        "count" => json!(items.len()),
        "first" => items.into_iter().next().unwrap_or(Value::Null),
        "last" => items.into_iter().next_back().unwrap_or(Value::Null),
        _ => Value::Array(items),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn filter(value: Value, arrow: &Arrow) -> Value {
    let data = arrow_data(arrow);
    let Some(Value::Object(config)) = data.get("filter") else {
        return value;
    };

    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|item| passes(item, config))
                .collect(),
        ),
        Value::Object(map) => filter_map(map, config),
        scalar => {
            if passes(&scalar, config) {
                scalar
            } else {
                Value::Null
            }
        }
    }
}

fn filter_map(map: Map<String, Value>, config: &Map<String, Value>) -> Value {
    let keys = |name: &str| -> Option<Vec<String>> {
        config.get(name).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
    };

    if let Some(include) = keys("include_keys") {
        return Value::Object(
            map.into_iter()
                .filter(|(k, _)| include.iter().any(|i| i == k))
                .collect(),
        );
    }
    if let Some(exclude) = keys("exclude_keys") {
        return Value::Object(
            map.into_iter()
                .filter(|(k, _)| !exclude.iter().any(|e| e == k))
                .collect(),
        );
    }
    Value::Object(map)
}

fn passes(value: &Value, config: &Map<String, Value>) -> bool {
    let kind = config.get("type").and_then(Value::as_str).unwrap_or("equals");
    let expected = config.get("value").unwrap_or(&Value::Null);

    match kind {
        "equals" => value == expected,
        "not_equals" => value != expected,
        "contains" => {
            let haystack = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let needle = match expected {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            haystack.contains(&needle)
        }
        "greater_than" => match (numeric(value), numeric(expected)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        "less_than" => match (numeric(value), numeric(expected)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        _ => true,
    }
}

fn error_handling(value: Value, arrow: &Arrow, source: &NodeOutput) -> Value {
    let is_error = source
        .metadata
        .get("error")
        .map(|v| match v {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
        .unwrap_or(false);
    if !is_error {
        return value;
    }

    let data = arrow_data(arrow);
    let on_error = data
        .get("on_error")
        .and_then(Value::as_str)
        .unwrap_or("pass_through");
    match on_error {
        "default_value" => data.get("default_value").cloned().unwrap_or(json!("")),
        "skip" => Value::Null,
        "transform" => json!({
            "error": true,
            "message": raw_text(value),
            "source": source.node_id,
        }),
        _ => value,
    }
}
