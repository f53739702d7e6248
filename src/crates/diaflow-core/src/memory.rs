//! Forgetting strategies for person history
//!
//! A forget mode controls which of a person's own prior messages are visible
//! on the current call. Forgetting is a view over the append-only log, never
//! a destructive edit, and it applies only to history loaded from the
//! conversation manager. Values arriving through arrows are cross-node data
//! and pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Policy for filtering a person's own conversation history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForgetMode {
    /// Keep the full history
    #[default]
    NoForget,
    /// After the first execution, keep system messages and the last user
    /// message only
    OnEveryTurn,
    /// Clear the history only when the memory config sets `forget_requested`
    UponRequest,
}

/// Apply a forget mode to a conversation-state value.
///
/// Operates on `{messages: [...]}` payloads; any other shape is returned
/// unchanged (or nulled for `upon_request` with an explicit request, where
/// there is no history to keep). Pure: callers own the decision of what the
/// value represents.
pub fn apply_forget(
    mode: ForgetMode,
    value: Value,
    execution_count: u32,
    memory_config: &Map<String, Value>,
) -> Value {
    match mode {
        ForgetMode::NoForget => value,
        ForgetMode::OnEveryTurn => {
            if execution_count == 0 {
                return value;
            }
            reduce_to_recent(value)
        }
        ForgetMode::UponRequest => {
            let requested = memory_config
                .get("forget_requested")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !requested {
                return value;
            }
            match value {
                Value::Object(mut map) if map.contains_key("messages") => {
                    map.insert("messages".to_string(), Value::Array(Vec::new()));
                    Value::Object(map)
                }
                _ => Value::Null,
            }
        }
    }
}

/// Keep system messages plus the last user message of a `{messages}` payload.
fn reduce_to_recent(value: Value) -> Value {
    let mut map = match value {
        Value::Object(map) => map,
        other => return other,
    };
    let Some(Value::Array(messages)) = map.get("messages") else {
        return Value::Object(map);
    };

    let system: Vec<Value> = messages
        .iter()
        .filter(|m| m.get("role").and_then(Value::as_str) == Some("system"))
        .cloned()
        .collect();
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        .cloned();

    let mut kept = system;
    if let Some(user) = last_user {
        kept.push(user);
    } else {
        // No user message to anchor on; leave the payload alone.
        return Value::Object(map);
    }

    map.insert("messages".to_string(), Value::Array(kept));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conversation() -> Value {
        json!({
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "ok"},
                {"role": "user", "content": "second"},
            ]
        })
    }

    #[test]
    fn no_forget_is_identity() {
        let value = conversation();
        assert_eq!(
            apply_forget(ForgetMode::NoForget, value.clone(), 5, &Map::new()),
            value
        );
    }

    #[test]
    fn on_every_turn_skips_first_execution() {
        let value = conversation();
        assert_eq!(
            apply_forget(ForgetMode::OnEveryTurn, value.clone(), 0, &Map::new()),
            value
        );
    }

    #[test]
    fn on_every_turn_keeps_system_and_last_user() {
        let reduced = apply_forget(ForgetMode::OnEveryTurn, conversation(), 1, &Map::new());
        let messages = reduced["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "second");
    }

    #[test]
    fn on_every_turn_leaves_non_conversation_values() {
        let scalar = json!("just text");
        assert_eq!(
            apply_forget(ForgetMode::OnEveryTurn, scalar.clone(), 3, &Map::new()),
            scalar
        );
    }

    #[test]
    fn upon_request_requires_flag() {
        let value = conversation();
        assert_eq!(
            apply_forget(ForgetMode::UponRequest, value.clone(), 2, &Map::new()),
            value
        );

        let mut config = Map::new();
        config.insert("forget_requested".to_string(), json!(true));
        let cleared = apply_forget(ForgetMode::UponRequest, value, 2, &config);
        assert!(cleared["messages"].as_array().unwrap().is_empty());
    }

    #[test]
    fn upon_request_nulls_scalars() {
        let mut config = Map::new();
        config.insert("forget_requested".to_string(), json!(true));
        assert_eq!(
            apply_forget(ForgetMode::UponRequest, json!("scalar"), 2, &config),
            Value::Null
        );
    }
}
