//! Prompt templates
//!
//! Substitutes `{{var}}` and `{var}` placeholders from a value map. Missing
//! variables are left in place and reported back so callers can log them;
//! a template failure never brings down a run.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

fn double_brace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][\w.]*)\s*\}\}").expect("valid regex"))
}

fn single_brace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][\w.]*)\}").expect("valid regex"))
}

/// Outcome of rendering a template.
#[derive(Debug, Clone)]
pub struct Rendered {
    /// Rendered text, with unresolved placeholders left in place
    pub content: String,
    /// Variables that had no binding
    pub missing: Vec<String>,
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lookup<'a>(values: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    if let Some(v) = values.get(name) {
        return Some(v);
    }
    // Dotted names walk into nested objects.
    let mut parts = name.split('.');
    let mut current = values.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

/// Render a template, resolving `{{var}}` first and then bare `{var}`.
pub fn render(template: &str, values: &Map<String, Value>) -> Rendered {
    let mut missing = Vec::new();

    let pass1 = double_brace_re().replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match lookup(values, name) {
            Some(v) => value_to_text(v),
            None => {
                missing.push(name.to_string());
                caps[0].to_string()
            }
        }
    });

    let content = single_brace_re()
        .replace_all(&pass1, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match lookup(values, name) {
                Some(v) => value_to_text(v),
                None => {
                    missing.push(name.to_string());
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    missing.sort();
    missing.dedup();
    if !missing.is_empty() {
        tracing::warn!(missing = ?missing, "template variables unresolved");
    }
    Rendered { content, missing }
}

/// Whether a template references conversation variables directly.
///
/// When it does, the person-job handler skips conversation auto-prepend so
/// the same history is not injected twice.
pub fn references_conversation(template: &str) -> bool {
    for re in [double_brace_re(), single_brace_re()] {
        for caps in re.captures_iter(template) {
            let name = &caps[1];
            if name == "global_conversation"
                || name == "conversation"
                || name.ends_with("_messages")
                || name.ends_with("_last_message")
            {
                return true;
            }
        }
    }
    false
}

/// Flatten resolved inputs into template bindings.
///
/// Scalars bind directly. Conversation-state payloads additionally expose
/// `{key}_last_message` and `{key}_messages`. Wrapped `{value: {default}}`
/// shapes unwrap to their default entry.
pub fn prepare_values(inputs: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in inputs {
        match value {
            Value::Object(obj) if obj.contains_key("messages") => {
                if let Some(Value::Array(messages)) = obj.get("messages") {
                    if let Some(last) = messages.last() {
                        if let Some(content) = last.get("content") {
                            out.insert(format!("{key}_last_message"), content.clone());
                        }
                    }
                    out.insert(format!("{key}_messages"), Value::Array(messages.clone()));
                }
            }
            Value::Object(obj) => {
                if let Some(Value::Object(inner)) = obj.get("value") {
                    if let Some(default) = inner.get("default") {
                        out.insert(key.clone(), default.clone());
                        continue;
                    }
                }
                out.insert(key.clone(), value.clone());
            }
            other => {
                out.insert(key.clone(), other.clone());
            }
        }
    }
    out
}

/// Prepend up to `limit` recent conversation lines to a prompt.
pub fn prepend_conversation(prompt: &str, messages: &[Value], limit: usize) -> String {
    if messages.is_empty() || limit == 0 {
        return prompt.to_string();
    }
    let start = messages.len().saturating_sub(limit);
    let mut lines = Vec::with_capacity(messages.len() - start + 2);
    lines.push("Previous conversation:".to_string());
    for message in &messages[start..] {
        let role = message
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("user");
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        lines.push(format!("{role}: {content}"));
    }
    lines.push(String::new());
    lines.push(prompt.to_string());
    lines.join("\n")
}
