//! Condition expression evaluation
//!
//! A deliberately small expression layer for condition nodes: comparison and
//! boolean operators over values bound from the execution context. The
//! expression is normalized (`===`/`!==`/`and`/`or` aliases, `{{var}}`
//! placeholders, bare identifiers bound by substitution) and then handed to
//! `evalexpr` with an empty function table, so expressions cannot reach
//! built-ins, the file system, or the network.
//!
//! Evaluation failures are recoverable by contract: the result is `false`
//! and the error text is reported back for the node's metadata.

use evalexpr::ContextWithMutableVariables;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Outcome of evaluating a condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Boolean result; `false` when evaluation failed
    pub result: bool,
    /// Failure description, if the expression could not be evaluated
    pub error: Option<String>,
}

fn template_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][\w.]*)\s*\}\}").expect("valid regex"))
}

fn word_re(word: &str) -> Regex {
    Regex::new(&format!(r"\b{}\b", regex::escape(word))).expect("valid regex")
}

/// Render a bound value as an expression literal.
fn literal(value: &Value) -> String {
    match value {
        Value::Null => "()".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        // Structured values compare as their JSON text.
        other => format!(
            "\"{}\"",
            other.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        ),
    }
}

/// Normalize operator aliases and Python-style literals.
fn normalize(expression: &str) -> String {
    let mut expr = expression.replace("===", "==").replace("!==", "!=");
    for (word, replacement) in [("and", "&&"), ("or", "||"), ("True", "true"), ("False", "false")] {
        expr = word_re(word).replace_all(&expr, replacement).into_owned();
    }
    expr
}

/// Substitute `{{var}}` placeholders and bare identifiers with literals.
///
/// Binding keys may contain dots (`executionCount.node1`), which plain
/// identifier lookup cannot express, so substitution happens textually with
/// longest keys first.
fn substitute(expression: &str, bindings: &Map<String, Value>) -> String {
    let mut expr = template_re()
        .replace_all(expression, |caps: &regex::Captures<'_>| {
            match bindings.get(&caps[1]) {
                Some(v) => literal(v),
                None => "()".to_string(),
            }
        })
        .into_owned();

    let mut keys: Vec<&String> = bindings.keys().collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    for key in keys {
        let re = word_re(key);
        if re.is_match(&expr) {
            let lit = literal(&bindings[key]);
            expr = re.replace_all(&expr, regex::NoExpand(&lit)).into_owned();
        }
    }
    expr
}

fn truthy(value: &evalexpr::Value) -> bool {
    if let Ok(b) = value.as_boolean() {
        return b;
    }
    if let Ok(n) = value.as_number() {
        return n != 0.0;
    }
    if let Ok(s) = value.as_string() {
        return !s.is_empty();
    }
    false
}

/// Evaluate a condition expression against the given bindings.
pub fn evaluate(expression: &str, bindings: &Map<String, Value>) -> Evaluation {
    let expression = expression.trim();
    if expression.is_empty() {
        return Evaluation {
            result: false,
            error: Some("empty condition expression".to_string()),
        };
    }

    let normalized = normalize(expression);
    let substituted = substitute(&normalized, bindings);
    tracing::debug!(expression, substituted = %substituted, "evaluating condition");

    // Simple identifiers also bind through the context, covering names the
    // textual pass did not touch.
    let mut context: evalexpr::HashMapContext = evalexpr::HashMapContext::new();
    for (key, value) in bindings {
        if !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
            continue;
        }
        let bound = match value {
            Value::Bool(b) => evalexpr::Value::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    evalexpr::Value::Int(i)
                } else {
                    evalexpr::Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => evalexpr::Value::String(s.clone()),
            _ => continue,
        };
        let _ = context.set_value(key.clone(), bound);
    }

    match evalexpr::eval_with_context(&substituted, &context) {
        Ok(value) => Evaluation {
            result: truthy(&value),
            error: None,
        },
        Err(e) => {
            tracing::warn!(expression, error = %e, "condition evaluation failed");
            Evaluation {
                result: false,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn comparison_operators() {
        let b = bindings(&[("count", json!(3))]);
        assert!(evaluate("count >= 3", &b).result);
        assert!(!evaluate("count < 3", &b).result);
        assert!(evaluate("count == 3", &b).result);
        assert!(evaluate("count != 4", &b).result);
    }

    #[test]
    fn javascript_aliases_normalize() {
        let b = bindings(&[("status", json!("ok")), ("count", json!(2))]);
        assert!(evaluate("status === \"ok\" && count < 5", &b).result);
        assert!(evaluate("status !== \"bad\" || count > 10", &b).result);
    }

    #[test]
    fn word_operators_and_python_literals() {
        let b = bindings(&[("ready", json!(true))]);
        assert!(evaluate("ready and True", &b).result);
        assert!(!evaluate("False", &b).result);
        assert!(evaluate("False or ready", &b).result);
    }

    #[test]
    fn dotted_bindings_substitute() {
        let b = bindings(&[("executionCount.worker", json!(2))]);
        assert!(!evaluate("executionCount.worker >= 3", &b).result);
        assert!(evaluate("{{executionCount.worker}} == 2", &b).result);
    }

    #[test]
    fn string_values_quote_safely() {
        let b = bindings(&[("answer", json!("say \"hi\""))]);
        let eval = evaluate("answer == \"say \\\"hi\\\"\"", &b);
        assert!(eval.error.is_none());
        assert!(eval.result);
    }

    #[test]
    fn failures_return_false_with_error() {
        let eval = evaluate("unknown_name > 3", &Map::new());
        assert!(!eval.result);
        assert!(eval.error.is_some());

        let eval = evaluate("", &Map::new());
        assert!(!eval.result);
        assert!(eval.error.is_some());
    }

    #[test]
    fn truthiness_of_bare_values() {
        let b = bindings(&[("text", json!("nonempty")), ("zero", json!(0))]);
        assert!(evaluate("text", &b).result);
        assert!(!evaluate("zero", &b).result);
    }

    #[test]
    fn longest_key_substitutes_first() {
        let b = bindings(&[("n", json!(1)), ("name_n", json!(5))]);
        assert!(evaluate("name_n == 5", &b).result);
        assert!(evaluate("n == 1", &b).result);
    }
}
