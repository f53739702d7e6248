//! Code job: run a user script in a subprocess
//!
//! The script is written to a temp file, executed with a bounded timeout,
//! and the file is removed on every exit path (temp file lifetime). Inputs
//! are exposed to the script as JSON in the `DIAFLOW_INPUTS` environment
//! variable. Stdout is the node's value; it is parsed as JSON when
//! possible, otherwise kept as trimmed text.

use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::graph::{Node, NodeKind};
use crate::handler::{NodeHandler, Services};
use crate::inputs::ResolvedInputs;
use crate::output::NodeOutput;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Handler for `code_job` nodes.
pub struct CodeJobHandler;

struct Language {
    program: &'static str,
    suffix: &'static str,
}

fn language_for(name: &str) -> Result<Language> {
    match name {
        "python" => Ok(Language {
            program: "python3",
            suffix: ".py",
        }),
        "javascript" => Ok(Language {
            program: "node",
            suffix: ".js",
        }),
        "bash" => Ok(Language {
            program: "bash",
            suffix: ".sh",
        }),
        other => Err(EngineError::Configuration(format!(
            "unsupported code_job language '{other}'"
        ))),
    }
}

#[async_trait]
impl NodeHandler for CodeJobHandler {
    fn node_kind(&self) -> NodeKind {
        NodeKind::CodeJob
    }

    fn validate(&self, node: &Node) -> Result<()> {
        if node.props.get("code").and_then(Value::as_str).is_none() {
            return Err(EngineError::validation(&node.id, "code_job requires code"));
        }
        let language = node
            .props
            .get("language")
            .and_then(Value::as_str)
            .unwrap_or("python");
        language_for(language).map_err(|e| EngineError::validation(&node.id, e.to_string()))?;
        Ok(())
    }

    async fn execute(
        &self,
        node: &Node,
        _ctx: &ExecutionContext,
        inputs: ResolvedInputs,
        services: &Services,
    ) -> Result<NodeOutput> {
        let code = node
            .props
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::validation(&node.id, "code_job requires code"))?;
        let language = language_for(
            node.props
                .get("language")
                .and_then(Value::as_str)
                .unwrap_or("python"),
        )?;
        let timeout = node
            .props
            .get("timeout")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(services.settings.node_timeout);

        let script = tempfile::Builder::new()
            .prefix("diaflow-code-")
            .suffix(language.suffix)
            .tempfile()?;
        tokio::fs::write(script.path(), code).await?;

        let inputs_json = serde_json::to_string(&inputs.values())?;
        tracing::debug!(node = %node.id, program = language.program, "spawning code job");

        let child = Command::new(language.program)
            .arg(script.path())
            .env("DIAFLOW_INPUTS", inputs_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
        let output = match result {
            Ok(output) => output?,
            Err(_) => {
                return Err(EngineError::Timeout {
                    operation: format!("code_job '{}'", node.id),
                    duration_ms: timeout.as_millis() as u64,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::handler(
                &node.id,
                format!("exit status {}: {}", output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let value = serde_json::from_str(&stdout).unwrap_or(Value::String(stdout));

        let mut node_output = NodeOutput::scalar(value)
            .with_metadata("language", json!(language.program))
            .with_metadata("exit_status", json!(0));
        node_output.node_id = Some(node.id.clone());
        Ok(node_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::Diagram;
    use crate::graph::Graph;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx_for(code: &str, language: &str, timeout: Option<u64>) -> ExecutionContext {
        let mut data = json!({"code": code, "language": language});
        if let Some(t) = timeout {
            data["timeout"] = json!(t);
        }
        let diagram = Diagram::from_value(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "c": {"type": "code_job", "data": data},
            },
            "arrows": {"a1": {"source": "s", "target": "c"}},
        }))
        .unwrap();
        let graph = Arc::new(Graph::build(&diagram).unwrap());
        ExecutionContext::new(graph, "e".into(), HashMap::new(), HashMap::new())
    }

    #[tokio::test]
    async fn runs_bash_and_parses_json_stdout() {
        let ctx = ctx_for("echo '{\"answer\": 42}'", "bash", None);
        let node = ctx.graph.node("c").unwrap().clone();
        let out = CodeJobHandler
            .execute(&node, &ctx, ResolvedInputs::default(), &Services::default())
            .await
            .unwrap();
        assert_eq!(out.default_value(), &json!({"answer": 42}));
    }

    #[tokio::test]
    async fn nonzero_exit_is_handler_failure() {
        let ctx = ctx_for("exit 3", "bash", None);
        let node = ctx.graph.node("c").unwrap().clone();
        let err = CodeJobHandler
            .execute(&node, &ctx, ResolvedInputs::default(), &Services::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::HandlerFailure { .. }));
    }

    #[tokio::test]
    async fn timeout_kills_the_subprocess() {
        let ctx = ctx_for("sleep 30", "bash", Some(1));
        let node = ctx.graph.node("c").unwrap().clone();
        let err = CodeJobHandler
            .execute(&node, &ctx, ResolvedInputs::default(), &Services::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
    }

    #[test]
    fn validation_rejects_unknown_language() {
        let ctx = ctx_for("print('x')", "python", None);
        let mut node = ctx.graph.node("c").unwrap().clone();
        node.props
            .insert("language".to_string(), json!("fortran"));
        assert!(CodeJobHandler.validate(&node).is_err());

        node.props.remove("code");
        node.props.insert("language".to_string(), json!("python"));
        assert!(CodeJobHandler.validate(&node).is_err());
    }
}
