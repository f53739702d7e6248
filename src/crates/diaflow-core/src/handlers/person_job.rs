//! Person job: an LLM call bound to a persona with conversation memory
//!
//! Prompt selection: `first_only_prompt` on the first execution when
//! present, `default_prompt` otherwise. The prompt is rendered over the
//! node's resolved inputs; recent conversation context is auto-prepended
//! unless the template references conversation variables itself, in which
//! case the template is the source of truth.
//!
//! Message assembly order: the person's own history (filtered by the
//! person's forget mode), conversation fragments arriving through arrows,
//! then the current user prompt. Arrow fragments are cross-node data and
//! are never filtered by forgetting. After the reply, the user and
//! assistant messages are appended to the person's conversation through the
//! manager.

use crate::context::ExecutionContext;
use crate::conversation::{Message, PersonConfig};
use crate::error::{EngineError, Result};
use crate::graph::{Node, NodeKind};
use crate::handler::{service_names, NodeHandler, Services};
use crate::inputs::ResolvedInputs;
use crate::llm::{ChatMessage, ChatRole, LlmRequest};
use crate::output::NodeOutput;
use crate::template;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Handler for `person_job` nodes.
pub struct PersonJobHandler;

impl PersonJobHandler {
    fn resolve_person(node: &Node, ctx: &ExecutionContext) -> Result<PersonConfig> {
        if let Some(inline) = node.inline_person() {
            return Ok(inline);
        }
        let person_id = node
            .person_id()
            .ok_or_else(|| EngineError::validation(&node.id, "person node requires person_id"))?;
        ctx.persons
            .get(person_id)
            .cloned()
            .ok_or_else(|| EngineError::validation(&node.id, format!("person not found: {person_id}")))
    }

    fn person_key(node: &Node) -> String {
        node.person_id().unwrap_or(&node.id).to_string()
    }

    fn select_prompt(node: &Node, execution_count: u32) -> Result<String> {
        let prompt = if execution_count == 0 {
            node.first_only_prompt().or_else(|| node.default_prompt())
        } else {
            node.default_prompt()
        };
        prompt
            .map(str::to_string)
            .ok_or_else(|| EngineError::validation(&node.id, "no prompt available"))
    }

    fn chat_role(value: &Value) -> ChatRole {
        match value.get("role").and_then(Value::as_str) {
            Some("assistant") => ChatRole::Assistant,
            Some("system") => ChatRole::System,
            _ => ChatRole::User,
        }
    }

    fn to_chat(values: &[Value]) -> Vec<ChatMessage> {
        values
            .iter()
            .map(|m| {
                ChatMessage::new(
                    Self::chat_role(m),
                    m.get("content").and_then(Value::as_str).unwrap_or_default(),
                )
            })
            .collect()
    }

    async fn run(
        node: &Node,
        ctx: &ExecutionContext,
        inputs: ResolvedInputs,
        services: &Services,
    ) -> Result<NodeOutput> {
        let execution_count = ctx.execution_count(&node.id);

        // Engine-side skip policy normally catches this; keep the guard so a
        // direct dispatch at the ceiling passes the previous output through.
        if let Some(max) = node.max_iteration() {
            if execution_count >= max {
                let previous = ctx
                    .outputs
                    .get(&node.id)
                    .map(|o| o.value.clone())
                    .unwrap_or(Value::Null);
                let mut output = NodeOutput::new(previous)
                    .with_metadata("skipped", json!(true))
                    .with_metadata("passthrough", json!(true))
                    .with_metadata("reason", json!(format!("max iterations ({max}) reached")));
                output.node_id = Some(node.id.clone());
                return Ok(output);
            }
        }

        let person = Self::resolve_person(node, ctx)?;
        let person_key = Self::person_key(node);
        let prompt = Self::select_prompt(node, execution_count)?;
        let settings = &services.settings;

        let template_values = template::prepare_values(&inputs.values());
        let mut final_prompt = template::render(&prompt, &template_values).content;

        let conversations = services.conversations()?;
        let history = conversations
            .visible_history(
                &person_key,
                person.forget_mode.unwrap_or_default(),
                execution_count,
                &node.memory_config(),
            )
            .await;

        if settings.auto_prepend_conversation
            && !template::references_conversation(&prompt)
            && !history.is_empty()
        {
            final_prompt = template::prepend_conversation(
                &final_prompt,
                &history,
                settings.conversation_context_limit,
            );
        }

        let fragments = inputs.conversation_fragments();
        let mut messages = Self::to_chat(&history);
        messages.extend(Self::to_chat(&fragments));
        messages.push(ChatMessage::new(ChatRole::User, final_prompt.clone()));

        if node.interactive() {
            if let Some(interactive) = &services.interactive {
                let answer = interactive
                    .respond(
                        &node.id,
                        &final_prompt,
                        json!({
                            "person_id": person_key,
                            "model": person.model,
                            "execution_count": execution_count,
                        }),
                    )
                    .await?;
                messages.push(ChatMessage::new(ChatRole::User, answer));
            }
        }

        let service_name = person
            .service
            .clone()
            .or_else(|| {
                person
                    .api_key_id
                    .as_deref()
                    .and_then(|id| ctx.api_keys.get(id))
                    .map(|key| key.service.clone())
            })
            .unwrap_or_else(|| "openai".to_string());
        let api_key = person
            .api_key_id
            .as_deref()
            .and_then(|id| ctx.api_keys.get(id))
            .and_then(|key| key.key.clone());
        let model = person
            .model
            .clone()
            .unwrap_or_else(|| settings.default_llm_model.clone());

        tracing::debug!(
            node = %node.id,
            person = %person_key,
            model = %model,
            execution_count,
            "dispatching person job"
        );

        let response = services
            .llm()?
            .call(
                &service_name,
                api_key.as_deref(),
                LlmRequest {
                    model: model.clone(),
                    messages,
                    system_prompt: person.system_prompt.clone(),
                    temperature: person.temperature,
                },
            )
            .await
            .map_err(|e| EngineError::handler(&node.id, e.to_string()))?;

        let mut assistant = Message::from_person(&person_key, response.text.clone());
        assistant.token_count = Some(response.usage.total());
        conversations
            .append_exchange(
                &person_key,
                Message::to_person(&person_key, final_prompt),
                assistant,
            )
            .await;

        let conversation_after = conversations.history(&person_key).await;
        let conversation_values: Vec<Value> =
            conversation_after.iter().map(Message::to_chat_value).collect();

        let mut value = Map::new();
        value.insert("default".to_string(), json!(response.text));
        value.insert(
            "conversation".to_string(),
            json!({ "messages": conversation_values }),
        );

        let mut output = NodeOutput::new(Value::Object(value))
            .with_metadata("model", json!(response.model))
            .with_metadata("tokenUsage", serde_json::to_value(response.usage)?)
            .with_metadata("executionCount", json!(execution_count + 1))
            .with_tokens(response.usage);
        output.node_id = Some(node.id.clone());
        output.conversation = Some(conversation_after);
        Ok(output)
    }
}

#[async_trait]
impl NodeHandler for PersonJobHandler {
    fn node_kind(&self) -> NodeKind {
        NodeKind::PersonJob
    }

    fn requires_services(&self) -> &'static [&'static str] {
        &[service_names::LLM, service_names::MEMORY]
    }

    fn validate(&self, node: &Node) -> Result<()> {
        if node.default_prompt().is_none() && node.first_only_prompt().is_none() {
            return Err(EngineError::validation(&node.id, "person node requires a prompt"));
        }
        if node.person_id().is_none() && node.inline_person().is_none() {
            return Err(EngineError::validation(
                &node.id,
                "person node requires person_id or inline person",
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        inputs: ResolvedInputs,
        services: &Services,
    ) -> Result<NodeOutput> {
        Self::run(node, ctx, inputs, services).await
    }
}

/// Handler for `person_batch_job` nodes; the execution pipeline is shared
/// with [`PersonJobHandler`], plus batch bookkeeping in metadata.
pub struct PersonBatchJobHandler;

#[async_trait]
impl NodeHandler for PersonBatchJobHandler {
    fn node_kind(&self) -> NodeKind {
        NodeKind::PersonBatchJob
    }

    fn requires_services(&self) -> &'static [&'static str] {
        &[service_names::LLM, service_names::MEMORY]
    }

    fn validate(&self, node: &Node) -> Result<()> {
        PersonJobHandler.validate(node)
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        inputs: ResolvedInputs,
        services: &Services,
    ) -> Result<NodeOutput> {
        let mut output = PersonJobHandler::run(node, ctx, inputs, services).await?;
        output
            .metadata
            .insert("node_type".to_string(), json!("person_batch_job"));
        output.metadata.insert("is_batch".to_string(), json!(true));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::conversation::ConversationManager;
    use crate::diagram::Diagram;
    use crate::graph::Graph;
    use crate::llm::{LlmClient, LlmResponse, LlmService};
    use crate::output::TokenUsage;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct EchoClient {
        requests: Mutex<Vec<LlmRequest>>,
    }

    #[async_trait]
    impl LlmClient for EchoClient {
        async fn call(&self, request: LlmRequest) -> Result<LlmResponse> {
            let text = format!(
                "echo: {}",
                request.messages.last().map(|m| m.content.as_str()).unwrap_or("")
            );
            self.requests.lock().unwrap().push(request.clone());
            Ok(LlmResponse {
                text,
                usage: TokenUsage {
                    input: 2,
                    output: 3,
                    cached: 0,
                },
                model: request.model,
            })
        }
    }

    fn services_with(client: Arc<EchoClient>) -> Services {
        let settings = Arc::new(Settings::from_env());
        Services {
            llm: Some(Arc::new(LlmService::with_client(client, &settings))),
            files: None,
            conversations: Some(Arc::new(ConversationManager::new())),
            interactive: None,
            settings,
        }
    }

    fn ctx_for(diagram: Value) -> ExecutionContext {
        let diagram = Diagram::from_value(diagram).unwrap();
        let persons = diagram
            .persons
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let graph = Arc::new(Graph::build(&diagram).unwrap());
        ExecutionContext::new(graph, "e".into(), persons, HashMap::new())
    }

    fn pj_diagram() -> Value {
        json!({
            "nodes": {
                "s": {"type": "start", "data": {"output": "topic"}},
                "pj": {"type": "person_job", "data": {
                    "person_id": "p",
                    "first_only_prompt": "start with {{default}}",
                    "default_prompt": "continue",
                    "max_iteration": 3,
                }},
            },
            "arrows": {"a1": {"source": "s", "target": "pj"}},
            "persons": {"p": {"model": "test-model"}},
        })
    }

    #[tokio::test]
    async fn first_execution_uses_first_only_prompt_with_inputs() {
        let client = Arc::new(EchoClient {
            requests: Mutex::new(Vec::new()),
        });
        let services = services_with(client.clone());
        let mut ctx = ctx_for(pj_diagram());
        ctx.record_success(&"s".to_string(), NodeOutput::scalar(json!("topic")));
        let node = ctx.graph.node("pj").unwrap().clone();

        let inputs = crate::inputs::resolve(&node, &ctx);
        let out = PersonJobHandler
            .execute(&node, &ctx, inputs, &services)
            .await
            .unwrap();

        assert_eq!(out.default_value(), &json!("echo: start with topic"));
        assert_eq!(out.token_usage.unwrap().total(), 5);
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].messages.last().unwrap().content, "start with topic");
    }

    #[tokio::test]
    async fn later_executions_use_default_prompt() {
        let client = Arc::new(EchoClient {
            requests: Mutex::new(Vec::new()),
        });
        let services = services_with(client.clone());
        let mut ctx = ctx_for(pj_diagram());
        ctx.record_success(&"s".to_string(), NodeOutput::scalar(json!("topic")));
        ctx.exec_cnt.insert("pj".to_string(), 1);
        let node = ctx.graph.node("pj").unwrap().clone();

        let inputs = crate::inputs::resolve(&node, &ctx);
        let out = PersonJobHandler
            .execute(&node, &ctx, inputs, &services)
            .await
            .unwrap();
        assert_eq!(out.default_value(), &json!("echo: continue"));
    }

    #[tokio::test]
    async fn conversation_is_appended_through_manager() {
        let client = Arc::new(EchoClient {
            requests: Mutex::new(Vec::new()),
        });
        let services = services_with(client);
        let mut ctx = ctx_for(pj_diagram());
        ctx.record_success(&"s".to_string(), NodeOutput::scalar(json!("topic")));
        let node = ctx.graph.node("pj").unwrap().clone();

        let inputs = crate::inputs::resolve(&node, &ctx);
        PersonJobHandler
            .execute(&node, &ctx, inputs, &services)
            .await
            .unwrap();

        let history = services.conversations().unwrap().history("p").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role(), "user");
        assert_eq!(history[1].role(), "assistant");
    }

    #[tokio::test]
    async fn at_max_iteration_passes_previous_output_through() {
        let client = Arc::new(EchoClient {
            requests: Mutex::new(Vec::new()),
        });
        let services = services_with(client);
        let mut ctx = ctx_for(pj_diagram());
        ctx.record_success(&"pj".to_string(), NodeOutput::scalar(json!("final answer")));
        ctx.exec_cnt.insert("pj".to_string(), 3);
        let node = ctx.graph.node("pj").unwrap().clone();

        let out = PersonJobHandler
            .execute(&node, &ctx, ResolvedInputs::default(), &services)
            .await
            .unwrap();
        assert!(out.is_skip());
        assert!(out.is_passthrough());
        assert_eq!(out.default_value(), &json!("final answer"));
    }

    #[tokio::test]
    async fn missing_person_is_a_validation_error() {
        let client = Arc::new(EchoClient {
            requests: Mutex::new(Vec::new()),
        });
        let services = services_with(client);
        let ctx = ctx_for(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "pj": {"type": "person_job", "data": {
                    "person_id": "ghost", "default_prompt": "x",
                }},
            },
            "arrows": {"a1": {"source": "s", "target": "pj"}},
        }));
        let node = ctx.graph.node("pj").unwrap().clone();

        let err = PersonJobHandler
            .execute(&node, &ctx, ResolvedInputs::default(), &services)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("person not found"));
    }
}
