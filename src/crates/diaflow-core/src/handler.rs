//! Handler contract and registries
//!
//! A handler implements one node type: it declares the services it needs,
//! validates node properties before execution, and turns resolved inputs
//! into a [`NodeOutput`]. The engine wrapper performs validation and service
//! checks, so handlers can assume both have passed. Handlers receive a
//! read-only context snapshot and must not mutate run state; results are
//! merged by the scheduler.

use crate::config::Settings;
use crate::context::ExecutionContext;
use crate::conversation::ConversationManager;
use crate::error::{EngineError, Result};
use crate::graph::{Node, NodeKind};
use crate::inputs::ResolvedInputs;
use crate::llm::LlmService;
use crate::output::NodeOutput;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Well-known service names handlers can require.
pub mod service_names {
    /// LLM access ([`crate::llm::LlmService`])
    pub const LLM: &str = "llm_service";
    /// File access ([`super::FileService`])
    pub const FILES: &str = "file_service";
    /// Conversation history ([`crate::conversation::ConversationManager`])
    pub const MEMORY: &str = "memory_service";
    /// User interaction callback ([`super::InteractiveHandler`])
    pub const INTERACTIVE: &str = "interactive_handler";
}

/// Callback for user-facing prompts (user_response nodes, interactive
/// person jobs).
#[async_trait]
pub trait InteractiveHandler: Send + Sync {
    /// Ask the user a question and return the answer.
    async fn respond(&self, node_id: &str, prompt: &str, context: Value) -> Result<String>;
}

/// File access used by db and endpoint handlers.
#[async_trait]
pub trait FileService: Send + Sync {
    /// Read a file as text.
    async fn read(&self, path: &Path) -> Result<String>;
    /// Write text to a file, creating parent directories.
    async fn write(&self, path: &Path, content: &str) -> Result<()>;
}

/// File service rooted at the configured base directory, restricted to the
/// allowed extensions.
pub struct LocalFileService {
    settings: Arc<Settings>,
}

impl LocalFileService {
    /// Create a file service over the settings' base directory.
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        if path.components().any(|c| {
            matches!(c, std::path::Component::ParentDir)
        }) {
            return Err(EngineError::Configuration(format!(
                "path escapes base directory: {}",
                path.display()
            )));
        }
        if !self.settings.extension_allowed(path) {
            return Err(EngineError::Configuration(format!(
                "file extension not allowed: {}",
                path.display()
            )));
        }
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.settings.base_dir.join(path)
        })
    }
}

#[async_trait]
impl FileService for LocalFileService {
    async fn read(&self, path: &Path) -> Result<String> {
        let resolved = self.resolve(path)?;
        Ok(tokio::fs::read_to_string(resolved).await?)
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        if content.len() as u64 > self.settings.max_upload_size {
            return Err(EngineError::Configuration(format!(
                "content exceeds max_upload_size ({} bytes)",
                self.settings.max_upload_size
            )));
        }
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(resolved, content).await?;
        Ok(())
    }
}

/// Services resolved for a handler invocation.
///
/// Handlers declare requirements by name
/// ([`NodeHandler::requires_services`]); the engine checks availability
/// before dispatch, so accessors here return errors only for undeclared use.
#[derive(Clone, Default)]
pub struct Services {
    /// LLM access, when configured
    pub llm: Option<Arc<LlmService>>,
    /// File access, when configured
    pub files: Option<Arc<dyn FileService>>,
    /// Conversation history manager
    pub conversations: Option<Arc<ConversationManager>>,
    /// Interactive callback for the current run
    pub interactive: Option<Arc<dyn InteractiveHandler>>,
    /// Engine settings
    pub settings: Arc<Settings>,
}

impl Services {
    /// Whether a named service is available.
    pub fn contains(&self, name: &str) -> bool {
        match name {
            service_names::LLM => self.llm.is_some(),
            service_names::FILES => self.files.is_some(),
            service_names::MEMORY => self.conversations.is_some(),
            service_names::INTERACTIVE => self.interactive.is_some(),
            _ => false,
        }
    }

    /// LLM service or a configuration error.
    pub fn llm(&self) -> Result<&Arc<LlmService>> {
        self.llm
            .as_ref()
            .ok_or_else(|| EngineError::Configuration("llm_service not configured".to_string()))
    }

    /// File service or a configuration error.
    pub fn files(&self) -> Result<&Arc<dyn FileService>> {
        self.files
            .as_ref()
            .ok_or_else(|| EngineError::Configuration("file_service not configured".to_string()))
    }

    /// Conversation manager or a configuration error.
    pub fn conversations(&self) -> Result<&Arc<ConversationManager>> {
        self.conversations
            .as_ref()
            .ok_or_else(|| EngineError::Configuration("memory_service not configured".to_string()))
    }
}

/// Implementation of one node type.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Node kind this handler executes.
    fn node_kind(&self) -> NodeKind;

    /// Names of the services this handler needs at execution time.
    fn requires_services(&self) -> &'static [&'static str] {
        &[]
    }

    /// Validate node properties before execution.
    fn validate(&self, _node: &Node) -> Result<()> {
        Ok(())
    }

    /// Execute the node against a read-only context snapshot.
    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        inputs: ResolvedInputs,
        services: &Services,
    ) -> Result<NodeOutput>;
}

/// Registry mapping node kinds to handlers.
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for handler in crate::handlers::builtin() {
            registry.register(handler);
        }
        registry
    }

    /// Register a handler, replacing any existing one for the same kind.
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler.node_kind(), handler);
    }

    /// Handler for a node kind.
    pub fn get(&self, kind: NodeKind) -> Result<&Arc<dyn NodeHandler>> {
        self.handlers.get(&kind).ok_or_else(|| {
            EngineError::Configuration(format!("no handler registered for node type '{kind}'"))
        })
    }

    /// Validate a node and check its handler's service requirements.
    pub fn prepare(&self, node: &Node, services: &Services) -> Result<Arc<dyn NodeHandler>> {
        let handler = self.get(node.kind)?;
        handler.validate(node)?;
        for name in handler.requires_services() {
            if !services.contains(name) {
                return Err(EngineError::Configuration(format!(
                    "node '{}' requires unavailable service '{name}'",
                    node.id
                )));
            }
        }
        Ok(handler.clone())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_registry_covers_builtin_kinds() {
        let registry = HandlerRegistry::with_defaults();
        for kind in [
            NodeKind::Start,
            NodeKind::Condition,
            NodeKind::PersonJob,
            NodeKind::PersonBatchJob,
            NodeKind::CodeJob,
            NodeKind::Db,
            NodeKind::Endpoint,
            NodeKind::TemplateJob,
            NodeKind::UserResponse,
        ] {
            assert!(registry.get(kind).is_ok(), "missing handler for {kind}");
        }
        assert!(registry.get(NodeKind::ApiJob).is_err());
    }

    #[test]
    fn prepare_rejects_missing_services() {
        let registry = HandlerRegistry::with_defaults();
        let node = Node {
            id: "pj".to_string(),
            kind: NodeKind::PersonJob,
            props: serde_json::from_value(json!({
                "person_id": "p",
                "default_prompt": "go",
            }))
            .unwrap(),
        };
        // No LLM service configured.
        let services = Services::default();
        assert!(registry.prepare(&node, &services).is_err());
    }

    #[tokio::test]
    async fn local_file_service_rejects_escapes_and_bad_extensions() {
        let service = LocalFileService::new(Arc::new(Settings::from_env()));
        assert!(service.read(Path::new("../outside.txt")).await.is_err());
        assert!(service.read(Path::new("binary.exe")).await.is_err());
    }
}
