//! Engine configuration
//!
//! [`Settings`] carries every tunable the engine consults at runtime. Each
//! field has a built-in default and can be overridden through a `DIAFLOW_`
//! environment variable, e.g. `DIAFLOW_NODE_TIMEOUT=120`.

use crate::error::{EngineError, Result};
use std::path::PathBuf;
use std::time::Duration;

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("DIAFLOW_{name}")).ok()
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    env_var(name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

fn env_list(name: &str, default: &str) -> Vec<String> {
    let raw = env_var(name).unwrap_or_else(|| default.to_string());
    if raw.is_empty() || raw == "*" {
        return vec!["*".to_string()];
    }
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Runtime configuration for the engine and its services.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for file operations
    pub base_dir: PathBuf,
    /// Directory for user uploads, under `base_dir`
    pub uploads_dir: PathBuf,
    /// Directory for run results, under `base_dir`
    pub results_dir: PathBuf,
    /// Directory for stored diagrams, under `base_dir`
    pub diagrams_dir: PathBuf,

    /// Model used when a person does not name one
    pub default_llm_model: String,
    /// Per-call LLM timeout
    pub llm_timeout: Duration,
    /// LLM retry attempts on transient failure
    pub llm_max_retries: u32,
    /// Lower bound of the retry backoff
    pub llm_retry_min_wait: Duration,
    /// Upper bound of the retry backoff
    pub llm_retry_max_wait: Duration,
    /// TTL for pooled LLM clients
    pub client_pool_ttl: Duration,

    /// Wall-clock limit for a whole run
    pub execution_timeout: Duration,
    /// Wall-clock limit for one node
    pub node_timeout: Duration,
    /// Delay between readiness polls while nodes are in flight
    pub node_ready_poll_interval: Duration,
    /// Maximum readiness polls before the scheduler gives up waiting
    pub node_ready_max_polls: u32,

    /// Prepend recent conversation context to person prompts
    pub auto_prepend_conversation: bool,
    /// Number of recent messages eligible for auto-prepend
    pub conversation_context_limit: usize,

    /// Allowed CORS origins for embedding servers
    pub cors_origins: Vec<String>,
    /// File extensions the file service will touch
    pub allowed_file_extensions: Vec<String>,
    /// Upload size ceiling in bytes
    pub max_upload_size: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Settings {
    /// Build settings from environment overrides on top of the defaults.
    pub fn from_env() -> Self {
        let base_dir = env_var("BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let files_dir = base_dir.join("files");

        Self {
            uploads_dir: files_dir.join("uploads"),
            results_dir: files_dir.join("results"),
            diagrams_dir: files_dir.join("diagrams"),
            base_dir,

            default_llm_model: env_var("DEFAULT_LLM_MODEL")
                .unwrap_or_else(|| "gpt-4.1-nano".to_string()),
            llm_timeout: Duration::from_secs(env_parse("LLM_TIMEOUT", 300u64)),
            llm_max_retries: env_parse("LLM_MAX_RETRIES", 3u32),
            llm_retry_min_wait: Duration::from_secs_f64(env_parse("LLM_RETRY_MIN_WAIT", 4.0f64)),
            llm_retry_max_wait: Duration::from_secs_f64(env_parse("LLM_RETRY_MAX_WAIT", 10.0f64)),
            client_pool_ttl: Duration::from_secs(env_parse("CLIENT_POOL_TTL", 3600u64)),

            execution_timeout: Duration::from_secs(env_parse("EXECUTION_TIMEOUT", 3600u64)),
            node_timeout: Duration::from_secs(env_parse("NODE_TIMEOUT", 300u64)),
            node_ready_poll_interval: Duration::from_secs_f64(env_parse(
                "NODE_READY_POLL_INTERVAL",
                0.01f64,
            )),
            node_ready_max_polls: env_parse("NODE_READY_MAX_POLLS", 100u32),

            auto_prepend_conversation: env_bool("AUTO_PREPEND_CONVERSATION", true),
            conversation_context_limit: env_parse("CONVERSATION_CONTEXT_LIMIT", 10usize),

            cors_origins: env_list("CORS_ORIGINS", "*"),
            allowed_file_extensions: env_list(
                "ALLOWED_FILE_EXTENSIONS",
                ".txt,.json,.yaml,.yml,.md,.csv",
            ),
            max_upload_size: env_parse("MAX_UPLOAD_SIZE", 10 * 1024 * 1024u64),
        }
    }

    /// Reject zero or negative limits.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("llm_timeout", self.llm_timeout),
            ("execution_timeout", self.execution_timeout),
            ("node_timeout", self.node_timeout),
        ] {
            if value.is_zero() {
                return Err(EngineError::Configuration(format!(
                    "{name} must be positive"
                )));
            }
        }
        if self.max_upload_size == 0 {
            return Err(EngineError::Configuration(
                "max_upload_size must be positive".to_string(),
            ));
        }
        if self.node_ready_max_polls == 0 {
            return Err(EngineError::Configuration(
                "node_ready_max_polls must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the file service may touch a path with this extension.
    pub fn extension_allowed(&self, path: &std::path::Path) -> bool {
        if self.allowed_file_extensions.iter().any(|e| e == "*") {
            return true;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()));
        match ext {
            Some(ext) => self.allowed_file_extensions.iter().any(|e| e == &ext),
            None => false,
        }
    }
}
