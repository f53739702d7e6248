//! LLM client contract and retrying service
//!
//! Provider SDKs live outside the engine; person-job handlers talk to an
//! [`LlmClient`] trait object. [`LlmService`] wraps a client registry with
//! per-call timeouts and retries (exponential backoff with jitter, bounded
//! by the configured min/max wait). Clients are pooled per provider/key pair
//! and evicted after a TTL, so long-lived engines do not accumulate stale
//! connections.

use crate::config::Settings;
use crate::error::{EngineError, Result};
use crate::output::TokenUsage;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Role of a chat message sent to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instruction
    System,
    /// End-user turn
    User,
    /// Model turn
    Assistant,
}

/// One chat message in provider wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role
    pub role: ChatRole,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Build a message with the given role.
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A single LLM call.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model name
    pub model: String,
    /// Conversation to send
    pub messages: Vec<ChatMessage>,
    /// Optional system prompt prepended by the client
    pub system_prompt: Option<String>,
    /// Optional sampling temperature
    pub temperature: Option<f64>,
}

/// Reply from an LLM call.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Assistant text
    pub text: String,
    /// Token accounting for the call
    pub usage: TokenUsage,
    /// Model that produced the reply
    pub model: String,
}

/// Provider client. Implementations live outside the engine.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Perform one chat completion.
    async fn call(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Builds clients for a provider/key pair on demand.
pub type ClientFactory =
    Arc<dyn Fn(&str, Option<&str>) -> Result<Arc<dyn LlmClient>> + Send + Sync>;

struct PooledClient {
    client: Arc<dyn LlmClient>,
    created: Instant,
}

/// LLM access point for handlers: pooling, timeout, and retry in one place.
pub struct LlmService {
    factory: ClientFactory,
    pool: Mutex<HashMap<String, PooledClient>>,
    timeout: Duration,
    max_retries: u32,
    retry_min_wait: Duration,
    retry_max_wait: Duration,
    pool_ttl: Duration,
}

impl LlmService {
    /// Create a service around a client factory, configured from settings.
    pub fn new(factory: ClientFactory, settings: &Settings) -> Self {
        Self {
            factory,
            pool: Mutex::new(HashMap::new()),
            timeout: settings.llm_timeout,
            max_retries: settings.llm_max_retries,
            retry_min_wait: settings.llm_retry_min_wait,
            retry_max_wait: settings.llm_retry_max_wait,
            pool_ttl: settings.client_pool_ttl,
        }
    }

    /// Create a service that always uses one fixed client. Intended for
    /// embedding mock clients in tests and small deployments.
    pub fn with_client(client: Arc<dyn LlmClient>, settings: &Settings) -> Self {
        let fixed = client.clone();
        Self::new(Arc::new(move |_, _| Ok(fixed.clone())), settings)
    }

    async fn client_for(&self, service: &str, api_key: Option<&str>) -> Result<Arc<dyn LlmClient>> {
        let pool_key = format!("{service}:{}", api_key.unwrap_or(""));
        let mut pool = self.pool.lock().await;
        pool.retain(|_, pooled| pooled.created.elapsed() < self.pool_ttl);
        if let Some(pooled) = pool.get(&pool_key) {
            return Ok(pooled.client.clone());
        }
        let client = (self.factory)(service, api_key)?;
        pool.insert(
            pool_key,
            PooledClient {
                client: client.clone(),
                created: Instant::now(),
            },
        );
        Ok(client)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry_min_wait.as_secs_f64();
        let capped = (base * 2f64.powi(attempt as i32)).min(self.retry_max_wait.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.0..0.25);
        Duration::from_secs_f64(capped * (1.0 + jitter))
    }

    /// Call an LLM with pooling, timeout, and retry.
    pub async fn call(
        &self,
        service: &str,
        api_key: Option<&str>,
        request: LlmRequest,
    ) -> Result<LlmResponse> {
        let client = self.client_for(service, api_key).await?;
        let attempts = self.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt - 1);
                tracing::warn!(
                    service,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying LLM call"
                );
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(self.timeout, client.call(request.clone())).await {
                Ok(Ok(response)) => {
                    if attempt > 0 {
                        tracing::info!(service, attempt, "LLM call succeeded after retry");
                    }
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    last_error = Some(e);
                }
                Err(_) => {
                    last_error = Some(EngineError::Timeout {
                        operation: format!("LLM call to {service}"),
                        duration_ms: self.timeout.as_millis() as u64,
                    });
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| EngineError::Configuration("LLM retries exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyClient {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn call(&self, request: LlmRequest) -> Result<LlmResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(EngineError::Configuration("transient".to_string()));
            }
            Ok(LlmResponse {
                text: format!("reply {}", n + 1),
                usage: TokenUsage {
                    input: 1,
                    output: 1,
                    cached: 0,
                },
                model: request.model,
            })
        }
    }

    fn fast_settings() -> Settings {
        let mut settings = Settings::from_env();
        settings.llm_retry_min_wait = Duration::from_millis(1);
        settings.llm_retry_max_wait = Duration::from_millis(2);
        settings.llm_max_retries = 3;
        settings
    }

    fn request() -> LlmRequest {
        LlmRequest {
            model: "test-model".to_string(),
            messages: vec![ChatMessage::new(ChatRole::User, "hi")],
            system_prompt: None,
            temperature: None,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let client = Arc::new(FlakyClient {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let service = LlmService::with_client(client.clone(), &fast_settings());

        let response = service.call("openai", None, request()).await.unwrap();
        assert_eq!(response.text, "reply 3");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let client = Arc::new(FlakyClient {
            failures: 10,
            calls: AtomicUsize::new(0),
        });
        let service = LlmService::with_client(client.clone(), &fast_settings());

        assert!(service.call("openai", None, request()).await.is_err());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn pool_reuses_clients_per_key() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let factory: ClientFactory = Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FlakyClient {
                failures: 0,
                calls: AtomicUsize::new(0),
            }) as Arc<dyn LlmClient>)
        });
        let service = LlmService::new(factory, &fast_settings());

        service.call("openai", Some("k1"), request()).await.unwrap();
        service.call("openai", Some("k1"), request()).await.unwrap();
        service.call("openai", Some("k2"), request()).await.unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }
}
