//! Text-generation gateway: the `ChatGateway` seam plus the OpenRouter-backed
//! implementation used outside of tests.

pub mod error;
pub mod openrouter;
pub mod pricing;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use openrouter::{ChatProvider, OpenRouterAdapter};
use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use pricing::chat_cost;
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// One system + user completion.
///
/// This is the `generate(system, user, temperature, max_tokens)` shape every
/// pipeline stage needs; `json` asks the provider for a JSON object response.
#[allow(clippy::too_many_arguments)]
pub async fn complete(
    gateway: &dyn ChatGateway,
    model: &str,
    system_prompt: &str,
    user_prompt: &str,
    temperature: f32,
    max_tokens: u32,
    json: bool,
    attribution: Attribution,
) -> Result<ChatResponse, ProviderError> {
    let req = ChatRequest::new(
        ChatModel::openrouter(model),
        vec![Message::system(system_prompt), Message::user(user_prompt)],
        attribution,
    )
    .temperature(temperature)
    .max_tokens(max_tokens);
    let req = if json { req.json() } else { req };
    gateway.chat(req).await
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    openrouter: OpenRouterAdapter,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        let openrouter = OpenRouterAdapter::from_env()?;
        Ok(Self {
            openrouter,
            usage_sink,
            config: GatewayConfig::default(),
        })
    }

    pub fn with_config(
        openrouter: OpenRouterAdapter,
        usage_sink: Arc<U>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            openrouter,
            usage_sink,
            config,
        }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            let err = match self.openrouter.chat(&req).await {
                Ok(resp) => {
                    self.usage_sink
                        .record(ProviderCallRecord::success(&req, &resp))
                        .await;
                    return Ok(resp);
                }
                Err(err) => err,
            };
            self.usage_sink
                .record(ProviderCallRecord::failure(&req, err.code()))
                .await;

            if !err.is_retryable() || attempt >= self.config.max_retries {
                return Err(err);
            }

            let delay = retry_delay(&err, self.config.retry_base_delay, attempt);
            tracing::warn!(
                caller = req.attribution.caller,
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "retrying text generation call"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}

/// Honor a provider-requested wait, but never beyond the largest backoff step.
fn retry_delay(err: &ProviderError, base: Duration, attempt: u32) -> Duration {
    match err.retry_after() {
        Some(wait) => wait.min(backoff_delay(base, 5)),
        None => backoff_delay(base, attempt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 9), Duration::from_millis(3_200));
    }

    #[test]
    fn rate_limit_wait_is_capped_by_backoff_ceiling() {
        let base = Duration::from_millis(100);
        let limited =
            ProviderError::rate_limited(Duration::from_secs(60), ErrorContext::new().with_status(429));
        assert_eq!(retry_delay(&limited, base, 0), Duration::from_millis(3_200));

        let short =
            ProviderError::rate_limited(Duration::from_millis(50), ErrorContext::new().with_status(429));
        assert_eq!(retry_delay(&short, base, 0), Duration::from_millis(50));

        let server = ProviderError::provider("openrouter", "boom", true);
        assert_eq!(retry_delay(&server, base, 1), Duration::from_millis(200));
    }
}
