//! Retrying front for an [`LlmClient`].

use std::sync::Arc;

use tokio::time::Instant;

use super::{ChatMessage, ChatResponse, LlmClient, LlmError, RetryConfig, ToolDefinition};

/// Failure surfaced by the gateway after its own retry policy ran.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Retryable failures persisted through every attempt.
    #[error("model unavailable after {attempts} attempts: {last}")]
    Unavailable { attempts: u32, last: LlmError },

    /// The provider rejected the request with a permanent error.
    #[error("model request rejected: {0}")]
    Rejected(LlmError),
}

/// Uniform completion interface used by the orchestrator.
///
/// # Retry policy
/// - Every provider call runs under `retry.call_timeout`; expiry is a retryable timeout
/// - Retryable errors back off exponentially, up to `retry.max_attempts` total attempts
/// - Permanent errors are surfaced immediately
pub struct ModelGateway {
    client: Arc<dyn LlmClient>,
    model: String,
    retry: RetryConfig,
}

impl ModelGateway {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client,
            model: model.into(),
            retry,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Complete a conversation, retrying transient failures.
    pub async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, GatewayError> {
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let call = self
                .client
                .chat_completion(&self.model, system_prompt, messages, tools);
            let result = match tokio::time::timeout(self.retry.call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::timeout(self.retry.call_timeout)),
            };

            match result {
                Ok(response) => {
                    if attempt > 1 {
                        tracing::info!(
                            attempts = attempt,
                            elapsed = ?start.elapsed(),
                            "Model call succeeded after retries"
                        );
                    }
                    return Ok(response);
                }
                Err(error) if !error.is_retryable() => {
                    tracing::error!("Model call failed (non-retryable): {}", error);
                    return Err(GatewayError::Rejected(error));
                }
                Err(error) if self.retry.should_retry(&error, attempt) => {
                    let delay = error.suggested_delay(
                        attempt - 1,
                        self.retry.base_delay,
                        self.retry.max_delay,
                    );
                    tracing::warn!(
                        "Model attempt {} failed with {}, retrying in {:?}: {}",
                        attempt,
                        error.kind,
                        delay,
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    tracing::error!(
                        "Model call failed after {} attempts (total time: {:?}): {}",
                        attempt,
                        start.elapsed(),
                        error
                    );
                    return Err(GatewayError::Unavailable {
                        attempts: attempt,
                        last: error,
                    });
                }
            }
        }
    }
}
