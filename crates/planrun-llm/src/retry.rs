//! Retry wrapper for starting model streams.

use std::time::Duration;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::model_pack::ModelRoleConfig;
use crate::provider::{CompletionStream, ModelClient};
use crate::types::CompletionRequest;

/// Backoff parameters for [`stream_with_retries`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Start a completion stream, retrying retryable failures with exponential
/// backoff.
///
/// Cancellation of `cancel` ends the wait immediately with
/// [`ProviderError::Cancelled`]. When retries are exhausted the last error
/// is returned.
pub async fn stream_with_retries(
    client: &dyn ModelClient,
    config: &ModelRoleConfig,
    cancel: &CancellationToken,
    request: &CompletionRequest,
    retry: &RetryConfig,
) -> Result<CompletionStream, ProviderError> {
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let result = tokio::select! {
            () = cancel.cancelled() => Err(ProviderError::Cancelled),
            r = client.stream_completion(config, cancel.clone(), request.clone()) => r,
        };
        match result {
            Ok(stream) => {
                if attempt > 0 {
                    debug!(attempt, model = %config.base.model_name, "stream started after retry");
                }
                return Ok(stream);
            }
            Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                attempt += 1;
                let delay = retry.delay_for(attempt);
                counter!(planrun_core::metrics::MODEL_RETRIES_TOTAL).increment(1);
                warn!(
                    attempt,
                    max_retries = retry.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    category = e.category(),
                    error = %e,
                    "retrying model stream"
                );
                tokio::select! {
                    () = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_pack::{BaseModelConfig, ModelRole};
    use crate::types::{ChatMessage, StreamChunk};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the given error for the first `failures` calls.
    struct FlakyClient {
        failures: u32,
        error: ProviderError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelClient for FlakyClient {
        async fn stream_completion(
            &self,
            _config: &ModelRoleConfig,
            _cancel: CancellationToken,
            _request: CompletionRequest,
        ) -> Result<CompletionStream, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.error.clone());
            }
            Ok(Box::pin(async_stream::stream! {
                yield Ok(StreamChunk::Delta { content: "ok".into() });
            }))
        }
    }

    fn config() -> ModelRoleConfig {
        ModelRoleConfig {
            role: ModelRole::Planner,
            base: BaseModelConfig {
                provider: "test".into(),
                model_name: "m".into(),
                max_tokens: 1000,
                reserved_output_tokens: 100,
            },
            temperature: None,
            top_p: None,
            large_context_fallback: None,
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("hi")],
            stream: true,
            include_usage: true,
            temperature: None,
            top_p: None,
            stop: vec![],
        }
    }

    fn transport() -> ProviderError {
        ProviderError::Transport {
            message: "reset".into(),
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let cfg = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(cfg.delay_for(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(350));
        assert_eq!(cfg.delay_for(40), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let client = FlakyClient {
            failures: 2,
            error: transport(),
            calls: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        let mut stream = stream_with_retries(
            &client,
            &config(),
            &cancel,
            &request(),
            &RetryConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, StreamChunk::Delta { content: "ok".into() });
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let client = FlakyClient {
            failures: u32::MAX,
            error: transport(),
            calls: AtomicU32::new(0),
        };
        let retry = RetryConfig {
            max_retries: 2,
            ..RetryConfig::default()
        };
        let err = stream_with_retries(&client, &config(), &CancellationToken::new(), &request(), &retry)
            .await
            .err()
            .unwrap();
        assert_eq!(err, transport());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_immediately() {
        let auth = ProviderError::Auth {
            message: "bad key".into(),
        };
        let client = FlakyClient {
            failures: 1,
            error: auth.clone(),
            calls: AtomicU32::new(0),
        };
        let err = stream_with_retries(
            &client,
            &config(),
            &CancellationToken::new(),
            &request(),
            &RetryConfig::default(),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err, auth);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let client = FlakyClient {
            failures: 0,
            error: transport(),
            calls: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = stream_with_retries(&client, &config(), &cancel, &request(), &RetryConfig::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err, ProviderError::Cancelled);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let client = FlakyClient {
            failures: u32::MAX,
            error: transport(),
            calls: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        let retry = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
        };
        let err = stream_with_retries(&client, &config(), &cancel, &request(), &retry)
            .await
            .err()
            .unwrap();
        assert_eq!(err, ProviderError::Cancelled);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
