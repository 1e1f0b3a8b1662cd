//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so partial
//! JSON files only need the fields they override.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default marker that ends a model reply.
pub const DEFAULT_STOP_SEQUENCE: &str = "<PlanFinish/>";

/// Shortest delay between streaming an error and cancelling the session.
pub const MIN_ERROR_GRACE_MS: u64 = 100;

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanrunSettings {
    /// Session supervision and iteration knobs.
    pub runtime: RuntimeSettings,
    /// Retry configuration for model stream requests.
    pub retry: RetrySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl PlanrunSettings {
    /// Correct invalid values in place, warning about each change.
    ///
    /// Called automatically during loading.
    pub fn validate(&mut self) {
        self.runtime.validate();

        let retry = &mut self.retry;
        if retry.max_delay_ms < retry.base_delay_ms {
            tracing::warn!(
                "retry max_delay_ms ({}) < base_delay_ms ({}), correcting",
                retry.max_delay_ms,
                retry.base_delay_ms
            );
            retry.max_delay_ms = retry.base_delay_ms;
        }
    }
}

/// Session supervision and iteration settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Delay between streaming an error and cancelling the session.
    /// Never below [`MIN_ERROR_GRACE_MS`].
    pub error_grace_ms: u64,
    /// Deadline for external cleanup when a session is deleted.
    pub cleanup_timeout_ms: u64,
    /// Per-subscriber channel capacity; full channels drop messages.
    pub subscriber_buffer: usize,
    /// Buffered reply bytes that trigger a flush to subscribers.
    pub buffer_flush_bytes: usize,
    /// Interval at which the supervisor flushes buffered reply output.
    pub buffer_flush_interval_ms: u64,
    /// Upper bound on iterations per activation.
    pub max_iterations: u32,
    /// Maximum concurrently active sessions (0 = unlimited).
    pub max_active_sessions: usize,
    /// Marker that ends generation.
    pub stop_sequence: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            error_grace_ms: MIN_ERROR_GRACE_MS,
            cleanup_timeout_ms: 10_000,
            subscriber_buffer: 256,
            buffer_flush_bytes: 1024,
            buffer_flush_interval_ms: 50,
            max_iterations: 100,
            max_active_sessions: 0,
            stop_sequence: DEFAULT_STOP_SEQUENCE.to_string(),
        }
    }
}

impl RuntimeSettings {
    /// Correct invalid values in place, warning about each change.
    ///
    /// Applied again when a session registry is built.
    pub fn validate(&mut self) {
        if self.error_grace_ms < MIN_ERROR_GRACE_MS {
            tracing::warn!(
                "error_grace_ms ({}) below minimum, using {MIN_ERROR_GRACE_MS}",
                self.error_grace_ms
            );
            self.error_grace_ms = MIN_ERROR_GRACE_MS;
        }
        if self.subscriber_buffer == 0 {
            tracing::warn!("subscriber_buffer must be positive, using 1");
            self.subscriber_buffer = 1;
        }
        if self.max_iterations == 0 {
            tracing::warn!("max_iterations must be positive, using 1");
            self.max_iterations = 1;
        }
        if self.buffer_flush_interval_ms == 0 {
            tracing::warn!("buffer_flush_interval_ms must be positive, using 1");
            self.buffer_flush_interval_ms = 1;
        }
        if self.stop_sequence.is_empty() {
            tracing::warn!("empty stop_sequence, using default");
            self.stop_sequence = DEFAULT_STOP_SEQUENCE.to_string();
        }
    }

    /// Error grace interval, at least [`MIN_ERROR_GRACE_MS`].
    pub fn error_grace(&self) -> Duration {
        Duration::from_millis(self.error_grace_ms.max(MIN_ERROR_GRACE_MS))
    }

    /// Cleanup deadline.
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }

    /// Buffer flush interval, at least one millisecond.
    pub fn buffer_flush_interval(&self) -> Duration {
        Duration::from_millis(self.buffer_flush_interval_ms.max(1))
    }
}

/// Retry configuration for model stream requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
