//! The streaming model client boundary.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::model_pack::ModelRoleConfig;
use crate::types::{CompletionRequest, StreamChunk};

/// Boxed stream of completion chunks.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// A backend able to start streaming completions.
///
/// Implementations must stop producing chunks promptly once `cancel` fires.
/// A single call makes one attempt; retries are layered on top by
/// [`crate::retry::stream_with_retries`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Start a completion stream for `request` against `config`'s backend.
    async fn stream_completion(
        &self,
        config: &ModelRoleConfig,
        cancel: CancellationToken,
        request: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError>;
}
