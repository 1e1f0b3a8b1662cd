//! # planrun-llm
//!
//! The boundary between the plan runtime and a streaming model backend.
//!
//! - **Client**: [`provider::ModelClient`] starts a cancellable completion stream
//! - **Requests**: [`types::CompletionRequest`] and [`types::StreamChunk`]
//! - **Roles**: [`model_pack::ModelPack`] selects planner/coder/architect configs by size
//! - **Tokens**: [`tokens`] estimates request size before any network call
//! - **Retries**: [`retry::stream_with_retries`] backs off on retryable failures
//!
//! ## Crate Position
//!
//! Depends on: planrun-core. Depended on by: planrun-runtime.

#![deny(unsafe_code)]

pub mod errors;
pub mod model_pack;
pub mod provider;
pub mod retry;
pub mod tokens;
pub mod types;

pub use errors::ProviderError;
pub use model_pack::{BaseModelConfig, ModelPack, ModelRole, ModelRoleConfig};
pub use provider::{CompletionStream, ModelClient};
pub use retry::{RetryConfig, stream_with_retries};
pub use types::{ChatMessage, ChatRole, CompletionRequest, StreamChunk, Usage};
