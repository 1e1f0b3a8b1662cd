//! # planrun-runtime
//!
//! Concurrency control plane for active plan runs.
//!
//! - **Registry**: one [`Session`] per `(plan, branch)`, created and destroyed atomically
//! - **Supervisor**: one task per session turning its terminal outcome into status,
//!   a client message, and deletion
//! - **Hub**: per-session subscriber fan-out with a coalescing output buffer
//! - **Orchestrator**: activation plus the iteration loop (stage classification,
//!   token budget, hooks, model call, reply listening)
//!
//! External systems (status store, repository, hooks, plan storage, prompt
//! templates, model backend, build queue) are reached only through the traits in
//! [`collaborators`].
//!
//! ## Crate Position
//!
//! Aggregation layer. Depends on: planrun-core, planrun-settings, planrun-llm.

#![deny(unsafe_code)]

pub mod collaborators;
pub mod errors;
pub mod orchestrator;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use collaborators::{
    BuildQueue, Collaborators, HookExecutor, HookName, HookParams, HookResult, PlanLoader,
    PlanSnapshot, PromptBuilder, RepoExecutor, RepoHandle, RepoOwner, StatusStore,
    StreamListener,
};
pub use errors::{CollaboratorError, RuntimeError};
pub use orchestrator::iteration::{BuildMode, FollowUp, MissingFileChoice, TellRequest};
pub use orchestrator::listener::{ListenContext, ListenOutcome, ReplyParser, ReplyStreamListener};
pub use orchestrator::orchestrator::TellOrchestrator;
pub use orchestrator::prompts::BasicPromptBuilder;
pub use orchestrator::stage::{Stage, StageDecision, StageInputs, classify};
pub use session::registry::SessionRegistry;
pub use session::session::{Session, SessionParams, SessionState, TerminalOutcome};
