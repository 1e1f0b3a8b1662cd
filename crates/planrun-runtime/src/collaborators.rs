//! Traits for every external system the runtime talks to.
//!
//! The runtime owns scheduling, cancellation, and fan-out. Persistence,
//! repository writes, hooks, prompt templates, the model backend, and the build
//! queue are injected through [`Collaborators`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use planrun_core::messages::{ConvoMessage, Subtask};
use planrun_core::{ApiError, PlanKey, PlanStatus};
use planrun_llm::{ChatMessage, CompletionStream, ModelClient, ModelPack};
use serde::{Deserialize, Serialize};

use crate::errors::CollaboratorError;
use crate::orchestrator::iteration::MissingFileChoice;
use crate::orchestrator::listener::{ListenContext, ListenOutcome};
use crate::orchestrator::stage::StageDecision;
use crate::session::session::SessionParams;

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Persists the lifecycle status of a plan.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Record `status` for `key`. `message` is empty except for `Error`.
    async fn set_status(
        &self,
        key: &PlanKey,
        status: PlanStatus,
        message: &str,
    ) -> Result<(), CollaboratorError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Repository
// ─────────────────────────────────────────────────────────────────────────────

/// Who a scoped repository operation runs on behalf of.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoOwner {
    /// Organization owning the plan.
    pub org_id: String,
    /// Acting user.
    pub user_id: String,
    /// Plan and branch.
    pub key: PlanKey,
}

impl From<&SessionParams> for RepoOwner {
    fn from(params: &SessionParams) -> Self {
        Self {
            org_id: params.org_id.clone(),
            user_id: params.user_id.clone(),
            key: params.key.clone(),
        }
    }
}

/// Write access to a plan repository while the executor holds its lock.
pub trait RepoHandle: Send {
    /// Discard uncommitted changes on `branch`.
    fn clear_uncommitted_changes(&mut self, branch: &str) -> Result<(), CollaboratorError>;
}

/// Operation run against a locked repository.
pub type RepoOp = Box<dyn FnOnce(&mut dyn RepoHandle) -> Result<(), CollaboratorError> + Send>;

/// Runs repository operations under a scoped write lock.
#[async_trait]
pub trait RepoExecutor: Send + Sync {
    /// Acquire the repository for `owner`, run `op`, and release it.
    ///
    /// Implementations should give up once `deadline` elapses; callers also
    /// bound the whole call by it.
    async fn exec_scoped(
        &self,
        owner: &RepoOwner,
        reason: &str,
        deadline: Duration,
        op: RepoOp,
    ) -> Result<(), CollaboratorError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Hooks
// ─────────────────────────────────────────────────────────────────────────────

/// Extension points invoked during an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookName {
    /// Before the first attempt of a fresh request.
    WillExecPlan,
    /// Before every model call.
    WillSendModelRequest,
}

/// Size and model of the request about to be sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequestInfo {
    /// Estimated input tokens.
    pub input_tokens: usize,
    /// Tokens reserved for the reply.
    pub output_tokens: usize,
    /// Model the request goes to.
    pub model_name: String,
}

/// Arguments passed to a hook.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookParams {
    /// Plan and branch.
    pub key: PlanKey,
    /// Organization owning the plan.
    pub org_id: String,
    /// Acting user.
    pub user_id: String,
    /// Present for [`HookName::WillSendModelRequest`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_request: Option<ModelRequestInfo>,
}

/// Hook result. An `Err` from [`HookExecutor::run_hook`] is a veto.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HookResult {
    /// Opaque hook payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Runs named hooks.
#[async_trait]
pub trait HookExecutor: Send + Sync {
    /// Run `hook`. Returning an error vetoes the iteration; the error is
    /// reported to the client as-is.
    async fn run_hook(&self, hook: HookName, params: &HookParams) -> Result<HookResult, ApiError>;
}

/// Hook executor that allows everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

#[async_trait]
impl HookExecutor for NoopHooks {
    async fn run_hook(&self, _hook: HookName, _params: &HookParams) -> Result<HookResult, ApiError> {
        Ok(HookResult::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plan storage
// ─────────────────────────────────────────────────────────────────────────────

/// One loaded context item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPart {
    /// Display name (usually a file path).
    pub name: String,
    /// Content.
    pub body: String,
    /// Whether this is a project map rather than file content.
    #[serde(default)]
    pub is_map: bool,
}

/// One image attached to the plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContext {
    /// Display name.
    pub name: String,
    /// MIME type.
    pub media_type: String,
    /// Encoded image or a reference the backend understands.
    pub data: String,
    /// Token cost charged by the backend.
    pub tokens: usize,
}

/// Summary of older conversation messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvoSummary {
    /// Summary text.
    pub content: String,
    /// Token count of `content`.
    pub tokens: usize,
}

/// What an iteration loads before classifying its stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSnapshot {
    /// Conversation, oldest first.
    pub convo: Vec<ConvoMessage>,
    /// Planned subtasks.
    pub subtasks: Vec<Subtask>,
    /// Loaded context.
    pub contexts: Vec<ContextPart>,
    /// Attached images.
    pub images: Vec<ImageContext>,
    /// A project map is loaded.
    pub has_context_map: bool,
    /// The project map has no entries.
    pub context_map_empty: bool,
    /// The conversation already holds at least one model reply.
    pub has_assistant_reply: bool,
    /// Latest summary of older messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_summary: Option<ConvoSummary>,
    /// Model configs for this plan.
    pub model_pack: ModelPack,
}

/// Loads plan state for an iteration.
#[async_trait]
pub trait PlanLoader: Send + Sync {
    /// Current subtasks. Used for diagnostics only.
    async fn load_subtasks(&self, org_id: &str, plan_id: &str)
    -> Result<Vec<Subtask>, CollaboratorError>;

    /// Conversation, context, and model configuration for `key`.
    async fn load_snapshot(
        &self,
        key: &PlanKey,
        org_id: &str,
        user_id: &str,
        iteration: u32,
    ) -> Result<PlanSnapshot, ApiError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompts
// ─────────────────────────────────────────────────────────────────────────────

/// Inputs to the system prompt.
#[derive(Clone, Copy, Debug)]
pub struct SystemPromptInput<'a> {
    /// Stage decision for this iteration.
    pub stage: &'a StageDecision,
    /// Formatted context block.
    pub model_context: &'a str,
    /// The run is chat-only.
    pub is_chat_only: bool,
    /// Command execution is allowed in the plan.
    pub exec_enabled: bool,
}

/// Inputs to the final prompt message.
#[derive(Clone, Copy, Debug)]
pub struct PromptInput<'a> {
    /// User prompt of the activation.
    pub prompt: &'a str,
    /// Stage decision for this iteration.
    pub stage: &'a StageDecision,
    /// Context for a chat-only run was loaded in a previous iteration.
    pub did_load_chat_only_context: bool,
    /// Command execution is allowed in the plan.
    pub exec_enabled: bool,
}

/// Renders prompt text. Must be pure; errors are terminal.
pub trait PromptBuilder: Send + Sync {
    /// Render loaded context. Project maps are omitted unless `include_maps`.
    fn model_context(&self, contexts: &[ContextPart], include_maps: bool) -> Result<String, ApiError>;

    /// System prompt for the iteration's stage.
    fn system_prompt(&self, input: &SystemPromptInput<'_>) -> Result<String, ApiError>;

    /// Final message carrying the user prompt or a continuation.
    fn prompt_message(&self, input: &PromptInput<'_>) -> Result<ChatMessage, ApiError>;

    /// Messages resubmitting a reply that stopped on a missing file.
    fn missing_file_messages(
        &self,
        choice: MissingFileChoice,
        input: &PromptInput<'_>,
    ) -> Result<Vec<ChatMessage>, ApiError>;

    /// Image messages and their total token cost.
    fn image_messages(&self, images: &[ImageContext]) -> Result<(Vec<ChatMessage>, usize), ApiError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Builds and listening
// ─────────────────────────────────────────────────────────────────────────────

/// Queues builds of pending file changes.
#[async_trait]
pub trait BuildQueue: Send + Sync {
    /// Start building every pending change on the plan branch.
    async fn queue_pending_builds(&self, owner: &RepoOwner) -> Result<(), ApiError>;
}

/// Consumes a model stream for one reply.
#[async_trait]
pub trait StreamListener: Send + Sync {
    /// Drive `stream` to completion. The outcome decides whether the run
    /// finishes, fails, or continues with another iteration.
    async fn listen(&self, ctx: ListenContext, stream: CompletionStream) -> ListenOutcome;
}

/// Every collaborator an orchestrator needs.
#[derive(Clone)]
pub struct Collaborators {
    /// Plan status persistence.
    pub status: Arc<dyn StatusStore>,
    /// Scoped repository writes.
    pub repo: Arc<dyn RepoExecutor>,
    /// Hook pipeline.
    pub hooks: Arc<dyn HookExecutor>,
    /// Plan state loading.
    pub loader: Arc<dyn PlanLoader>,
    /// Prompt templates.
    pub prompts: Arc<dyn PromptBuilder>,
    /// Model backend.
    pub model: Arc<dyn ModelClient>,
    /// Pending build trigger.
    pub builds: Arc<dyn BuildQueue>,
    /// Reply stream consumer.
    pub listener: Arc<dyn StreamListener>,
}
