//! One iteration of a plan run.
//!
//! An iteration loads plan state, classifies its stage, assembles a request
//! within the token budget, runs the hooks, starts the model stream, and hands
//! the stream to the listener. Every fatal condition is returned as
//! [`IterationAbort::Failed`]; the driver turns it into the single terminal
//! outcome of the run.

use std::sync::Arc;

use metrics::{counter, histogram};
use planrun_core::messages::partition_subtasks;
use planrun_core::metrics::{MODEL_REQUESTS_TOTAL, PLAN_ITERATIONS_TOTAL, REQUEST_TOKENS};
use planrun_core::{ApiError, PlanKey, PlanStatus, ReplyId};
use planrun_llm::tokens::{TOKENS_PER_REQUEST, estimate_messages_tokens};
use planrun_llm::{ChatMessage, CompletionRequest, ProviderError, stream_with_retries};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use super::budget::{TokenBudget, fit_conversation};
use super::listener::{ListenContext, ListenOutcome, ReplyParser};
use super::orchestrator::Engine;
use super::stage::{LastMessage, StageInputs, classify};
use crate::collaborators::{
    HookName, HookParams, ModelRequestInfo, PromptInput, RepoOwner, SystemPromptInput,
};
use crate::session::session::{Session, SessionParams};

/// When pending changes are built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    /// Build as soon as a reply starts.
    #[default]
    Auto,
    /// Build only on request.
    Manual,
}

/// How to resume a reply that stopped on a file missing from context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFileChoice {
    /// The file was loaded; continue.
    Load,
    /// Continue without the file.
    Skip,
    /// Write the file from scratch.
    Overwrite,
}

/// Flags a listener supplies when it asks for another iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FollowUp {
    /// Load more context before continuing.
    pub should_load_follow_up_context: bool,
    /// Follow-up context was loaded.
    pub did_load_follow_up_context: bool,
    /// A follow-up plan was made.
    pub did_make_follow_up_plan: bool,
    /// Context for a chat-only run was loaded.
    pub did_load_chat_only_context: bool,
    /// Resubmit the last reply after a missing file.
    pub missing_file_response: Option<MissingFileChoice>,
}

/// A request to run a plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TellRequest {
    /// Plan identifier.
    pub plan_id: String,
    /// Branch name.
    pub branch: String,
    /// Organization owning the plan.
    pub org_id: String,
    /// Acting user.
    pub user_id: String,
    /// User prompt.
    pub prompt: String,
    /// Chat without changing files.
    #[serde(default)]
    pub is_chat_only: bool,
    /// Load context automatically.
    #[serde(default)]
    pub auto_context: bool,
    /// Allow command execution.
    #[serde(default)]
    pub exec_enabled: bool,
    /// When pending changes are built.
    #[serde(default)]
    pub build_mode: BuildMode,
    /// Continue the previous reply.
    #[serde(default)]
    pub is_user_continue: bool,
    /// Only build pending changes.
    #[serde(default)]
    pub build_only: bool,
}

impl TellRequest {
    /// Plan and branch.
    pub fn key(&self) -> PlanKey {
        PlanKey::new(&self.plan_id, &self.branch)
    }

    /// Whether the first iteration queues pending builds.
    pub fn should_build_pending(&self) -> bool {
        !self.is_chat_only && self.build_mode == BuildMode::Auto
    }

    pub(crate) fn session_params(&self) -> SessionParams {
        SessionParams {
            key: self.key(),
            org_id: self.org_id.clone(),
            user_id: self.user_id.clone(),
            prompt: self.prompt.clone(),
            build_only: self.build_only,
            auto_context: self.auto_context,
        }
    }
}

/// Parameters of one iteration. Built fresh for each iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IterationParams {
    /// Originating request.
    pub request: Arc<TellRequest>,
    /// 0 for the first iteration of an activation.
    pub iteration: u32,
    /// Queue pending builds once the stream starts.
    pub should_build_pending: bool,
    /// Flags carried over from the previous iteration.
    pub follow_up: FollowUp,
}

impl IterationParams {
    /// Parameters of iteration 0.
    pub fn first(request: Arc<TellRequest>) -> Self {
        let should_build_pending = request.should_build_pending();
        Self {
            request,
            iteration: 0,
            should_build_pending,
            follow_up: FollowUp::default(),
        }
    }

    /// Parameters of the iteration after this one.
    pub fn next(&self, follow_up: FollowUp) -> Self {
        Self {
            request: Arc::clone(&self.request),
            iteration: self.iteration + 1,
            should_build_pending: false,
            follow_up,
        }
    }
}

/// Why an iteration stopped before handing off a stream.
#[derive(Debug)]
pub(crate) enum IterationAbort {
    /// The session is gone or cancelled; nothing to report.
    Inactive,
    /// A fatal error for the terminal channel.
    Failed(ApiError),
}

impl From<ApiError> for IterationAbort {
    fn from(err: ApiError) -> Self {
        Self::Failed(err)
    }
}

/// A model stream handed to the listener.
pub(crate) struct PendingReply {
    pub(crate) reply_id: ReplyId,
    pub(crate) listener: JoinHandle<ListenOutcome>,
}

fn hook_params(request: &TellRequest, model_request: Option<ModelRequestInfo>) -> HookParams {
    HookParams {
        key: request.key(),
        org_id: request.org_id.clone(),
        user_id: request.user_id.clone(),
        model_request,
    }
}

/// Run one iteration up to the listener hand-off.
#[instrument(
    skip_all,
    fields(plan_id = %params.request.plan_id, branch = %params.request.branch, iteration = params.iteration)
)]
pub(crate) async fn run_iteration(
    engine: &Engine,
    session: &Arc<Session>,
    params: &IterationParams,
) -> Result<PendingReply, IterationAbort> {
    let request = params.request.as_ref();
    let key = request.key();
    let deps = &engine.collaborators;

    // 1. The session must still be the registered one.
    match engine.registry.get(&key) {
        Some(current) if Arc::ptr_eq(&current, session) && !session.is_cancelled() => {}
        _ => {
            debug!("active plan no longer registered, stopping iteration");
            return Err(IterationAbort::Inactive);
        }
    }

    // 2. Subtask state, for diagnostics only.
    match deps.loader.load_subtasks(&request.org_id, &request.plan_id).await {
        Ok(subtasks) => {
            let (finished, unfinished) = partition_subtasks(&subtasks);
            debug!(total = subtasks.len(), ?finished, ?unfinished, "subtask state");
        }
        Err(e) => warn!(error = %e, "failed to load subtasks"),
    }

    // 3. Pre-execution hook, skipped when resubmitting after a missing file.
    if params.follow_up.missing_file_response.is_none() {
        let _ = deps
            .hooks
            .run_hook(HookName::WillExecPlan, &hook_params(request, None))
            .await?;
    }

    // 4. A stopped session keeps the status its supervisor wrote.
    if session.is_cancelled() {
        return Err(IterationAbort::Inactive);
    }
    if let Err(e) = deps
        .status
        .set_status(&key, PlanStatus::Replying, "")
        .await
    {
        error!(error = %e, "failed to set plan status to replying");
        return Err(ApiError::precondition("Error setting plan status to replying").into());
    }

    // 5.
    let snapshot = deps
        .loader
        .load_snapshot(&key, &request.org_id, &request.user_id, params.iteration)
        .await?;

    // 6.
    let inputs = StageInputs {
        iteration: params.iteration,
        is_chat_only: request.is_chat_only,
        is_user_continue: request.is_user_continue,
        auto_context: request.auto_context,
        has_context_map: snapshot.has_context_map,
        context_map_empty: snapshot.context_map_empty,
        has_assistant_reply: snapshot.has_assistant_reply,
        has_subtasks: !snapshot.subtasks.is_empty(),
        last_message: snapshot.convo.last().map(LastMessage::from),
        should_load_follow_up_context: params.follow_up.should_load_follow_up_context,
    };
    let stage = classify(&inputs);
    counter!(PLAN_ITERATIONS_TOTAL, "stage" => stage.stage.as_str()).increment(1);
    info!(
        stage = stage.stage.as_str(),
        is_follow_up = stage.is_follow_up,
        is_user_prompt = stage.is_user_prompt,
        "iteration stage"
    );

    // 7. Fixed part of the request and the budget check.
    let include_maps = !(request.auto_context && params.iteration > 1);
    let model_context = deps.prompts.model_context(&snapshot.contexts, include_maps)?;
    let system = deps.prompts.system_prompt(&SystemPromptInput {
        stage: &stage,
        model_context: &model_context,
        is_chat_only: request.is_chat_only,
        exec_enabled: request.exec_enabled,
    })?;
    let prompt_input = PromptInput {
        prompt: &request.prompt,
        stage: &stage,
        did_load_chat_only_context: request.is_chat_only
            && params.follow_up.did_load_chat_only_context,
        exec_enabled: request.exec_enabled,
    };
    let prompt_message = deps.prompts.prompt_message(&prompt_input)?;
    let (image_messages, image_tokens) = deps.prompts.image_messages(&snapshot.images)?;

    let system_message = ChatMessage::system(system);
    let summary_tokens = snapshot.latest_summary.as_ref().map_or(0, |s| s.tokens);
    let role_config = snapshot.model_pack.role(stage.stage.model_role());
    let budget = TokenBudget {
        before_convo: estimate_messages_tokens([&system_message, &prompt_message])
            + summary_tokens
            + image_tokens
            + TOKENS_PER_REQUEST,
        max_tokens: role_config.effective_max_tokens(),
    };
    debug!(
        before_convo = budget.before_convo,
        max_tokens = budget.max_tokens,
        image_tokens,
        summary_tokens,
        "token budget"
    );
    if budget.exceeded() {
        warn!(
            before_convo = budget.before_convo,
            max_tokens = budget.max_tokens,
            "token limit exceeded before adding conversation"
        );
        return Err(ApiError::resource_limit("Token limit exceeded before adding conversation").into());
    }

    // 8. Conversation and final prompt.
    let fit = fit_conversation(
        &snapshot.convo,
        snapshot.latest_summary.as_ref(),
        budget.remaining(),
    );
    if fit.dropped > 0 {
        debug!(dropped = fit.dropped, "older conversation left out");
    }
    let mut text_messages = vec![system_message];
    text_messages.extend(fit.messages);
    match params.follow_up.missing_file_response {
        Some(choice) => {
            text_messages.extend(deps.prompts.missing_file_messages(choice, &prompt_input)?);
        }
        None => text_messages.push(prompt_message),
    }
    let request_tokens = estimate_messages_tokens(&text_messages) + image_tokens + TOKENS_PER_REQUEST;

    // 9.
    let model_config = role_config.role_for_input_tokens(request_tokens).clone();
    let model_name = model_config.base.model_name.clone();

    // 10.
    let _ = deps
        .hooks
        .run_hook(
            HookName::WillSendModelRequest,
            &hook_params(
                request,
                Some(ModelRequestInfo {
                    input_tokens: request_tokens,
                    output_tokens: model_config.reserved_output_tokens(),
                    model_name: model_name.clone(),
                }),
            ),
        )
        .await?;

    // 11.
    let mut messages = Vec::with_capacity(text_messages.len() + image_messages.len());
    let mut text_messages = text_messages.into_iter();
    messages.extend(text_messages.next());
    messages.extend(image_messages);
    messages.extend(text_messages);

    let completion = CompletionRequest {
        model: model_name.clone(),
        messages,
        stream: true,
        include_usage: true,
        temperature: model_config.temperature,
        top_p: model_config.top_p,
        stop: vec![engine.stop_sequence.clone()],
    };
    counter!(MODEL_REQUESTS_TOTAL, "model" => model_name.clone()).increment(1);
    histogram!(REQUEST_TOKENS).record(request_tokens as f64);
    info!(model = %model_name, request_tokens, "starting model stream");

    let stream_cancel = session.begin_stream();
    let stream = match stream_with_retries(
        deps.model.as_ref(),
        &model_config,
        &stream_cancel,
        &completion,
        &engine.retry,
    )
    .await
    {
        Ok(stream) => stream,
        Err(ProviderError::Cancelled) => {
            debug!("model stream cancelled before it started");
            return Err(IterationAbort::Inactive);
        }
        Err(e) => {
            error!(error = %e, "error starting reply stream");
            return Err(ApiError::invocation(format!("Error starting reply stream: {e}")).into());
        }
    };

    // 12.
    if params.should_build_pending {
        let builds = Arc::clone(&deps.builds);
        let owner = RepoOwner::from(session.params());
        let _ = engine.registry.tracker().spawn(
            async move {
                if let Err(e) = builds.queue_pending_builds(&owner).await {
                    warn!(error = %e, "failed to queue pending builds");
                }
            }
            .in_current_span(),
        );
    }

    // 13.
    let reply_id = ReplyId::new();
    let Some(_reply_done) = engine
        .registry
        .update(&key, |state| state.begin_reply(reply_id.clone()))
    else {
        debug!("active plan removed before the reply started");
        return Err(IterationAbort::Inactive);
    };

    let ctx = ListenContext {
        session: Arc::clone(session),
        reply_id: reply_id.clone(),
        iteration: params.iteration,
        stage,
        request_tokens,
        model_name,
        cancel: stream_cancel,
        parser: ReplyParser::new(),
    };
    let listener = Arc::clone(&deps.listener);
    let span = info_span!("listener", %reply_id);
    let handle = engine
        .registry
        .tracker()
        .spawn(async move { listener.listen(ctx, stream).await }.instrument(span));

    Ok(PendingReply {
        reply_id,
        listener: handle,
    })
}
