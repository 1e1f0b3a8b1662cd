//! Shared test utilities: fakes for every collaborator plus small helpers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use planrun_core::messages::Subtask;
use planrun_core::{ApiError, PlanKey, PlanStatus};
use planrun_llm::{
    BaseModelConfig, CompletionRequest, CompletionStream, ModelClient, ModelPack, ModelRole,
    ModelRoleConfig, ProviderError, StreamChunk, Usage,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{
    BuildQueue, Collaborators, ContextPart, HookExecutor, HookName, HookParams, HookResult,
    PlanLoader, PlanSnapshot, RepoExecutor, RepoHandle, RepoOp, RepoOwner, StatusStore,
    StreamListener,
};
use crate::errors::CollaboratorError;
use crate::orchestrator::listener::{ListenContext, ListenOutcome, ReplyStreamListener};
use crate::orchestrator::prompts::BasicPromptBuilder;
use crate::session::session::SessionParams;

/// Session parameters for `plan_id` on `branch`.
pub fn session_params(plan_id: &str, branch: &str) -> SessionParams {
    SessionParams {
        key: PlanKey::new(plan_id, branch),
        org_id: "org".into(),
        user_id: "user".into(),
        prompt: "do the thing".into(),
        build_only: false,
        auto_context: false,
    }
}

/// Poll `check` until it holds. Panics after ~5 s.
pub async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Model pack whose roles accept roughly `max_tokens` input tokens each.
pub fn model_pack(max_tokens: usize) -> ModelPack {
    let role = |role: ModelRole, name: &str| ModelRoleConfig {
        role,
        base: BaseModelConfig {
            provider: "test".into(),
            model_name: name.into(),
            max_tokens,
            reserved_output_tokens: max_tokens / 10,
        },
        temperature: Some(0.2),
        top_p: None,
        large_context_fallback: None,
    };
    ModelPack {
        planner: role(ModelRole::Planner, "planner-model"),
        coder: Some(role(ModelRole::Coder, "coder-model")),
        architect: Some(role(ModelRole::Architect, "architect-model")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Records every successful status write.
#[derive(Default)]
pub struct RecordingStatus {
    records: Mutex<Vec<(PlanKey, PlanStatus, String)>>,
    fail: AtomicBool,
}

impl RecordingStatus {
    /// Make every later write fail.
    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<(PlanKey, PlanStatus, String)> {
        self.records.lock().clone()
    }

    pub fn statuses_for(&self, key: &PlanKey) -> Vec<PlanStatus> {
        self.records
            .lock()
            .iter()
            .filter(|(k, _, _)| k == key)
            .map(|(_, s, _)| *s)
            .collect()
    }

    pub fn count(&self, status: PlanStatus) -> usize {
        self.records.lock().iter().filter(|(_, s, _)| *s == status).count()
    }
}

#[async_trait]
impl StatusStore for RecordingStatus {
    async fn set_status(
        &self,
        key: &PlanKey,
        status: PlanStatus,
        message: &str,
    ) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("status store unavailable"));
        }
        self.records
            .lock()
            .push((key.clone(), status, message.to_string()));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Repository
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
enum RepoMode {
    #[default]
    Ok,
    Fail(String),
    Hang,
}

/// Repository executor that records cleared branches.
#[derive(Default)]
pub struct FakeRepo {
    cleared: Mutex<Vec<String>>,
    mode: Mutex<RepoMode>,
}

impl FakeRepo {
    pub fn fail_with(&self, message: &str) {
        *self.mode.lock() = RepoMode::Fail(message.into());
    }

    /// Never complete `exec_scoped`.
    pub fn hang(&self) {
        *self.mode.lock() = RepoMode::Hang;
    }

    pub fn cleared_branches(&self) -> Vec<String> {
        self.cleared.lock().clone()
    }
}

#[derive(Default)]
struct RecordingHandle {
    cleared: Vec<String>,
}

impl RepoHandle for RecordingHandle {
    fn clear_uncommitted_changes(&mut self, branch: &str) -> Result<(), CollaboratorError> {
        self.cleared.push(branch.to_string());
        Ok(())
    }
}

#[async_trait]
impl RepoExecutor for FakeRepo {
    async fn exec_scoped(
        &self,
        _owner: &RepoOwner,
        _reason: &str,
        _deadline: Duration,
        op: RepoOp,
    ) -> Result<(), CollaboratorError> {
        let mode = self.mode.lock().clone();
        match mode {
            RepoMode::Ok => {
                let mut handle = RecordingHandle::default();
                op(&mut handle)?;
                self.cleared.lock().extend(handle.cleared);
                Ok(())
            }
            RepoMode::Fail(message) => Err(CollaboratorError::Failed(message)),
            RepoMode::Hang => std::future::pending().await,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hooks
// ─────────────────────────────────────────────────────────────────────────────

/// Hook executor with per-hook rejections, an optional held hook, and a call
/// log.
pub struct FakeHooks {
    rejections: Mutex<HashMap<HookName, ApiError>>,
    calls: Mutex<Vec<HookName>>,
    held: Mutex<Option<HookName>>,
    gate: watch::Sender<bool>,
}

impl Default for FakeHooks {
    fn default() -> Self {
        Self {
            rejections: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            held: Mutex::new(None),
            gate: watch::channel(true).0,
        }
    }
}

impl FakeHooks {
    pub fn reject(&self, hook: HookName, err: ApiError) {
        let _ = self.rejections.lock().insert(hook, err);
    }

    /// Block calls of `hook` until [`release`](Self::release).
    pub fn hold(&self, hook: HookName) {
        *self.held.lock() = Some(hook);
        let _ = self.gate.send_replace(false);
    }

    pub fn release(&self) {
        *self.held.lock() = None;
        let _ = self.gate.send_replace(true);
    }

    pub fn calls_of(&self, hook: HookName) -> usize {
        self.calls.lock().iter().filter(|h| **h == hook).count()
    }
}

#[async_trait]
impl HookExecutor for FakeHooks {
    async fn run_hook(&self, hook: HookName, _params: &HookParams) -> Result<HookResult, ApiError> {
        self.calls.lock().push(hook);
        let held = *self.held.lock() == Some(hook);
        if held {
            let mut gate = self.gate.subscribe();
            let _ = gate.wait_for(|open| *open).await;
        }
        let rejection = self.rejections.lock().get(&hook).cloned();
        match rejection {
            Some(err) => Err(err),
            None => Ok(HookResult::default()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plan storage
// ─────────────────────────────────────────────────────────────────────────────

/// Loader returning an empty conversation and a configurable model pack.
pub struct FakeLoader {
    context_map: AtomicBool,
    pack: Mutex<ModelPack>,
}

impl Default for FakeLoader {
    fn default() -> Self {
        Self {
            context_map: AtomicBool::new(false),
            pack: Mutex::new(model_pack(100_000)),
        }
    }
}

impl FakeLoader {
    pub fn set_context_map(&self, present: bool) {
        self.context_map.store(present, Ordering::SeqCst);
    }

    pub fn set_pack(&self, pack: ModelPack) {
        *self.pack.lock() = pack;
    }
}

#[async_trait]
impl PlanLoader for FakeLoader {
    async fn load_subtasks(
        &self,
        _org_id: &str,
        _plan_id: &str,
    ) -> Result<Vec<Subtask>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn load_snapshot(
        &self,
        _key: &PlanKey,
        _org_id: &str,
        _user_id: &str,
        _iteration: u32,
    ) -> Result<PlanSnapshot, ApiError> {
        let has_map = self.context_map.load(Ordering::SeqCst);
        let mut contexts = vec![ContextPart {
            name: "src/lib.rs".into(),
            body: "pub fn run() {}\n".into(),
            is_map: false,
        }];
        if has_map {
            contexts.push(ContextPart {
                name: "project".into(),
                body: "src/lib.rs: run\n".into(),
                is_map: true,
            });
        }
        Ok(PlanSnapshot {
            convo: Vec::new(),
            subtasks: Vec::new(),
            contexts,
            images: Vec::new(),
            has_context_map: has_map,
            context_map_empty: false,
            has_assistant_reply: false,
            latest_summary: None,
            model_pack: self.pack.lock().clone(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model
// ─────────────────────────────────────────────────────────────────────────────

/// Model client replaying scripted deltas.
pub struct FakeModel {
    calls: AtomicUsize,
    script: Mutex<Vec<String>>,
    failure: Mutex<Option<ProviderError>>,
    hold: AtomicBool,
    last: Mutex<Option<(String, CompletionRequest)>>,
}

impl Default for FakeModel {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(vec!["All done.".into()]),
            failure: Mutex::new(None),
            hold: AtomicBool::new(false),
            last: Mutex::new(None),
        }
    }
}

impl FakeModel {
    pub fn script(&self, deltas: Vec<String>) {
        *self.script.lock() = deltas;
    }

    pub fn fail_with(&self, err: ProviderError) {
        *self.failure.lock() = Some(err);
    }

    /// Keep every stream open until it is cancelled.
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last.lock().as_ref().map(|(_, req)| req.clone())
    }

    pub fn last_model(&self) -> Option<String> {
        self.last.lock().as_ref().map(|(model, _)| model.clone())
    }
}

#[async_trait]
impl ModelClient for FakeModel {
    async fn stream_completion(
        &self,
        config: &ModelRoleConfig,
        cancel: CancellationToken,
        request: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some((config.base.model_name.clone(), request));
        let failure = self.failure.lock().clone();
        if let Some(err) = failure {
            return Err(err);
        }
        if self.hold.load(Ordering::SeqCst) {
            return Ok(Box::pin(async_stream::stream! {
                cancel.cancelled().await;
                yield Err(ProviderError::Cancelled);
            }));
        }
        let deltas = self.script.lock().clone();
        Ok(Box::pin(async_stream::stream! {
            for content in deltas {
                yield Ok(StreamChunk::Delta { content });
            }
            yield Ok(StreamChunk::Usage { usage: Usage { input_tokens: 10, output_tokens: 3 } });
            yield Ok(StreamChunk::Done { finish_reason: Some("stop".into()) });
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builds and listening
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeBuilds {
    calls: AtomicUsize,
}

impl FakeBuilds {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildQueue for FakeBuilds {
    async fn queue_pending_builds(&self, _owner: &RepoOwner) -> Result<(), ApiError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Listener returning queued outcomes in order, then `Finished`.
#[derive(Default)]
pub struct ScriptedListener {
    outcomes: Mutex<VecDeque<ListenOutcome>>,
    iterations: Mutex<Vec<u32>>,
}

impl ScriptedListener {
    pub fn push(&self, outcome: ListenOutcome) {
        self.outcomes.lock().push_back(outcome);
    }

    pub fn iterations(&self) -> Vec<u32> {
        self.iterations.lock().clone()
    }
}

#[async_trait]
impl StreamListener for ScriptedListener {
    async fn listen(&self, ctx: ListenContext, _stream: CompletionStream) -> ListenOutcome {
        self.iterations.lock().push(ctx.iteration);
        ctx.session.finish_reply();
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or(ListenOutcome::Finished)
    }
}

/// One of each fake, shared with the [`Collaborators`] built from them.
#[derive(Default)]
pub struct TestDeps {
    pub status: Arc<RecordingStatus>,
    pub repo: Arc<FakeRepo>,
    pub hooks: Arc<FakeHooks>,
    pub loader: Arc<FakeLoader>,
    pub model: Arc<FakeModel>,
    pub builds: Arc<FakeBuilds>,
    pub listener: Arc<ScriptedListener>,
}

impl TestDeps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collaborators using the real reply listener.
    pub fn collaborators(&self) -> Collaborators {
        self.build(Arc::new(ReplyStreamListener))
    }

    /// Collaborators using [`ScriptedListener`].
    pub fn collaborators_with_listener(&self) -> Collaborators {
        self.build(self.listener.clone())
    }

    fn build(&self, listener: Arc<dyn StreamListener>) -> Collaborators {
        Collaborators {
            status: self.status.clone(),
            repo: self.repo.clone(),
            hooks: self.hooks.clone(),
            loader: self.loader.clone(),
            prompts: Arc::new(BasicPromptBuilder),
            model: self.model.clone(),
            builds: self.builds.clone(),
            listener,
        }
    }
}
