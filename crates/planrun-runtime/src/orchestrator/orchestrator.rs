//! Public entry point: activation and the iteration driver.

use std::sync::Arc;
use std::time::Duration;

use planrun_core::{ApiError, PlanKey, StreamMessage, SubscriptionId};
use planrun_llm::RetryConfig;
use planrun_settings::PlanrunSettings;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use super::iteration::{IterationAbort, IterationParams, TellRequest, run_iteration};
use super::listener::ListenOutcome;
use crate::collaborators::Collaborators;
use crate::errors::RuntimeError;
use crate::session::registry::SessionRegistry;
use crate::session::session::Session;

/// Shared state of every driver spawned by one orchestrator.
pub(crate) struct Engine {
    pub(crate) registry: SessionRegistry,
    pub(crate) collaborators: Collaborators,
    pub(crate) retry: RetryConfig,
    pub(crate) stop_sequence: String,
    pub(crate) max_iterations: u32,
}

/// Runs plans: activates sessions and drives their iterations.
///
/// Cloning is cheap; clones share the registry and collaborators.
#[derive(Clone)]
pub struct TellOrchestrator {
    engine: Arc<Engine>,
}

impl TellOrchestrator {
    /// Build an orchestrator with a fresh registry.
    pub fn new(collaborators: Collaborators, settings: &PlanrunSettings) -> Self {
        let registry = SessionRegistry::new(
            Arc::clone(&collaborators.status),
            Arc::clone(&collaborators.repo),
            settings.runtime.clone(),
        );
        let retry = RetryConfig {
            max_retries: settings.retry.max_retries,
            base_delay: Duration::from_millis(settings.retry.base_delay_ms),
            max_delay: Duration::from_millis(settings.retry.max_delay_ms),
        };
        let stop_sequence = registry.settings().stop_sequence.clone();
        let max_iterations = registry.settings().max_iterations;
        Self {
            engine: Arc::new(Engine {
                registry,
                collaborators,
                retry,
                stop_sequence,
                max_iterations,
            }),
        }
    }

    /// Registry of active sessions.
    pub fn registry(&self) -> &SessionRegistry {
        &self.engine.registry
    }

    /// Activate a plan and schedule its first iteration.
    ///
    /// Returns once the session exists; iterations run in the background and
    /// report through the session's terminal channel.
    #[instrument(skip_all, fields(plan_id = %request.plan_id, branch = %request.branch))]
    pub fn activate(&self, request: TellRequest) -> Result<(), RuntimeError> {
        validate(&request)?;
        let (session, created) = self.engine.registry.get_or_create(request.session_params())?;
        if !created {
            warn!("plan already active");
            return Err(RuntimeError::AlreadyActive {
                plan_id: request.plan_id,
                branch: request.branch,
            });
        }

        let params = IterationParams::first(Arc::new(request));
        info!(should_build_pending = params.should_build_pending, "plan activated");
        let engine = Arc::clone(&self.engine);
        let span = info_span!("driver");
        let _ = self
            .engine
            .registry
            .tracker()
            .spawn(drive(engine, session, params).instrument(span));
        Ok(())
    }

    /// Attach a subscriber to the active run of `plan_id` on `branch`.
    ///
    /// Returns `None` when no run is active. The subscription ends when
    /// `cancel` fires or the session is destroyed.
    pub fn subscribe(
        &self,
        plan_id: &str,
        branch: &str,
        cancel: CancellationToken,
    ) -> Option<(SubscriptionId, mpsc::Receiver<StreamMessage>)> {
        let session = self.engine.registry.get(&PlanKey::new(plan_id, branch))?;
        let (id, rx) = session.subscribe(cancel);
        debug!(plan_id, branch, subscription = %id, "subscribed");
        Some((id, rx))
    }

    /// Remove a subscriber. Unknown plans and ids are ignored.
    pub fn unsubscribe(&self, plan_id: &str, branch: &str, id: &SubscriptionId) {
        let removed = self
            .engine
            .registry
            .update(&PlanKey::new(plan_id, branch), |state| state.unsubscribe(id))
            .unwrap_or(false);
        debug!(plan_id, branch, subscription = %id, removed, "unsubscribed");
    }

    /// Number of active sessions.
    pub fn count(&self) -> usize {
        self.engine.registry.len()
    }

    /// Cancel the run of `plan_id` on `branch` and delete it now.
    pub async fn force_delete(&self, plan_id: &str, branch: &str) {
        let Some(session) = self.engine.registry.get(&PlanKey::new(plan_id, branch)) else {
            debug!(plan_id, branch, "no active plan to force delete");
            return;
        };
        info!(plan_id, branch, "force deleting active plan");
        session.cancel();
        self.engine.registry.delete_session(&session).await;
    }

    /// Cancel every run and wait for all background tasks.
    pub async fn shutdown(&self) {
        self.engine.registry.shutdown().await;
    }
}

fn validate(request: &TellRequest) -> Result<(), RuntimeError> {
    let required = [
        ("plan_id", &request.plan_id),
        ("branch", &request.branch),
        ("org_id", &request.org_id),
        ("user_id", &request.user_id),
    ];
    if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
        return Err(RuntimeError::InvalidRequest(format!("{field} is required")));
    }
    if request.prompt.trim().is_empty() && !request.is_user_continue {
        return Err(RuntimeError::InvalidRequest("prompt is required".into()));
    }
    Ok(())
}

/// Run iterations until the listener reports an end, delivering exactly one
/// terminal outcome unless the session was stopped from outside.
async fn drive(engine: Arc<Engine>, session: Arc<Session>, first: IterationParams) {
    let root = session.root_token();
    let mut params = first;
    loop {
        if params.iteration >= engine.max_iterations {
            error!(max = engine.max_iterations, "iteration limit reached");
            let _ = session.deliver_terminal(Err(ApiError::other(format!(
                "Plan exceeded {} iterations",
                engine.max_iterations
            ))));
            return;
        }

        // No collaborator call of a cancelled session runs past this point.
        let iteration = tokio::select! {
            biased;
            () = root.cancelled() => {
                debug!(iteration = params.iteration, "session cancelled during iteration setup");
                return;
            }
            result = run_iteration(&engine, &session, &params) => result,
        };
        let pending = match iteration {
            Ok(pending) => pending,
            Err(IterationAbort::Inactive) => return,
            Err(IterationAbort::Failed(err)) => {
                let _ = session.deliver_terminal(Err(err));
                return;
            }
        };

        let reply_id = pending.reply_id;
        let mut listener = pending.listener;
        let outcome = tokio::select! {
            biased;
            joined = &mut listener => joined,
            () = root.cancelled() => {
                debug!(%reply_id, "session cancelled while listening");
                // The listener observes the stream scope and exits on its own.
                return;
            }
        };

        match outcome {
            Ok(ListenOutcome::Finished) => {
                let _ = session.deliver_terminal(Ok(()));
                return;
            }
            Ok(ListenOutcome::Failed(err)) => {
                let _ = session.deliver_terminal(Err(err));
                return;
            }
            Ok(ListenOutcome::Continue(follow_up)) => {
                debug!(%reply_id, ?follow_up, "continuing with next iteration");
                params = params.next(follow_up);
            }
            Ok(ListenOutcome::Cancelled) => {
                debug!(%reply_id, "reply cancelled");
                if !session.is_cancelled() && !session.with_state(|s| s.is_terminal_delivered()) {
                    let _ = session.deliver_terminal(Ok(()));
                }
                return;
            }
            Err(e) => {
                error!(%reply_id, error = %e, "listener task failed");
                let _ = session.deliver_terminal(Err(ApiError::other(format!(
                    "Reply listener failed: {e}"
                ))));
                return;
            }
        }
    }
}
