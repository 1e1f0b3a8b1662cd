//! Per-session supervisor task.
//!
//! The supervisor is the only place a run's end is turned into side effects.
//! It waits for exactly one of:
//!
//! - root cancellation → status `Stopped`, then delete;
//! - terminal `Ok` → status `Finished`, cancel root, delete;
//! - terminal `Err` → status `Error`, stream the error, flush, cancel the
//!   stream scope, wait the grace interval, cancel root, delete.
//!
//! Buffered reply output is flushed on a fixed tick while it waits.

use std::sync::Arc;

use metrics::counter;
use planrun_core::metrics::PLAN_TERMINAL_TOTAL;
use planrun_core::{ApiError, PlanStatus, StreamMessage};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info, info_span, warn};

use super::registry::SessionRegistry;
use super::session::{Session, TerminalOutcome};

/// Start the supervisor for `session` on the registry's task tracker.
pub(crate) fn spawn(
    registry: SessionRegistry,
    session: Arc<Session>,
    done: oneshot::Receiver<TerminalOutcome>,
) {
    let span = info_span!(
        "supervisor",
        plan_id = %session.key().plan_id,
        branch = %session.key().branch
    );
    let tracker = registry.tracker().clone();
    let _ = tracker.spawn(supervise(registry, session, done).instrument(span));
}

async fn supervise(
    registry: SessionRegistry,
    session: Arc<Session>,
    mut done: oneshot::Receiver<TerminalOutcome>,
) {
    let root = session.root_token();
    let mut flush = tokio::time::interval(registry.settings().buffer_flush_interval());
    flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = root.cancelled() => {
                on_stopped(&registry, &session).await;
                return;
            }
            outcome = &mut done => {
                match outcome {
                    Ok(Ok(())) => on_finished(&registry, &session).await,
                    Ok(Err(err)) => on_error(&registry, &session, err).await,
                    Err(_) => {
                        warn!("terminal channel closed without an outcome");
                        on_stopped(&registry, &session).await;
                    }
                }
                return;
            }
            _ = flush.tick() => session.flush_buffer(),
        }
    }
}

async fn on_stopped(registry: &SessionRegistry, session: &Arc<Session>) {
    info!("active plan stopped");
    counter!(PLAN_TERMINAL_TOTAL, "status" => PlanStatus::Stopped.as_str()).increment(1);
    set_status(registry, session, PlanStatus::Stopped, "").await;
    registry.delete_session(session).await;
}

async fn on_finished(registry: &SessionRegistry, session: &Arc<Session>) {
    info!("active plan finished");
    counter!(PLAN_TERMINAL_TOTAL, "status" => PlanStatus::Finished.as_str()).increment(1);
    set_status(registry, session, PlanStatus::Finished, "").await;
    session.cancel();
    registry.delete_session(session).await;
}

async fn on_error(registry: &SessionRegistry, session: &Arc<Session>, err: ApiError) {
    error!(kind = err.kind.as_str(), status = err.status, message = %err.message, "active plan failed");
    counter!(PLAN_TERMINAL_TOTAL, "status" => PlanStatus::Error.as_str()).increment(1);
    set_status(registry, session, PlanStatus::Error, &err.message).await;

    session.publish(StreamMessage::Error { error: err });
    session.flush_buffer();
    session.cancel_stream();

    // Subscribers get the grace interval to drain before the root goes.
    tokio::time::sleep(registry.settings().error_grace()).await;
    session.cancel();
    registry.delete_session(session).await;
}

async fn set_status(registry: &SessionRegistry, session: &Session, status: PlanStatus, message: &str) {
    if let Err(e) = registry
        .status_store()
        .set_status(session.key(), status, message)
        .await
    {
        error!(status = status.as_str(), error = %e, "failed to set plan status");
    }
}
