//! One active plan run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use planrun_core::{ApiError, PlanKey, ReplyId, StreamMessage, SubscriptionId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::hub::SubscriptionHub;

/// Result an iteration reports on a session's terminal channel.
pub type TerminalOutcome = Result<(), ApiError>;

/// Immutable request parameters of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionParams {
    /// Plan and branch.
    pub key: PlanKey,
    /// Organization owning the plan.
    pub org_id: String,
    /// Acting user.
    pub user_id: String,
    /// User prompt that started the run.
    pub prompt: String,
    /// Only build pending changes, no new reply.
    pub build_only: bool,
    /// Context is loaded automatically.
    pub auto_context: bool,
}

/// Mutable state of a session, reachable only under its lock.
#[derive(Debug)]
pub struct SessionState {
    terminal: Option<oneshot::Sender<TerminalOutcome>>,
    current_reply_id: Option<ReplyId>,
    reply_done: Option<watch::Sender<bool>>,
    stream_scope: CancellationToken,
    hub: SubscriptionHub,
}

impl SessionState {
    /// Publish a message to subscribers.
    pub fn publish(&mut self, msg: StreamMessage) {
        self.hub.publish(msg);
    }

    /// Deliver buffered reply output.
    pub fn flush_buffer(&mut self) {
        self.hub.flush_buffer();
    }

    /// Remove a subscriber; unknown ids are ignored.
    pub fn unsubscribe(&mut self, id: &SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// Reply currently streaming, if any.
    pub fn current_reply_id(&self) -> Option<&ReplyId> {
        self.current_reply_id.as_ref()
    }

    /// Record a new streaming reply and open its completion signal.
    ///
    /// Any previous reply's signal is completed first.
    pub fn begin_reply(&mut self, reply_id: ReplyId) -> watch::Receiver<bool> {
        self.finish_reply();
        let (tx, rx) = watch::channel(false);
        self.current_reply_id = Some(reply_id);
        self.reply_done = Some(tx);
        rx
    }

    /// Complete the current reply's signal, if one is open.
    pub fn finish_reply(&mut self) {
        if let Some(tx) = self.reply_done.take() {
            let _ = tx.send(true);
        }
    }

    /// Watch the current reply's completion signal.
    pub fn reply_done(&self) -> Option<watch::Receiver<bool>> {
        self.reply_done.as_ref().map(watch::Sender::subscribe)
    }

    /// Whether the terminal outcome has already been delivered.
    pub fn is_terminal_delivered(&self) -> bool {
        self.terminal.is_none()
    }
}

/// An active plan run: request parameters, cancellation scopes, and state.
///
/// The root scope bounds every task of the run. The stream scope is a child
/// renewed for each model call so a failed reply can be halted without
/// waiting for the root.
#[derive(Debug)]
pub struct Session {
    params: SessionParams,
    root: CancellationToken,
    state: Mutex<SessionState>,
    tracker: TaskTracker,
    destroyed: AtomicBool,
}

impl Session {
    /// Build a session and the receiving end of its terminal channel.
    pub(crate) fn new(
        params: SessionParams,
        subscriber_buffer: usize,
        flush_bytes: usize,
        tracker: TaskTracker,
    ) -> (Arc<Self>, oneshot::Receiver<TerminalOutcome>) {
        let (tx, rx) = oneshot::channel();
        let root = CancellationToken::new();
        let stream_scope = root.child_token();
        let session = Arc::new(Self {
            params,
            root,
            state: Mutex::new(SessionState {
                terminal: Some(tx),
                current_reply_id: None,
                reply_done: None,
                stream_scope,
                hub: SubscriptionHub::new(subscriber_buffer, flush_bytes, tracker.clone()),
            }),
            tracker,
            destroyed: AtomicBool::new(false),
        });
        (session, rx)
    }

    /// Request parameters.
    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    /// Plan and branch.
    pub fn key(&self) -> &PlanKey {
        &self.params.key
    }

    /// Run `f` under the state lock. Never held across an await.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.state.lock())
    }

    // ── Cancellation ──

    /// Root scope of the run.
    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Whether the root scope is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel the root scope (and with it the stream scope).
    pub fn cancel(&self) {
        self.root.cancel();
    }

    /// Current stream scope.
    pub fn stream_token(&self) -> CancellationToken {
        self.with_state(|s| s.stream_scope.clone())
    }

    /// Open a fresh stream scope for the next model call.
    pub(crate) fn begin_stream(&self) -> CancellationToken {
        let token = self.root.child_token();
        self.with_state(|s| s.stream_scope = token.clone());
        token
    }

    /// Cancel the current stream scope only.
    pub fn cancel_stream(&self) {
        self.with_state(|s| s.stream_scope.cancel());
    }

    // ── Output ──

    /// Publish a message to subscribers.
    pub fn publish(&self, msg: StreamMessage) {
        self.with_state(|s| s.publish(msg));
    }

    /// Deliver buffered reply output.
    pub fn flush_buffer(&self) {
        self.with_state(SessionState::flush_buffer);
    }

    /// Complete the current reply's signal.
    pub fn finish_reply(&self) {
        self.with_state(SessionState::finish_reply);
    }

    /// Reply currently streaming, if any.
    pub fn current_reply_id(&self) -> Option<ReplyId> {
        self.with_state(|s| s.current_reply_id().cloned())
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.with_state(|s| s.subscriber_count())
    }

    /// Attach a subscriber. When `cancel` fires the subscription is removed.
    pub fn subscribe(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> (SubscriptionId, mpsc::Receiver<StreamMessage>) {
        let (id, rx) = self.with_state(|s| s.hub.subscribe());
        let weak = Arc::downgrade(self);
        let root = self.root.clone();
        let watched = id.clone();
        let _ = self.tracker.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    if let Some(session) = weak.upgrade() {
                        let _ = session.with_state(|s| s.unsubscribe(&watched));
                    }
                }
                () = root.cancelled() => {}
            }
        });
        (id, rx)
    }

    // ── Terminal ──

    /// Send the run's terminal outcome. Only the first call has any effect.
    pub fn deliver_terminal(&self, outcome: TerminalOutcome) -> bool {
        let Some(tx) = self.with_state(|s| s.terminal.take()) else {
            warn!(plan_id = %self.params.key.plan_id, branch = %self.params.key.branch, "terminal outcome already delivered, ignoring");
            return false;
        };
        if tx.send(outcome).is_err() {
            debug!(plan_id = %self.params.key.plan_id, "supervisor gone, terminal outcome discarded");
        }
        true
    }

    /// Mark the session destroyed. Returns `false` if it already was.
    pub(crate) fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Drop every subscriber after a final flush.
    pub(crate) fn close_subscribers(&self) {
        self.with_state(|s| {
            s.finish_reply();
            s.hub.close();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SessionParams {
        SessionParams {
            key: PlanKey::new("plan", "main"),
            org_id: "org".into(),
            user_id: "user".into(),
            prompt: "do it".into(),
            build_only: false,
            auto_context: false,
        }
    }

    fn session() -> (Arc<Session>, oneshot::Receiver<TerminalOutcome>) {
        Session::new(params(), 8, 0, TaskTracker::new())
    }

    #[tokio::test]
    async fn terminal_delivered_once() {
        let (s, rx) = session();
        assert!(s.deliver_terminal(Err(ApiError::other("first"))));
        assert!(!s.deliver_terminal(Ok(())));
        assert_eq!(rx.await.unwrap(), Err(ApiError::other("first")));
        assert!(s.with_state(|st| st.is_terminal_delivered()));
    }

    #[test]
    fn stream_scope_is_child_of_root() {
        let (s, _rx) = session();
        let stream = s.begin_stream();
        s.cancel_stream();
        assert!(stream.is_cancelled());
        assert!(!s.is_cancelled());

        let next = s.begin_stream();
        assert!(!next.is_cancelled());
        s.cancel();
        assert!(next.is_cancelled());
    }

    #[test]
    fn begin_reply_completes_previous_signal() {
        let (s, _rx) = session();
        let first = s.with_state(|st| st.begin_reply(ReplyId::from("r1")));
        let second = s.with_state(|st| st.begin_reply(ReplyId::from("r2")));
        assert!(*first.borrow());
        assert!(!*second.borrow());
        assert_eq!(s.current_reply_id(), Some(ReplyId::from("r2")));

        s.finish_reply();
        assert!(*second.borrow());
    }

    #[tokio::test]
    async fn subscription_removed_on_cancel() {
        let (s, _rx) = session();
        let cancel = CancellationToken::new();
        let (_id, _stream) = s.subscribe(cancel.clone());
        assert_eq!(s.subscriber_count(), 1);

        cancel.cancel();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(s.subscriber_count(), 0);
    }

    #[test]
    fn destroyed_only_once() {
        let (s, _rx) = session();
        assert!(s.mark_destroyed());
        assert!(!s.mark_destroyed());
    }

    #[tokio::test]
    async fn close_subscribers_flushes_and_ends() {
        let (s, _rx) = Session::new(params(), 8, 1024, TaskTracker::new());
        let (_id, mut rx) = s.subscribe(CancellationToken::new());
        s.publish(StreamMessage::Reply { chunk: "x".into() });
        s.close_subscribers();
        assert_eq!(rx.recv().await.unwrap(), StreamMessage::Reply { chunk: "x".into() });
        assert!(rx.recv().await.is_none());
    }
}
