//! Registry of active sessions keyed by `(plan, branch)`.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::gauge;
use parking_lot::Mutex;
use planrun_core::PlanKey;
use planrun_core::metrics::ACTIVE_PLANS;
use planrun_settings::RuntimeSettings;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::session::{Session, SessionParams, SessionState};
use super::supervisor;
use crate::collaborators::{RepoExecutor, RepoOp, RepoOwner, StatusStore};
use crate::errors::{CollaboratorError, RuntimeError};

struct RegistryInner {
    sessions: DashMap<PlanKey, Arc<Session>>,
    status: Arc<dyn StatusStore>,
    repo: Arc<dyn RepoExecutor>,
    settings: RuntimeSettings,
    tracker: TaskTracker,
    // Serializes the capacity check with the insert it guards.
    admission: Mutex<()>,
}

/// Concurrent map of active sessions.
///
/// Operations on one key never block operations on another. Every session is
/// paired with a supervisor task started on creation; supervisors, listeners,
/// and build triggers are tracked so [`shutdown`](Self::shutdown) can await
/// them all.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create an empty registry. Invalid settings are corrected first.
    pub fn new(
        status: Arc<dyn StatusStore>,
        repo: Arc<dyn RepoExecutor>,
        mut settings: RuntimeSettings,
    ) -> Self {
        settings.validate();
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                status,
                repo,
                settings,
                tracker: TaskTracker::new(),
                admission: Mutex::new(()),
            }),
        }
    }

    /// Session registered under `key`.
    pub fn get(&self, key: &PlanKey) -> Option<Arc<Session>> {
        self.inner.sessions.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Register a new session under `params.key` and start its supervisor.
    ///
    /// A session already registered under the key is displaced: its root scope
    /// is cancelled and its supervisor finishes it as stopped.
    #[instrument(skip_all, fields(plan_id = %params.key.plan_id, branch = %params.key.branch))]
    pub fn create(&self, params: SessionParams) -> Arc<Session> {
        let key = params.key.clone();
        let session = self.spawn_session(params);
        if let Some(old) = self.inner.sessions.insert(key, Arc::clone(&session)) {
            warn!("replacing active plan, cancelling previous session");
            old.cancel();
        }
        self.record_gauge();
        info!("active plan created");
        session
    }

    /// Fetch the session under `params.key`, creating it if absent.
    ///
    /// Returns the session and whether it was created. Two racing calls for
    /// the same key observe the same session. With `max_active_sessions` set,
    /// racing calls for new keys never push the count past the limit;
    /// [`create`](Self::create) does not consult it.
    pub fn get_or_create(&self, params: SessionParams) -> Result<(Arc<Session>, bool), RuntimeError> {
        if let Some(existing) = self.get(&params.key) {
            return Ok((existing, false));
        }
        let max = self.inner.settings.max_active_sessions;
        let admission = (max > 0).then(|| self.inner.admission.lock());
        if admission.is_some() {
            let current = self.inner.sessions.len();
            if current >= max && !self.inner.sessions.contains_key(&params.key) {
                warn!(current, max, "active plan limit reached");
                return Err(RuntimeError::ServerBusy { current, max });
            }
        }
        let (session, created) = match self.inner.sessions.entry(params.key.clone()) {
            Entry::Occupied(e) => (Arc::clone(e.get()), false),
            Entry::Vacant(v) => {
                let session = self.spawn_session(params);
                let _ = v.insert(Arc::clone(&session));
                (session, true)
            }
        };
        drop(admission);
        if created {
            self.record_gauge();
            info!(plan_id = %session.key().plan_id, branch = %session.key().branch, "active plan created");
        }
        Ok((session, created))
    }

    /// Run `f` against the state of the session under `key`.
    ///
    /// Returns `None` when no session is registered. The entry's lock is held
    /// only while `f` runs.
    pub fn update<R>(&self, key: &PlanKey, f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        let session = self.get(key)?;
        Some(session.with_state(f))
    }

    /// Delete the session under `key`. Idempotent.
    ///
    /// Uncommitted repository changes are cleared first; cleanup failures are
    /// logged and never prevent removal.
    pub async fn delete(&self, key: &PlanKey) {
        match self.get(key) {
            Some(session) => self.delete_session(&session).await,
            None => debug!(plan_id = %key.plan_id, branch = %key.branch, "no active plan to delete"),
        }
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Runtime settings shared by every session.
    pub fn settings(&self) -> &RuntimeSettings {
        &self.inner.settings
    }

    /// Cancel every session and wait for all tracked tasks to finish.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!(active = self.len(), "session registry shutdown");
        for entry in &self.inner.sessions {
            entry.value().cancel();
        }
        let _ = self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("session registry shutdown complete");
    }

    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.inner.tracker
    }

    pub(crate) fn status_store(&self) -> &Arc<dyn StatusStore> {
        &self.inner.status
    }

    /// Destroy `session` exactly once and deregister it if it is still the
    /// session under its key.
    #[instrument(skip_all, fields(plan_id = %session.key().plan_id, branch = %session.key().branch))]
    pub(crate) async fn delete_session(&self, session: &Arc<Session>) {
        if !session.mark_destroyed() {
            debug!("active plan already deleted");
            return;
        }
        self.clear_uncommitted(session).await;
        session.close_subscribers();
        let removed = self
            .inner
            .sessions
            .remove_if(session.key(), |_, current| Arc::ptr_eq(current, session))
            .is_some();
        self.record_gauge();
        if removed {
            info!("active plan deleted");
        } else {
            debug!("session was already replaced, registry entry kept");
        }
    }

    fn spawn_session(&self, params: SessionParams) -> Arc<Session> {
        let settings = &self.inner.settings;
        let (session, done_rx) = Session::new(
            params,
            settings.subscriber_buffer,
            settings.buffer_flush_bytes,
            self.inner.tracker.clone(),
        );
        supervisor::spawn(self.clone(), Arc::clone(&session), done_rx);
        session
    }

    async fn clear_uncommitted(&self, session: &Session) {
        let deadline = self.inner.settings.cleanup_timeout();
        let owner = RepoOwner::from(session.params());
        let branch = session.key().branch.clone();
        let op: RepoOp = Box::new(move |repo| repo.clear_uncommitted_changes(&branch));
        let result = tokio::time::timeout(
            deadline,
            self.inner
                .repo
                .exec_scoped(&owner, "clear uncommitted changes", deadline, op),
        )
        .await
        .unwrap_or(Err(CollaboratorError::Timeout(deadline)));
        if let Err(e) = result {
            warn!(error = %e, "failed to clear uncommitted changes");
        }
    }

    fn record_gauge(&self) {
        gauge!(ACTIVE_PLANS).set(self.inner.sessions.len() as f64);
    }
}
