use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use chrono::Utc;
use serde::Serialize;
use tokio::{runtime::Handle, sync::broadcast, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::{
    collaborators::{ComplianceVerifier, StreamController, WorkerDirectory},
    config::OrchestratorTimings,
    error::{DetectionError, NotFoundReason, StreamError, VerificationError},
    models::{
        CameraId, CompanyId, Session, SessionFailure, SessionId, SessionSnapshot, SessionState,
        WorkerRef,
    },
    normalizer::normalize,
    timer::CaptureTimer,
};

use super::{SessionEvent, SessionGuard};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Returned by [`SessionOrchestrator::start`] once the session has an id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub camera_id: Option<CameraId>,
    pub state: SessionState,
    pub stream_url: Option<String>,
}

impl From<&Session> for SessionHandle {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            camera_id: session.camera_id,
            state: session.state,
            stream_url: session.stream_handle.as_ref().map(|h| h.display_url.clone()),
        }
    }
}

struct SessionEntry {
    session: Session,
    cancel_token: CancellationToken,
    timer: Option<CaptureTimer>,
    stream_released: bool,
    torn_down: bool,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, SessionEntry>,
    active_by_camera: HashMap<CameraId, SessionId>,
}

impl Registry {
    fn release_camera(&mut self, camera_id: CameraId, session_id: &SessionId) {
        if self.active_by_camera.get(&camera_id) == Some(session_id) {
            self.active_by_camera.remove(&camera_id);
        }
    }

    /// A new claim on `camera_id` takes over its stream; finished sessions
    /// that used it can no longer stop it or verify on it.
    fn supersede(&mut self, camera_id: CameraId, claimant: &SessionId) {
        for (id, entry) in self.sessions.iter_mut() {
            if id != claimant
                && entry.session.camera_id == Some(camera_id)
                && !entry.session.state.is_active()
            {
                entry.stream_released = true;
            }
        }
    }
}

/// Outcome of one bounded, cancellable await.
enum Step<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

async fn bounded<F: Future>(token: &CancellationToken, limit: Duration, fut: F) -> Step<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Step::Cancelled,
        outcome = time::timeout(limit, fut) => match outcome {
            Ok(value) => Step::Done(value),
            Err(_) => Step::TimedOut,
        },
    }
}

struct VerifyJob {
    session_id: SessionId,
    camera_id: CameraId,
    worker_code: String,
    worker: WorkerRef,
    attempt: u32,
    cancel_token: CancellationToken,
}

struct Inner {
    directory: Arc<dyn WorkerDirectory>,
    streams: Arc<dyn StreamController>,
    verifier: Arc<dyn ComplianceVerifier>,
    timings: OrchestratorTimings,
    registry: Mutex<Registry>,
    events: broadcast::Sender<SessionEvent>,
    runtime: Option<Handle>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Sequences resolve -> stream start -> settle delay -> verify for each
/// session, with at most one active session per camera.
///
/// The registry lock is a plain mutex that is never held across an await,
/// which lets `cancel` and `teardown` run synchronously (and from `Drop`).
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    pub fn new(
        directory: Arc<dyn WorkerDirectory>,
        streams: Arc<dyn StreamController>,
        verifier: Arc<dyn ComplianceVerifier>,
        timings: OrchestratorTimings,
    ) -> Self {
        let (events, _) = broadcast::channel(timings.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                directory,
                streams,
                verifier,
                timings,
                registry: Mutex::new(Registry::default()),
                events,
                runtime: Handle::try_current().ok(),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn timings(&self) -> OrchestratorTimings {
        self.inner.timings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Starts a detection session for the worker identified by `worker_code`
    /// within `company_id`.
    ///
    /// Input, not-found and conflict errors are returned before any stream is
    /// touched. Once the stream step is reached the session exists and its
    /// outcome (including a stream failure) is visible through
    /// [`current_state`](Self::current_state).
    pub async fn start(
        &self,
        worker_code: &str,
        company_id: Option<CompanyId>,
    ) -> Result<SessionHandle, DetectionError> {
        let code = worker_code.trim();
        if code.is_empty() {
            return Err(DetectionError::input("worker code is required"));
        }
        let company_id =
            company_id.ok_or_else(|| DetectionError::input("company id is required"))?;

        let session = Session::begin(code.to_string(), company_id, Utc::now());
        let session_id = session.id.clone();
        let cancel_token = CancellationToken::new();
        self.registry().sessions.insert(
            session_id.clone(),
            SessionEntry {
                session,
                cancel_token: cancel_token.clone(),
                timer: None,
                stream_released: false,
                torn_down: false,
            },
        );
        log_debug!("session {session_id}: resolving worker {code} (company {company_id})");

        let resolved = bounded(
            &cancel_token,
            self.inner.timings.resolve_timeout,
            self.inner.directory.resolve(code, company_id),
        )
        .await;

        let worker = match resolved {
            Step::Done(Ok(worker)) => worker,
            Step::Done(Err(err)) => {
                let reason = err.into_reason(code, company_id);
                return self.abandon(&session_id, reason.into());
            }
            Step::TimedOut => {
                let reason = NotFoundReason::LookupFailed {
                    message: format!(
                        "worker lookup timed out after {}ms",
                        self.inner.timings.resolve_timeout.as_millis()
                    ),
                };
                return self.abandon(&session_id, reason.into());
            }
            Step::Cancelled => return self.handle_for(&session_id),
        };

        let camera_id = worker.camera_id;
        {
            let mut registry = self.registry();
            let claimed_by = registry.active_by_camera.get(&camera_id).cloned();
            let Some(entry) = registry.sessions.get_mut(&session_id) else {
                return Err(DetectionError::UnknownSession { session_id });
            };
            if entry.session.state != SessionState::ResolvingWorker {
                log_debug!("session {session_id}: discarding worker lookup after cancel");
                return Ok(SessionHandle::from(&entry.session));
            }
            if let Some(active_session) = claimed_by {
                registry.sessions.remove(&session_id);
                log_info!(
                    "camera {camera_id} busy with session {active_session}; rejecting new session"
                );
                return Err(DetectionError::Conflict {
                    camera_id,
                    active_session,
                });
            }

            registry
                .active_by_camera
                .insert(camera_id, session_id.clone());
            registry.supersede(camera_id, &session_id);
            let Some(entry) = registry.sessions.get_mut(&session_id) else {
                return Err(DetectionError::UnknownSession { session_id });
            };
            entry.session.camera_id = Some(camera_id);
            entry.session.worker_ref = Some(worker);
            entry.session.advance(SessionState::StreamStarting);
            self.emit(&entry.session);
        }
        log_info!("session {session_id}: starting stream on camera {camera_id}");

        let started = bounded(
            &cancel_token,
            self.inner.timings.stream_start_timeout,
            self.inner.streams.start(camera_id),
        )
        .await;

        let stream_result = match started {
            Step::Done(result) => result,
            Step::TimedOut => Err(StreamError::Timeout {
                after_ms: self.inner.timings.stream_start_timeout.as_millis() as u64,
            }),
            Step::Cancelled => return self.handle_for(&session_id),
        };

        let mut stop_camera = None;
        let handle = {
            let mut registry = self.registry();
            let Some(entry) = registry.sessions.get_mut(&session_id) else {
                return Err(DetectionError::UnknownSession { session_id });
            };
            if entry.session.state != SessionState::StreamStarting {
                log_debug!("session {session_id}: discarding stream start after cancel");
                return Ok(SessionHandle::from(&entry.session));
            }

            match stream_result {
                Ok(stream) => {
                    if !stream.acknowledged {
                        log_warn!(
                            "session {session_id}: camera {camera_id} did not acknowledge start, relying on settle delay"
                        );
                    }
                    entry.session.stream_handle = Some(stream);
                    entry.session.advance(SessionState::Streaming);
                    entry.timer = Some(self.arm_capture_timer(&session_id));
                    self.emit(&entry.session);
                    log_info!(
                        "session {session_id}: streaming, verifying in {}ms",
                        self.inner.timings.capture_delay.as_millis()
                    );
                    SessionHandle::from(&entry.session)
                }
                Err(error) => {
                    log_warn!("session {session_id}: stream start failed: {error}");
                    entry.session.failure = Some(SessionFailure::Stream { error });
                    entry.session.advance(SessionState::Failed);
                    // A half-started device gets a best-effort stop.
                    entry.stream_released = true;
                    stop_camera = Some(camera_id);
                    self.emit(&entry.session);
                    let handle = SessionHandle::from(&entry.session);
                    registry.release_camera(camera_id, &session_id);
                    handle
                }
            }
        };

        if let Some(camera_id) = stop_camera {
            self.spawn_stop(camera_id);
        }
        Ok(handle)
    }

    /// Cancels a session that has not reached a terminal state. Cancelling a
    /// terminal session is a no-op.
    pub fn cancel(&self, session_id: &SessionId) -> Result<(), DetectionError> {
        let stop_camera = {
            let mut registry = self.registry();
            let Some(entry) = registry.sessions.get_mut(session_id) else {
                return Err(DetectionError::UnknownSession {
                    session_id: session_id.clone(),
                });
            };
            if entry.session.state.is_terminal() {
                return Ok(());
            }
            Self::cancel_entry(entry);
            self.emit(&entry.session);
            log_info!("session {session_id}: cancelled");

            let camera_id = entry.session.camera_id;
            let stop = Self::take_stream_stop(entry);
            if let Some(camera_id) = camera_id {
                registry.release_camera(camera_id, session_id);
            }
            stop
        };

        if let Some(camera_id) = stop_camera {
            self.spawn_stop(camera_id);
        }
        Ok(())
    }

    /// Releases everything a session holds, whatever its state. Never fails.
    ///
    /// Active sessions are cancelled. For terminal sessions the stream is
    /// stopped unless another session has claimed the camera since.
    pub fn teardown(&self, session_id: &SessionId) {
        let stop_camera = {
            let mut registry = self.registry();
            let Some(entry) = registry.sessions.get_mut(session_id) else {
                log_debug!("teardown of unknown session {session_id} ignored");
                return;
            };
            let camera_id = entry.session.camera_id;
            entry.torn_down = true;
            if entry.session.state.is_active() {
                Self::cancel_entry(entry);
                self.emit(&entry.session);
                log_info!("session {session_id}: torn down while active");
            } else {
                entry.cancel_token.cancel();
                if let Some(timer) = entry.timer.take() {
                    timer.cancel();
                }
            }

            let stop = Self::take_stream_stop(entry);
            if let Some(camera_id) = camera_id {
                registry.release_camera(camera_id, session_id);
            }
            stop
        };

        if let Some(camera_id) = stop_camera {
            self.spawn_stop(camera_id);
        }
    }

    /// Re-runs verification on the live stream. Only valid from `Completed`
    /// or a verification `Failed` while the session still owns its stream;
    /// never re-resolves the worker or restarts the stream.
    pub fn retry(&self, session_id: &SessionId) -> Result<(), DetectionError> {
        let job = self.begin_verification(session_id, true)?;
        log_info!("session {session_id}: manual retry #{}", job.attempt);
        let this = self.clone();
        self.spawn(async move {
            this.run_verification(job).await;
        });
        Ok(())
    }

    /// Tears down every known session.
    pub fn shutdown(&self) {
        let ids: Vec<SessionId> = self.registry().sessions.keys().cloned().collect();
        log_info!("shutting down {} session(s)", ids.len());
        for id in ids {
            self.teardown(&id);
        }
    }

    /// Waits for background work (stream stops, manual retries) to finish.
    /// Call after `shutdown` before the runtime goes away.
    pub async fn drain(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = {
                let mut background = match self.inner.background.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                background.drain(..).collect()
            };
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(err) = task.await {
                    log_warn!("background task failed: {err}");
                }
            }
        }
    }

    /// Scoped teardown: the session is released when the guard drops.
    pub fn guard(&self, session_id: &SessionId) -> SessionGuard {
        SessionGuard::new(self.clone(), session_id.clone())
    }

    pub fn current_state(&self, session_id: &SessionId) -> Result<SessionSnapshot, DetectionError> {
        self.registry()
            .sessions
            .get(session_id)
            .map(|entry| entry.session.snapshot())
            .ok_or_else(|| DetectionError::UnknownSession {
                session_id: session_id.clone(),
            })
    }

    pub fn active_session_for_camera(&self, camera_id: CameraId) -> Option<SessionId> {
        self.registry().active_by_camera.get(&camera_id).cloned()
    }

    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SessionSnapshot> = self
            .registry()
            .sessions
            .values()
            .map(|entry| entry.session.snapshot())
            .collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    /// Drops a finished session record, releasing its stream first if it
    /// still holds one. Returns `false` (and keeps the record) while the
    /// session is active.
    pub fn forget(&self, session_id: &SessionId) -> bool {
        let stop_camera = {
            let mut registry = self.registry();
            let Some(entry) = registry.sessions.get_mut(session_id) else {
                return false;
            };
            if entry.session.state.is_active() {
                return false;
            }
            entry.cancel_token.cancel();
            if let Some(timer) = entry.timer.take() {
                timer.cancel();
            }
            let camera_id = entry.session.camera_id;
            let stop = Self::take_stream_stop(entry);
            if let Some(camera_id) = camera_id {
                registry.release_camera(camera_id, session_id);
            }
            registry.sessions.remove(session_id);
            stop
        };

        log_debug!("session {session_id}: forgotten");
        if let Some(camera_id) = stop_camera {
            self.spawn_stop(camera_id);
        }
        true
    }

    async fn on_capture_timer_fired(&self, session_id: SessionId) {
        match self.begin_verification(&session_id, false) {
            Ok(job) => self.run_verification(job).await,
            Err(err) if err.is_cancelled() => {
                log_debug!("session {session_id}: capture timer fired after cancel, ignoring");
            }
            Err(err) => log_warn!("session {session_id}: capture timer fired but {err}"),
        }
    }

    fn arm_capture_timer(&self, session_id: &SessionId) -> CaptureTimer {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let session_id = session_id.clone();
        CaptureTimer::arm(self.inner.timings.capture_delay, move || async move {
            if let Some(inner) = weak.upgrade() {
                SessionOrchestrator { inner }
                    .on_capture_timer_fired(session_id)
                    .await;
            }
        })
    }

    fn begin_verification(
        &self,
        session_id: &SessionId,
        manual: bool,
    ) -> Result<VerifyJob, DetectionError> {
        let mut registry = self.registry();
        let claimed_by = {
            let Some(entry) = registry.sessions.get(session_id) else {
                return Err(DetectionError::UnknownSession {
                    session_id: session_id.clone(),
                });
            };
            entry
                .session
                .camera_id
                .and_then(|camera| registry.active_by_camera.get(&camera).cloned())
        };
        let Some(entry) = registry.sessions.get_mut(session_id) else {
            return Err(DetectionError::UnknownSession {
                session_id: session_id.clone(),
            });
        };

        let state = entry.session.state;
        let invalid = || DetectionError::InvalidState {
            session_id: session_id.clone(),
            state,
        };
        if manual {
            let eligible = match state {
                SessionState::Completed => true,
                SessionState::Failed => entry
                    .session
                    .failure
                    .as_ref()
                    .is_some_and(SessionFailure::is_retryable),
                _ => false,
            };
            // A torn-down or superseded session has no stream left to verify on.
            if !eligible || entry.torn_down || entry.stream_released {
                return Err(invalid());
            }
        } else if state != SessionState::Streaming {
            return Err(DetectionError::Cancelled);
        }

        let (Some(camera_id), Some(worker)) =
            (entry.session.camera_id, entry.session.worker_ref.clone())
        else {
            return Err(invalid());
        };
        if let Some(active_session) = claimed_by.filter(|owner| owner != session_id) {
            return Err(DetectionError::Conflict {
                camera_id,
                active_session,
            });
        }

        entry.session.advance(SessionState::Verifying);
        entry.session.failure = None;
        entry.session.verify_attempts += 1;
        self.emit(&entry.session);

        let job = VerifyJob {
            session_id: session_id.clone(),
            camera_id,
            worker_code: entry.session.worker_code.clone(),
            worker,
            attempt: entry.session.verify_attempts,
            cancel_token: entry.cancel_token.clone(),
        };
        registry
            .active_by_camera
            .insert(camera_id, session_id.clone());
        Ok(job)
    }

    async fn run_verification(&self, job: VerifyJob) {
        log_info!(
            "session {}: verifying worker {} on camera {} (attempt {})",
            job.session_id,
            job.worker_code,
            job.camera_id,
            job.attempt
        );

        let outcome = bounded(
            &job.cancel_token,
            self.inner.timings.verify_timeout,
            self.inner
                .verifier
                .verify(job.camera_id, &job.worker_code, &job.worker),
        )
        .await;

        let verdict = match outcome {
            Step::Done(result) => result.and_then(normalize),
            Step::TimedOut => Err(VerificationError::Timeout {
                after_ms: self.inner.timings.verify_timeout.as_millis() as u64,
            }),
            Step::Cancelled => {
                log_debug!("session {}: verification abandoned after cancel", job.session_id);
                return;
            }
        };

        let mut registry = self.registry();
        let Some(entry) = registry.sessions.get_mut(&job.session_id) else {
            return;
        };
        if entry.session.state != SessionState::Verifying
            || entry.session.verify_attempts != job.attempt
        {
            log_debug!(
                "session {}: discarding stale verdict for attempt {}",
                job.session_id,
                job.attempt
            );
            return;
        }

        match verdict {
            Ok(result) => {
                log_info!(
                    "session {}: compliant={} missing={:?}",
                    job.session_id,
                    result.compliant,
                    result.missing_items
                );
                entry.session.result = Some(result);
                entry.session.advance(SessionState::Completed);
            }
            Err(error) => {
                log_warn!("session {}: verification failed: {error}", job.session_id);
                entry.session.result = None;
                entry.session.failure = Some(SessionFailure::Verification { error });
                entry.session.advance(SessionState::Failed);
            }
        }
        self.emit(&entry.session);
        registry.release_camera(job.camera_id, &job.session_id);
    }

    /// Cancels timer and in-flight work and moves the session to `Cancelled`.
    fn cancel_entry(entry: &mut SessionEntry) {
        entry.cancel_token.cancel();
        if let Some(timer) = entry.timer.take() {
            timer.cancel();
        }
        entry.session.advance(SessionState::Cancelled);
    }

    /// Marks the stream released and returns the camera to stop, at most once per session.
    fn take_stream_stop(entry: &mut SessionEntry) -> Option<CameraId> {
        if entry.stream_released {
            return None;
        }
        entry.stream_released = true;
        entry.session.camera_id
    }

    /// Drops a session that never got past resolution. A cancel that got
    /// there first wins and the cancelled handle is returned instead.
    fn abandon(
        &self,
        session_id: &SessionId,
        error: DetectionError,
    ) -> Result<SessionHandle, DetectionError> {
        let mut registry = self.registry();
        if let Some(entry) = registry.sessions.get(session_id) {
            if entry.session.state == SessionState::Cancelled {
                return Ok(SessionHandle::from(&entry.session));
            }
        }
        registry.sessions.remove(session_id);
        log_info!("session {session_id}: abandoned, {error}");
        Err(error)
    }

    fn handle_for(&self, session_id: &SessionId) -> Result<SessionHandle, DetectionError> {
        self.registry()
            .sessions
            .get(session_id)
            .map(|entry| SessionHandle::from(&entry.session))
            .ok_or_else(|| DetectionError::UnknownSession {
                session_id: session_id.clone(),
            })
    }

    fn spawn_stop(&self, camera_id: CameraId) {
        let streams = self.inner.streams.clone();
        self.spawn(async move {
            match streams.stop(camera_id).await {
                Ok(()) => log_debug!("camera {camera_id}: stream stop sent"),
                Err(err) => log_warn!("camera {camera_id}: stream stop failed (ignored): {err}"),
            }
        });
    }

    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(runtime) = Handle::try_current().ok().or_else(|| self.inner.runtime.clone())
        else {
            log_warn!("no tokio runtime available; dropping background task");
            return;
        };
        let task = runtime.spawn(fut);

        let mut background = match self.inner.background.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        background.retain(|handle| !handle.is_finished());
        background.push(task);
    }

    fn emit(&self, session: &Session) {
        let _ = self.inner.events.send(SessionEvent::from(session.snapshot()));
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        match self.inner.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
