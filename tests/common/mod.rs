#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::{self, Instant};

use ppe_gate_lib::{
    collaborators::{ComplianceVerifier, StreamController, WorkerDirectory},
    error::DirectoryError,
    models::{CameraId, CompanyId, RawVerdict, StreamHandle},
    OrchestratorTimings, SessionId, SessionOrchestrator, SessionState, StreamError,
    VerificationError, WorkerRef,
};

pub fn worker(worker_id: i64, name: &str, camera_id: CameraId) -> WorkerRef {
    WorkerRef {
        worker_id,
        full_name: name.to_string(),
        camera_id,
    }
}

pub fn verdict(pairs: &[(&str, bool)], evidence: Option<&str>) -> RawVerdict {
    RawVerdict {
        detections: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        compliant: None,
        evidence_ref: evidence.map(str::to_string),
    }
}

pub fn all_present() -> RawVerdict {
    verdict(
        &[("helmet", true), ("vest", true), ("boots", true), ("glasses", true)],
        None,
    )
}

#[derive(Default)]
pub struct FakeDirectory {
    workers: Mutex<HashMap<(String, CompanyId), Result<WorkerRef, DirectoryError>>>,
    delay: Mutex<Duration>,
    pub calls: Mutex<Vec<(String, CompanyId)>>,
}

impl FakeDirectory {
    pub fn with_worker(self, code: &str, company_id: CompanyId, worker: WorkerRef) -> Self {
        self.workers
            .lock()
            .unwrap()
            .insert((code.to_string(), company_id), Ok(worker));
        self
    }

    pub fn with_error(self, code: &str, company_id: CompanyId, error: DirectoryError) -> Self {
        self.workers
            .lock()
            .unwrap()
            .insert((code.to_string(), company_id), Err(error));
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkerDirectory for FakeDirectory {
    async fn resolve(&self, code: &str, company_id: CompanyId) -> Result<WorkerRef, DirectoryError> {
        self.calls.lock().unwrap().push((code.to_string(), company_id));
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
        self.workers
            .lock()
            .unwrap()
            .get(&(code.to_string(), company_id))
            .cloned()
            .unwrap_or(Err(DirectoryError::WorkerNotFound))
    }
}

#[derive(Default)]
pub struct FakeStreams {
    pub starts: Mutex<Vec<(CameraId, Instant)>>,
    pub stops: Mutex<Vec<CameraId>>,
    start_error: Mutex<Option<StreamError>>,
    start_delay: Mutex<Duration>,
    fail_stop: Mutex<bool>,
    unacknowledged: Mutex<bool>,
}

impl FakeStreams {
    pub fn failing_start(self, error: StreamError) -> Self {
        *self.start_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_start_delay(self, delay: Duration) -> Self {
        *self.start_delay.lock().unwrap() = delay;
        self
    }

    pub fn failing_stop(self) -> Self {
        *self.fail_stop.lock().unwrap() = true;
        self
    }

    pub fn unacknowledged(self) -> Self {
        *self.unacknowledged.lock().unwrap() = true;
        self
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    pub fn stops(&self) -> Vec<CameraId> {
        self.stops.lock().unwrap().clone()
    }

    pub fn first_start_at(&self) -> Option<Instant> {
        self.starts.lock().unwrap().first().map(|(_, at)| *at)
    }
}

#[async_trait]
impl StreamController for FakeStreams {
    async fn start(&self, camera_id: CameraId) -> Result<StreamHandle, StreamError> {
        self.starts.lock().unwrap().push((camera_id, Instant::now()));
        let delay = *self.start_delay.lock().unwrap();
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
        if let Some(error) = self.start_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(StreamHandle {
            camera_id,
            display_url: format!("http://cams.test/cameras/{camera_id}/stream"),
            acknowledged: !*self.unacknowledged.lock().unwrap(),
        })
    }

    async fn stop(&self, camera_id: CameraId) -> Result<(), StreamError> {
        self.stops.lock().unwrap().push(camera_id);
        if *self.fail_stop.lock().unwrap() {
            return Err(StreamError::Transport {
                message: "camera gone".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct VerifyCall {
    pub camera_id: CameraId,
    pub worker_code: String,
    pub worker: WorkerRef,
    pub at: Instant,
}

pub struct FakeVerifier {
    pub calls: Mutex<Vec<VerifyCall>>,
    scripted: Mutex<VecDeque<Result<RawVerdict, VerificationError>>>,
    fallback: Mutex<Result<RawVerdict, VerificationError>>,
    delay: Mutex<Duration>,
}

impl Default for FakeVerifier {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(all_present())),
            delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl FakeVerifier {
    pub fn returning(self, response: Result<RawVerdict, VerificationError>) -> Self {
        *self.fallback.lock().unwrap() = response;
        self
    }

    /// Responses served in order before falling back to `returning`.
    pub fn then(self, response: Result<RawVerdict, VerificationError>) -> Self {
        self.scripted.lock().unwrap().push_back(response);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<VerifyCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComplianceVerifier for FakeVerifier {
    async fn verify(
        &self,
        camera_id: CameraId,
        worker_code: &str,
        worker: &WorkerRef,
    ) -> Result<RawVerdict, VerificationError> {
        self.calls.lock().unwrap().push(VerifyCall {
            camera_id,
            worker_code: worker_code.to_string(),
            worker: worker.clone(),
            at: Instant::now(),
        });
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
        let next = self.scripted.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub orchestrator: SessionOrchestrator,
    pub directory: Arc<FakeDirectory>,
    pub streams: Arc<FakeStreams>,
    pub verifier: Arc<FakeVerifier>,
}

impl Harness {
    pub fn new(directory: FakeDirectory, streams: FakeStreams, verifier: FakeVerifier) -> Self {
        let directory = Arc::new(directory);
        let streams = Arc::new(streams);
        let verifier = Arc::new(verifier);
        let orchestrator = SessionOrchestrator::new(
            directory.clone(),
            streams.clone(),
            verifier.clone(),
            OrchestratorTimings::default(),
        );
        Self {
            orchestrator,
            directory,
            streams,
            verifier,
        }
    }

    /// Directory with TRA-001 @ company 42 on camera 7, default fakes elsewhere.
    pub fn standard() -> Self {
        Self::new(
            FakeDirectory::default().with_worker("TRA-001", 42, worker(1, "Ana Ruiz", 7)),
            FakeStreams::default(),
            FakeVerifier::default(),
        )
    }

    pub fn state(&self, session_id: &SessionId) -> SessionState {
        self.orchestrator
            .current_state(session_id)
            .expect("session should be known")
            .state
    }
}

/// Lets spawned tasks (stream stops, retries) run without moving the clock much.
pub async fn settle() {
    time::sleep(Duration::from_millis(1)).await;
}
