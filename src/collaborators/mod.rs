//! Boundaries the orchestrator drives: worker directory, camera streams and
//! the inference service. Injected as `Arc<dyn ...>` so tests can swap in fakes.

mod http;

use async_trait::async_trait;

use crate::error::{DirectoryError, StreamError, VerificationError};
use crate::models::{CameraId, CompanyId, RawVerdict, StreamHandle, WorkerRef};

pub use http::{HttpComplianceVerifier, HttpStreamController, HttpWorkerDirectory};

#[async_trait]
pub trait WorkerDirectory: Send + Sync {
    /// One lookup, no retries. Must tell "no such worker" apart from
    /// "worker exists but has no camera".
    async fn resolve(&self, code: &str, company_id: CompanyId)
        -> Result<WorkerRef, DirectoryError>;
}

#[async_trait]
pub trait StreamController: Send + Sync {
    /// Asks the camera to start streaming. Returning a handle does not mean
    /// frames are flowing yet.
    async fn start(&self, camera_id: CameraId) -> Result<StreamHandle, StreamError>;

    /// Best-effort. Callers log the error and move on.
    async fn stop(&self, camera_id: CameraId) -> Result<(), StreamError>;
}

#[async_trait]
pub trait ComplianceVerifier: Send + Sync {
    /// Single call to the inference boundary. No internal retries.
    async fn verify(
        &self,
        camera_id: CameraId,
        worker_code: &str,
        worker: &WorkerRef,
    ) -> Result<RawVerdict, VerificationError>;
}
