pub mod collaborators;
pub mod config;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod session;
pub mod timer;
pub mod utils;

use std::sync::Arc;

use collaborators::{HttpComplianceVerifier, HttpStreamController, HttpWorkerDirectory};
use config::GateConfig;
use normalizer::EvidenceResolver;

pub use config::{OrchestratorTimings, CAPTURE_DELAY};
pub use error::{DetectionError, NotFoundReason, StreamError, VerificationError};
pub use models::{
    PpeItem, RawVerdict, SessionId, SessionSnapshot, SessionState, VerificationResult, WorkerRef,
};
pub use session::{SessionEvent, SessionGuard, SessionHandle, SessionOrchestrator};

/// Everything a front end needs, wired against the HTTP services in `config`.
pub struct Gate {
    pub orchestrator: SessionOrchestrator,
    pub evidence: EvidenceResolver,
}

impl Gate {
    pub fn from_config(config: &GateConfig) -> Self {
        let endpoints = &config.endpoints;
        let orchestrator = SessionOrchestrator::new(
            Arc::new(HttpWorkerDirectory::new(endpoints.directory_url.clone())),
            Arc::new(HttpStreamController::new(endpoints.stream_url.clone())),
            Arc::new(HttpComplianceVerifier::new(endpoints.inference_url.clone())),
            config.timings(),
        );

        log::info!(
            "gate ready: directory={} streams={} inference={} capture_delay={}ms",
            endpoints.directory_url,
            endpoints.stream_url,
            endpoints.inference_url,
            config.capture_delay_ms
        );

        Self {
            orchestrator,
            evidence: EvidenceResolver::new(endpoints.evidence_base_url.clone()),
        }
    }
}
