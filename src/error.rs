//! Error taxonomy for detection sessions.
//!
//! Everything the orchestrator returns is a [`DetectionError`]. Collaborator
//! failures are narrowed into [`StreamError`] / [`VerificationError`] before
//! they reach a session so the state machine only ever sees typed causes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CameraId, CompanyId, SessionId, SessionState, WorkerId};

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DetectionError {
    /// Missing or blank worker code / company id. Raised before any side effect.
    #[error("invalid input: {message}")]
    Input { message: String },

    #[error("not found: {reason}")]
    NotFound { reason: NotFoundReason },

    /// The camera is already held by another active session.
    #[error("camera {camera_id} already has active session {active_session}")]
    Conflict {
        camera_id: CameraId,
        active_session: SessionId,
    },

    #[error("stream error: {source}")]
    Stream { source: StreamError },

    #[error("verification error: {source}")]
    Verification { source: VerificationError },

    /// Internal marker for work that finished after its session was cancelled.
    #[error("session cancelled")]
    Cancelled,

    #[error("unknown session {session_id}")]
    UnknownSession { session_id: SessionId },

    #[error("session {session_id} cannot do that while {state:?}")]
    InvalidState {
        session_id: SessionId,
        state: SessionState,
    },
}

impl DetectionError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<NotFoundReason> for DetectionError {
    fn from(reason: NotFoundReason) -> Self {
        Self::NotFound { reason }
    }
}

impl From<StreamError> for DetectionError {
    fn from(source: StreamError) -> Self {
        Self::Stream { source }
    }
}

impl From<VerificationError> for DetectionError {
    fn from(source: VerificationError) -> Self {
        Self::Verification { source }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NotFoundReason {
    #[error("worker '{code}' not found in company {company_id}")]
    WorkerNotFound { code: String, company_id: CompanyId },

    #[error("worker {worker_id} has no camera assigned")]
    NoCameraAssigned { worker_id: WorkerId },

    /// The directory could not answer (unreachable, timed out, bad payload).
    #[error("worker lookup failed: {message}")]
    LookupFailed { message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StreamError {
    #[error("stream start timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("camera unreachable: {message}")]
    Transport { message: String },

    #[error("camera refused stream: {message}")]
    Rejected { message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum VerificationError {
    #[error("inference timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("inference service unreachable: {message}")]
    Transport { message: String },

    #[error("inference service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed verdict payload: {message}")]
    Payload { message: String },
}

/// Error type returned by [`crate::collaborators::WorkerDirectory`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("worker not found")]
    WorkerNotFound,

    #[error("worker {0} has no camera assigned")]
    NoCameraAssigned(WorkerId),

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

impl DirectoryError {
    pub(crate) fn into_reason(self, code: &str, company_id: CompanyId) -> NotFoundReason {
        match self {
            DirectoryError::WorkerNotFound => NotFoundReason::WorkerNotFound {
                code: code.to_string(),
                company_id,
            },
            DirectoryError::NoCameraAssigned(worker_id) => {
                NotFoundReason::NoCameraAssigned { worker_id }
            }
            DirectoryError::Unavailable(message) => NotFoundReason::LookupFailed { message },
        }
    }
}
