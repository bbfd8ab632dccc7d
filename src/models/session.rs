//! Detection session records.
//!
//! `Session` is the mutable record kept in the orchestrator registry,
//! `SessionSnapshot` is the read-only view handed to callers and events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CameraId, CompanyId, StreamHandle, VerificationResult, WorkerRef};
use crate::error::{StreamError, VerificationError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    ResolvingWorker,
    StreamStarting,
    Streaming,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::ResolvingWorker => "resolvingWorker",
            SessionState::StreamStarting => "streamStarting",
            SessionState::Streaming => "streaming",
            SessionState::Verifying => "verifying",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }

    /// Terminal for the automatic flow. `Completed` and `Failed` still accept a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Forward-only transition graph. `Completed|Failed -> Verifying` is the retry edge.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (ResolvingWorker, StreamStarting)
                | (ResolvingWorker, Cancelled)
                | (StreamStarting, Streaming)
                | (StreamStarting, Failed)
                | (StreamStarting, Cancelled)
                | (Streaming, Verifying)
                | (Streaming, Cancelled)
                | (Verifying, Completed)
                | (Verifying, Failed)
                | (Verifying, Cancelled)
                | (Completed, Verifying)
                | (Failed, Verifying)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended up in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "camelCase")]
pub enum SessionFailure {
    Stream { error: StreamError },
    Verification { error: VerificationError },
}

impl SessionFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionFailure::Verification { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub worker_code: String,
    pub company_id: CompanyId,
    pub camera_id: Option<CameraId>,
    pub worker_ref: Option<WorkerRef>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stream_handle: Option<StreamHandle>,
    pub result: Option<VerificationResult>,
    pub failure: Option<SessionFailure>,
    pub verify_attempts: u32,
}

impl Session {
    pub fn begin(worker_code: String, company_id: CompanyId, started_at: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            worker_code,
            company_id,
            camera_id: None,
            worker_ref: None,
            state: SessionState::ResolvingWorker,
            started_at,
            updated_at: started_at,
            stream_handle: None,
            result: None,
            failure: None,
            verify_attempts: 0,
        }
    }

    /// Moves the session along the state graph. Returns `false` (and leaves the
    /// session untouched) when the edge does not exist.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.updated_at = Utc::now();
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            camera_id: self.camera_id,
            state: self.state,
            worker_ref: self.worker_ref.clone(),
            result: self.result.clone(),
            failure: self.failure.clone(),
            stream_url: self.stream_handle.as_ref().map(|h| h.display_url.clone()),
            started_at: self.started_at,
            updated_at: self.updated_at,
            verify_attempts: self.verify_attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub camera_id: Option<CameraId>,
    pub state: SessionState,
    pub worker_ref: Option<WorkerRef>,
    pub result: Option<VerificationResult>,
    pub failure: Option<SessionFailure>,
    pub stream_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub verify_attempts: u32,
}
