use serde::Serialize;

use crate::models::{SessionId, SessionSnapshot, SessionState};

/// Broadcast on every session transition. Carries the full snapshot so a UI
/// can render from the event alone.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub state: SessionState,
    pub snapshot: SessionSnapshot,
}

impl From<SessionSnapshot> for SessionEvent {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id.clone(),
            state: snapshot.state,
            snapshot,
        }
    }
}
