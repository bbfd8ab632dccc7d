use crate::models::SessionId;

use super::SessionOrchestrator;

/// Tears its session down when dropped, including during unwinding.
pub struct SessionGuard {
    orchestrator: SessionOrchestrator,
    session_id: SessionId,
}

impl SessionGuard {
    pub(crate) fn new(orchestrator: SessionOrchestrator, session_id: SessionId) -> Self {
        Self {
            orchestrator,
            session_id,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.orchestrator.teardown(&self.session_id);
    }
}
