mod session;
mod verdict;
mod worker;

pub use session::{Session, SessionFailure, SessionId, SessionSnapshot, SessionState};
pub use verdict::{EvidenceRef, PpeItem, RawVerdict, VerificationResult};
pub use worker::{CameraId, CompanyId, StreamHandle, WorkerId, WorkerRef};
