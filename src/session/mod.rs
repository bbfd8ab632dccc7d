pub mod events;
pub mod guard;
pub mod orchestrator;

pub use events::SessionEvent;
pub use guard::SessionGuard;
pub use orchestrator::{SessionHandle, SessionOrchestrator};
