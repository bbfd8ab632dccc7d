pub mod capture;

pub use capture::{CaptureTimer, TimerPhase};
