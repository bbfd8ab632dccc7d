use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

/// Settle delay between stream start and verification.
///
/// Stream readiness is not observable, so a fixed grace period stands in for
/// "frames are flowing".
pub const CAPTURE_DELAY: Duration = Duration::from_secs(3);

const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_STREAM_START_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_VERIFY_TIMEOUT_MS: u64 = 20_000;
const DEFAULT_EVENT_CAPACITY: usize = 64;

pub const CAPTURE_DELAY_ENV: &str = "PPE_GATE_CAPTURE_DELAY_MS";
pub const DEBUG_ENV: &str = "PPE_GATE_DEBUG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    pub directory_url: String,
    pub stream_url: String,
    pub inference_url: String,
    pub evidence_base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            directory_url: "http://127.0.0.1:8000/api".into(),
            stream_url: "http://127.0.0.1:8000/api".into(),
            inference_url: "http://127.0.0.1:5000".into(),
            evidence_base_url: "http://127.0.0.1:8000/media/evidence".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateConfig {
    pub capture_delay_ms: u64,
    pub resolve_timeout_ms: u64,
    pub stream_start_timeout_ms: u64,
    pub verify_timeout_ms: u64,
    pub event_capacity: usize,
    pub endpoints: Endpoints,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            capture_delay_ms: CAPTURE_DELAY.as_millis() as u64,
            resolve_timeout_ms: DEFAULT_RESOLVE_TIMEOUT_MS,
            stream_start_timeout_ms: DEFAULT_STREAM_START_TIMEOUT_MS,
            verify_timeout_ms: DEFAULT_VERIFY_TIMEOUT_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            endpoints: Endpoints::default(),
        }
    }
}

impl GateConfig {
    /// Loads config from a JSON file. A missing file means defaults; a file
    /// that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config at {}", path.display()))?
        } else {
            GateConfig::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(CAPTURE_DELAY_ENV) {
            self.capture_delay_ms = value
                .trim()
                .parse()
                .with_context(|| format!("{CAPTURE_DELAY_ENV} must be milliseconds, got '{value}'"))?;
        }
        Ok(())
    }

    pub fn timings(&self) -> OrchestratorTimings {
        OrchestratorTimings {
            capture_delay: Duration::from_millis(self.capture_delay_ms),
            resolve_timeout: Duration::from_millis(self.resolve_timeout_ms),
            stream_start_timeout: Duration::from_millis(self.stream_start_timeout_ms),
            verify_timeout: Duration::from_millis(self.verify_timeout_ms),
            event_capacity: self.event_capacity.max(1),
        }
    }
}

pub fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Runtime view of the timing knobs, consumed by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorTimings {
    pub capture_delay: Duration,
    pub resolve_timeout: Duration,
    pub stream_start_timeout: Duration,
    pub verify_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for OrchestratorTimings {
    fn default() -> Self {
        GateConfig::default().timings()
    }
}
