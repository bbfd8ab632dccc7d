//! reqwest-backed collaborators.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::{ComplianceVerifier, StreamController, WorkerDirectory};
use crate::error::{DirectoryError, StreamError, VerificationError};
use crate::models::{CameraId, CompanyId, RawVerdict, StreamHandle, WorkerId, WorkerRef};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Pulls `message` / `detail` / `error` out of a JSON error body, falling back to raw text.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "detail", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRecord {
    #[serde(alias = "workerId")]
    id: WorkerId,
    #[serde(alias = "full_name", alias = "name")]
    full_name: String,
    #[serde(default, alias = "camera_id", alias = "camera")]
    camera_id: Option<CameraId>,
}

impl WorkerRecord {
    fn into_worker_ref(self) -> Result<WorkerRef, DirectoryError> {
        let camera_id = self
            .camera_id
            .ok_or(DirectoryError::NoCameraAssigned(self.id))?;
        Ok(WorkerRef {
            worker_id: self.id,
            full_name: self.full_name,
            camera_id,
        })
    }
}

#[derive(Clone)]
pub struct HttpWorkerDirectory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpWorkerDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: build_client(),
        }
    }

    /// The worker code is user input, so it is pushed as one escaped path
    /// segment rather than formatted into the path.
    fn worker_url(&self, code: &str, company_id: CompanyId) -> Result<Url, DirectoryError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            DirectoryError::Unavailable(format!("invalid directory url '{}': {e}", self.base_url))
        })?;
        let company = company_id.to_string();
        url.path_segments_mut()
            .map_err(|_| {
                DirectoryError::Unavailable(format!(
                    "directory url '{}' cannot take a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(["companies", company.as_str(), "workers", code.trim()]);
        Ok(url)
    }
}

#[async_trait]
impl WorkerDirectory for HttpWorkerDirectory {
    async fn resolve(
        &self,
        code: &str,
        company_id: CompanyId,
    ) -> Result<WorkerRef, DirectoryError> {
        let response = self
            .client
            .get(self.worker_url(code, company_id)?)
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("worker lookup failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(DirectoryError::WorkerNotFound);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.bytes().await.unwrap_or_default();
            return Err(DirectoryError::Unavailable(format!(
                "directory returned {status}: {}",
                error_message(&body)
            )));
        }

        response
            .json::<WorkerRecord>()
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("invalid worker record: {e}")))?
            .into_worker_ref()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamStartResponse {
    #[serde(default, alias = "stream_url", alias = "url")]
    stream_url: Option<String>,
}

#[derive(Clone)]
pub struct HttpStreamController {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStreamController {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: build_client(),
        }
    }

    fn command_url(&self, camera_id: CameraId, command: &str) -> String {
        join(&self.base_url, &format!("cameras/{camera_id}/stream/{command}"))
    }

    fn display_url(&self, camera_id: CameraId) -> String {
        join(&self.base_url, &format!("cameras/{camera_id}/stream"))
    }
}

#[async_trait]
impl StreamController for HttpStreamController {
    async fn start(&self, camera_id: CameraId) -> Result<StreamHandle, StreamError> {
        let response = self
            .client
            .post(self.command_url(camera_id, "start"))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StreamError::Timeout {
                        after_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
                    }
                } else {
                    StreamError::Transport {
                        message: e.to_string(),
                    }
                }
            })?;

        // The device answered, so a display handle exists even if it did not
        // accept the command. Frames may still show up.
        if !response.status().is_success() {
            let status = response.status();
            let body = response.bytes().await.unwrap_or_default();
            warn!(
                "camera {camera_id} did not acknowledge stream start ({status}): {}",
                error_message(&body)
            );
            return Ok(StreamHandle {
                camera_id,
                display_url: self.display_url(camera_id),
                acknowledged: false,
            });
        }

        let body = response.json::<StreamStartResponse>().await.unwrap_or_default();
        Ok(StreamHandle {
            camera_id,
            display_url: body
                .stream_url
                .unwrap_or_else(|| self.display_url(camera_id)),
            acknowledged: true,
        })
    }

    async fn stop(&self, camera_id: CameraId) -> Result<(), StreamError> {
        let response = self
            .client
            .post(self.command_url(camera_id, "stop"))
            .send()
            .await
            .map_err(|e| StreamError::Transport {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.bytes().await.unwrap_or_default();
            return Err(StreamError::Rejected {
                message: format!("{status}: {}", error_message(&body)),
            });
        }
        debug!("camera {camera_id} stream stopped");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest<'a> {
    camera_id: CameraId,
    worker_code: &'a str,
    worker_id: WorkerId,
    full_name: &'a str,
}

#[derive(Clone)]
pub struct HttpComplianceVerifier {
    base_url: String,
    client: reqwest::Client,
}

impl HttpComplianceVerifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: build_client(),
        }
    }

    fn verify_url(&self) -> String {
        join(&self.base_url, "verify")
    }
}

#[async_trait]
impl ComplianceVerifier for HttpComplianceVerifier {
    async fn verify(
        &self,
        camera_id: CameraId,
        worker_code: &str,
        worker: &WorkerRef,
    ) -> Result<RawVerdict, VerificationError> {
        let request = VerifyRequest {
            camera_id,
            worker_code,
            worker_id: worker.worker_id,
            full_name: &worker.full_name,
        };

        let response = self
            .client
            .post(self.verify_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VerificationError::Timeout {
                        after_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
                    }
                } else {
                    VerificationError::Transport {
                        message: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.bytes().await.unwrap_or_default();
            return Err(VerificationError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        response
            .json::<RawVerdict>()
            .await
            .map_err(|e| VerificationError::Payload {
                message: e.to_string(),
            })
    }
}
