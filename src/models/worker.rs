use serde::{Deserialize, Serialize};

pub type CameraId = i64;
pub type CompanyId = i64;
pub type WorkerId = i64;

/// Resolved worker identity, owned by the session that resolved it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRef {
    pub worker_id: WorkerId,
    pub full_name: String,
    pub camera_id: CameraId,
}

/// What the stream controller hands back from `start`.
///
/// `acknowledged == false` means the start command went out but the camera
/// did not confirm it. Frames may still arrive; the capture delay covers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamHandle {
    pub camera_id: CameraId,
    pub display_url: String,
    pub acknowledged: bool,
}
