//! Domain types shared across the orchestrator, the store trait and the
//! HTTP façade. Plain data — no behavior tied to a particular storage
//! backend lives here; it's kept separate from the services that act
//! on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type AssetId = Uuid;
pub type TaskId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Uploaded,
    Processed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub owner_id: UserId,
    pub display_name: String,
    pub stored_path: String,
    pub status: AssetStatus,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: UserId,
    pub source_display_name: String,
    pub argv: String,
    pub planned_final_path: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub details: Option<String>,
    pub result_asset_id: Option<AssetId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Construct a freshly enqueued task; callers (the coordinator) own
    /// assigning `id` and `created_at`/`updated_at`.
    pub fn new_pending(
        id: TaskId,
        owner_id: UserId,
        source_display_name: String,
        argv: String,
        planned_final_path: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            source_display_name,
            argv,
            planned_final_path,
            status: TaskStatus::Pending,
            progress: 0,
            details: None,
            result_asset_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Hardware vendor chosen by the capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwVendor {
    Nvidia,
    Amd,
    Intel,
    Vaapi,
    Apple,
    None,
}

impl Default for HwVendor {
    fn default() -> Self {
        HwVendor::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub vendor: HwVendor,
    /// video-codec alias -> vendor-specific encoder name, e.g. "h264" -> "h264_nvenc"
    pub encoders: std::collections::HashMap<String, String>,
    pub hwaccel_flag: Option<String>,
    pub hwaccel_output_format: Option<String>,
}

impl CapabilityProfile {
    pub fn none() -> Self {
        Self {
            vendor: HwVendor::None,
            encoders: Default::default(),
            hwaccel_flag: None,
            hwaccel_output_format: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Fast,
    Balanced,
    Quality,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    #[serde(rename = "keepAspectRatio")]
    pub keep_aspect_ratio: bool,
}

/// The declarative processing request carried in `POST /api/process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub files: Vec<AssetId>,
    pub container: String,
    #[serde(rename = "startTime")]
    pub start_time: f64,
    #[serde(rename = "endTime")]
    pub end_time: f64,
    #[serde(rename = "totalDuration")]
    pub total_duration: f64,
    #[serde(rename = "videoCodec")]
    pub video_codec: String,
    #[serde(rename = "audioCodec")]
    pub audio_codec: String,
    #[serde(rename = "videoBitrate")]
    pub video_bitrate: Option<u32>,
    #[serde(rename = "audioBitrate")]
    pub audio_bitrate: Option<u32>,
    pub resolution: Option<Resolution>,
    #[serde(rename = "useHardwareAcceleration")]
    pub use_hardware_acceleration: bool,
    pub preset: Preset,
}
