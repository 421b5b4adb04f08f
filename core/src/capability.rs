//! Capability probe.
//!
//! Detects which hardware encoder (if any) the host can offload to:
//! shell out to vendor tooling to confirm a GPU is present, then cross
//! check against the transcoder binary's own `-encoders` listing so a
//! GPU without the matching ffmpeg build doesn't get selected.
//!
//! Detection is blocking and syscall-heavy (spawns several child
//! processes), so it is computed once and cached for the process
//! lifetime — callers are expected to warm it at startup rather than on
//! the request path.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::OnceLock;

use tokio::process::Command;
use tracing::{debug, info};

use crate::model::{CapabilityProfile, HwVendor};

/// Fixed vendor preference order, most capable encoder first.
const VENDOR_PRIORITY: [HwVendor; 5] = [
    HwVendor::Nvidia,
    HwVendor::Amd,
    HwVendor::Intel,
    HwVendor::Vaapi,
    HwVendor::Apple,
];

pub struct CapabilityProbe {
    ffmpeg_path: String,
    /// Forces a vendor for testing without touching the host, the way
    /// an `ENABLE_HARDWARE_ACCELERATION_DETECTION=false` config
    /// short-circuits detection.
    override_vendor: Option<HwVendor>,
    cached: OnceLock<CapabilityProfile>,
}

impl CapabilityProbe {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        let override_vendor = std::env::var("REELQUEUE_FORCE_HW_VENDOR")
            .ok()
            .and_then(|v| parse_vendor(&v));

        Self {
            ffmpeg_path: ffmpeg_path.into(),
            override_vendor,
            cached: OnceLock::new(),
        }
    }

    pub fn with_override(ffmpeg_path: impl Into<String>, vendor: HwVendor) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            override_vendor: Some(vendor),
            cached: OnceLock::new(),
        }
    }

    /// Idempotent; never raises. Absence of hardware yields `vendor =
    /// none`. Cached after the first call.
    pub async fn detect(&self) -> CapabilityProfile {
        if let Some(cached) = self.cached.get() {
            return cached.clone();
        }

        let profile = self.detect_uncached().await;
        // If another task raced us, `set` silently loses — both produce
        // the same answer since detection is deterministic per host.
        let _ = self.cached.set(profile.clone());
        profile
    }

    async fn detect_uncached(&self) -> CapabilityProfile {
        if let Some(vendor) = self.override_vendor {
            info!(?vendor, "capability probe overridden for testing");
            return self.profile_for_vendor(vendor, &[]).await;
        }

        let candidates = detect_candidate_vendors().await;
        debug!(?candidates, "candidate GPU vendors from platform enumeration");

        for vendor in VENDOR_PRIORITY {
            if !candidates.contains(&vendor) {
                continue;
            }
            let confirmed = self.confirm_encoders(vendor).await;
            if !confirmed.is_empty() {
                info!(?vendor, encoders = ?confirmed, "hardware encoder confirmed");
                return self.profile_for_vendor(vendor, &confirmed).await;
            }
        }

        info!("no hardware encoder available, falling back to software");
        CapabilityProfile::none()
    }

    /// Cross-check ffmpeg's own `-encoders` output for the expected
    /// vendor-specific encoder names.
    async fn confirm_encoders(&self, vendor: HwVendor) -> Vec<(&'static str, &'static str)> {
        let listing = match Command::new(&self.ffmpeg_path)
            .arg("-hide_banner")
            .arg("-encoders")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
        {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).into_owned(),
            _ => return Vec::new(),
        };

        vendor_encoder_table(vendor)
            .iter()
            .copied()
            .filter(|(encoder, _codec)| listing.contains(encoder))
            .collect()
    }

    async fn profile_for_vendor(
        &self,
        vendor: HwVendor,
        confirmed: &[(&'static str, &'static str)],
    ) -> CapabilityProfile {
        if vendor == HwVendor::None {
            return CapabilityProfile::none();
        }

        let table = if confirmed.is_empty() {
            vendor_encoder_table(vendor).to_vec()
        } else {
            confirmed.to_vec()
        };

        let mut encoders = HashMap::new();
        for (encoder, codec) in table {
            encoders.insert(codec.to_string(), encoder.to_string());
        }

        let (hwaccel_flag, hwaccel_output_format) = match vendor {
            HwVendor::Nvidia => (Some("cuda".to_string()), Some("cuda".to_string())),
            HwVendor::Intel => (Some("qsv".to_string()), Some("qsv".to_string())),
            HwVendor::Vaapi => (Some("vaapi".to_string()), Some("vaapi".to_string())),
            HwVendor::Amd => (Some("d3d11va".to_string()), None),
            HwVendor::Apple => (Some("videotoolbox".to_string()), None),
            HwVendor::None => (None, None),
        };

        CapabilityProfile {
            vendor,
            encoders,
            hwaccel_flag,
            hwaccel_output_format,
        }
    }
}

fn vendor_encoder_table(vendor: HwVendor) -> &'static [(&'static str, &'static str)] {
    match vendor {
        HwVendor::Nvidia => &[
            ("h264_nvenc", "h264"),
            ("hevc_nvenc", "h265"),
            ("av1_nvenc", "av1"),
        ],
        HwVendor::Amd => &[("h264_amf", "h264"), ("hevc_amf", "h265")],
        HwVendor::Intel => &[
            ("h264_qsv", "h264"),
            ("hevc_qsv", "h265"),
            ("av1_qsv", "av1"),
        ],
        HwVendor::Vaapi => &[
            ("h264_vaapi", "h264"),
            ("hevc_vaapi", "h265"),
            ("vp9_vaapi", "vp9"),
            ("av1_vaapi", "av1"),
        ],
        HwVendor::Apple => &[
            ("h264_videotoolbox", "h264"),
            ("hevc_videotoolbox", "h265"),
        ],
        HwVendor::None => &[],
    }
}

/// Enumerate which vendors plausibly have a GPU present, the
/// platform-specific way: PCI/sysfs on Linux, vendor tooling elsewhere.
/// Never fails; an unreachable tool just means that vendor is absent.
async fn detect_candidate_vendors() -> Vec<HwVendor> {
    let mut candidates = Vec::new();

    if command_succeeds("nvidia-smi", &["--query-gpu=name", "--format=csv,noheader"]).await {
        candidates.push(HwVendor::Nvidia);
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(entries) = std::fs::read_dir("/sys/class/drm") {
            let mut has_render_node = false;
            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().starts_with("renderD") {
                    has_render_node = true;
                    break;
                }
            }
            if has_render_node {
                candidates.push(HwVendor::Vaapi);
            }
        }
        if command_succeeds("vainfo", &[]).await {
            if !candidates.contains(&HwVendor::Vaapi) {
                candidates.push(HwVendor::Vaapi);
            }
        }
    }

    if command_succeeds("vpl-inspect", &[]).await || std::path::Path::new("/dev/dri/renderD128").exists() {
        candidates.push(HwVendor::Intel);
    }

    #[cfg(target_os = "windows")]
    {
        candidates.push(HwVendor::Amd);
    }

    #[cfg(target_os = "macos")]
    {
        candidates.push(HwVendor::Apple);
    }

    candidates
}

async fn command_succeeds(bin: &str, args: &[&str]) -> bool {
    Command::new(bin)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

fn parse_vendor(raw: &str) -> Option<HwVendor> {
    match raw.to_ascii_lowercase().as_str() {
        "nvidia" => Some(HwVendor::Nvidia),
        "amd" => Some(HwVendor::Amd),
        "intel" => Some(HwVendor::Intel),
        "vaapi" => Some(HwVendor::Vaapi),
        "apple" => Some(HwVendor::Apple),
        "none" => Some(HwVendor::None),
        _ => None,
    }
}
