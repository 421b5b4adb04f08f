//! Command synthesizer.
//!
//! Translates a [`ProcessRequest`] plus a detected [`CapabilityProfile`]
//! into a concrete transcoder argument vector: hwaccel flags before
//! `-i`, encoder selection, preset gating, stream mapping, all driven
//! by a general container/codec compatibility and preset table rather
//! than a single fixed pipeline.
//!
//! The synthesizer never fails a request: unknown or incompatible
//! codec aliases are silently corrected per the tables below.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::model::{CapabilityProfile, HwVendor, Preset, ProcessRequest};

#[derive(Debug, Clone)]
pub struct SynthesizedCommand {
    pub argv: Vec<String>,
    pub final_display_name: String,
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
}

impl SynthesizedCommand {
    /// A single shell-printable rendering kept on the `Task` record for
    /// diagnostics — never re-parsed, just displayed.
    pub fn argv_string(&self) -> String {
        self.argv
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(arg: &str) -> String {
    if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"') {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Build the argv, final display name, and temp/final paths for one
/// source asset. `ffmpeg_path` becomes `argv[0]` — the runner spawns
/// whatever this argv's first element names.
pub fn synthesize(
    ffmpeg_path: &str,
    source_path: &Path,
    source_display_name: &str,
    request: &ProcessRequest,
    capability: &CapabilityProfile,
) -> SynthesizedCommand {
    let container = request.container.to_ascii_lowercase();
    let audio_only = is_audio_only_container(&container);

    let video_codec = if audio_only {
        None
    } else {
        Some(correct_video_codec(&container, &request.video_codec))
    };
    let audio_codec = correct_audio_codec(&container, &request.audio_codec);

    let (effective_video_codec, hw_encoder) = match &video_codec {
        Some(codec) if codec == "copy" => (Some("copy".to_string()), false),
        Some(codec) if request.use_hardware_acceleration => match capability.encoders.get(codec) {
            Some(hw_name) => (Some(hw_name.clone()), true),
            None => (Some(software_video_encoder(codec).to_string()), false),
        },
        Some(codec) => (Some(software_video_encoder(codec).to_string()), false),
        None => (None, false),
    };

    let parent = source_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let temp_basename = format!("{}.tmp.{}", Uuid::new_v4(), container);
    let final_basename = format!("{}.{}", Uuid::new_v4(), container);
    let temp_path = parent.join(&temp_basename);
    let final_path = parent.join(&final_basename);

    let source_stem = Path::new(source_display_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_display_name.to_string());
    let final_display_name = format!("{source_stem}_processed.{container}");

    let mut argv = vec![
        ffmpeg_path.to_string(),
        "-y".to_string(),
        "-fflags".to_string(),
        "+genpts".to_string(),
    ];

    let trimming = request.start_time > 0.0
        || (request.total_duration > 0.0 && request.end_time < request.total_duration);

    // Hardware input-side flags must precede `-i`.
    if hw_encoder {
        if let Some(flag) = &capability.hwaccel_flag {
            argv.push("-hwaccel".to_string());
            argv.push(flag.clone());
        }
        if let Some(fmt) = &capability.hwaccel_output_format {
            argv.push("-hwaccel_output_format".to_string());
            argv.push(fmt.clone());
        }
    }

    if trimming && request.start_time > 0.0 {
        argv.push("-ss".to_string());
        argv.push(format_seconds(request.start_time));
    }

    argv.push("-i".to_string());
    argv.push(source_path.to_string_lossy().into_owned());

    if trimming && request.total_duration > 0.0 && request.end_time < request.total_duration {
        argv.push("-to".to_string());
        argv.push(format_seconds(request.end_time - request.start_time));
    }

    // Stream mapping.
    if audio_only {
        argv.push("-vn".to_string());
        argv.push("-map".to_string());
        argv.push("0:a?".to_string());
    } else {
        argv.push("-map".to_string());
        argv.push("0:v?".to_string());
        argv.push("-map".to_string());
        argv.push("0:a?".to_string());
    }

    // Video encoding options.
    if let Some(codec) = &effective_video_codec {
        argv.push("-c:v".to_string());
        argv.push(codec.clone());

        if codec != "copy" {
            if let Some(bitrate) = request.video_bitrate {
                argv.push("-b:v".to_string());
                argv.push(format!("{bitrate}k"));
            }

            if let Some(preset) = preset_token(capability.vendor, request.preset, hw_encoder) {
                argv.push(preset_flag(capability.vendor, hw_encoder).to_string());
                argv.push(preset.to_string());
            }

            if let Some(resolution) = &request.resolution {
                let scale = format!("{}x{}", resolution.width, resolution.height);
                if hw_encoder {
                    argv.push("-vf".to_string());
                    argv.push(format!("{}={}", gpu_scale_filter(capability.vendor), scale));
                } else {
                    argv.push("-s".to_string());
                    argv.push(scale);
                }
            }

            // Trimming a re-encoded video stream must not start on a
            // non-decodable frame; applies only to re-encodes, never to
            // a lossless `copy`.
            if trimming {
                argv.push("-force_key_frames".to_string());
                argv.push("expr:eq(n,0)".to_string());
            }
        }
    }

    // Audio encoding options.
    argv.push("-c:a".to_string());
    argv.push(audio_codec.clone());
    if audio_codec != "copy" {
        if let Some(bitrate) = request.audio_bitrate {
            argv.push("-b:a".to_string());
            argv.push(format!("{bitrate}k"));
        }
    }

    argv.push(final_path.to_string_lossy().into_owned());

    // The caller writes through a temp path first and renames on
    // success; ffmpeg's output argument above is the temp path until
    // the coordinator promotes it. Swap it in now so argv reflects what
    // actually runs.
    let out_index = argv.len() - 1;
    argv[out_index] = temp_path.to_string_lossy().into_owned();

    SynthesizedCommand {
        argv,
        final_display_name,
        temp_path,
        final_path,
    }
}

fn format_seconds(secs: f64) -> String {
    format!("{:.3}", secs.max(0.0))
}

fn is_audio_only_container(container: &str) -> bool {
    matches!(container, "mp3" | "flac" | "wav" | "aac" | "ogg")
}

fn correct_video_codec(container: &str, requested: &str) -> String {
    if requested == "copy" {
        return requested.to_string();
    }
    let allowed: &[&str] = match container {
        "mp4" => &["h264", "h265", "av1"],
        "mkv" => &["h264", "h265", "av1", "vp9"],
        "mov" => &["h264", "h265"],
        _ => &["h264", "h265", "av1", "vp9"],
    };
    if allowed.contains(&requested) {
        requested.to_string()
    } else {
        "h264".to_string()
    }
}

/// Maps a container-compatibility alias to the concrete ffmpeg software
/// encoder it names. The allowed-codec tables above operate on these
/// short aliases, but argv must carry the real encoder name ffmpeg
/// understands, not the alias.
fn software_video_encoder(alias: &str) -> &'static str {
    match alias {
        "h264" => "libx264",
        "h265" => "libx265",
        "av1" => "libaom-av1",
        "vp9" => "libvpx-vp9",
        _ => "libx264",
    }
}

fn correct_audio_codec(container: &str, requested: &str) -> String {
    if requested == "copy" {
        return requested.to_string();
    }
    match container {
        "mp4" | "mov" => {
            if matches!(requested, "aac" | "mp3") {
                requested.to_string()
            } else {
                "aac".to_string()
            }
        }
        "mkv" => {
            if matches!(requested, "aac" | "mp3" | "opus" | "flac") {
                requested.to_string()
            } else {
                "aac".to_string()
            }
        }
        "mp3" => "libmp3lame".to_string(),
        "flac" => "flac".to_string(),
        "aac" => "aac".to_string(),
        "wav" => "pcm_s16le".to_string(),
        _ => requested.to_string(),
    }
}

/// Preset token per vendor. `None` for Apple (VideoToolbox ignores
/// `-preset`), in which case the caller omits the flag entirely.
fn preset_token(vendor: HwVendor, preset: Preset, hw_encoder: bool) -> Option<&'static str> {
    let vendor = if hw_encoder { vendor } else { HwVendor::None };
    match (vendor, preset) {
        (HwVendor::Nvidia, Preset::Fast) => Some("p1"),
        (HwVendor::Nvidia, Preset::Balanced) => Some("p4"),
        (HwVendor::Nvidia, Preset::Quality) => Some("p7"),
        (HwVendor::Intel, Preset::Fast) => Some("veryfast"),
        (HwVendor::Intel, Preset::Balanced) => Some("medium"),
        (HwVendor::Intel, Preset::Quality) => Some("veryslow"),
        (HwVendor::Amd, Preset::Fast) => Some("speed"),
        (HwVendor::Amd, Preset::Balanced) => Some("balanced"),
        (HwVendor::Amd, Preset::Quality) => Some("quality"),
        (HwVendor::Apple, _) => None,
        (HwVendor::Vaapi, _) | (HwVendor::None, _) => match preset {
            Preset::Fast => Some("superfast"),
            Preset::Balanced => Some("medium"),
            Preset::Quality => Some("slow"),
        },
    }
}

fn preset_flag(vendor: HwVendor, hw_encoder: bool) -> &'static str {
    if hw_encoder && vendor == HwVendor::Amd {
        "-quality"
    } else {
        "-preset"
    }
}

fn gpu_scale_filter(vendor: HwVendor) -> &'static str {
    match vendor {
        HwVendor::Nvidia => "scale_cuda",
        HwVendor::Intel => "scale_qsv",
        HwVendor::Vaapi => "scale_vaapi",
        _ => "scale",
    }
}
