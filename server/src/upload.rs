//! Upload intake (C7 "Upload intake" collaborator): sniffs a magic-byte
//! signature against the claimed extension, enforces the configured
//! size ceiling, writes the bytes under the owner's workspace
//! directory with a fresh opaque basename, and hands back an `Asset`
//! for the core/store to register. The core never sees raw bytes.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use reelqueue_core::model::{Asset, AssetStatus, UserId};

use crate::infra::errors::AppError;

/// Minimal container/format signatures; enough to catch a mislabeled
/// extension without needing a full `file(1)`-style magic database.
fn signature_matches(ext: &str, head: &[u8]) -> bool {
    match ext {
        "mp4" | "mov" | "m4a" => head.len() >= 8 && &head[4..8] == b"ftyp",
        "mkv" => head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]),
        "mp3" => head.starts_with(b"ID3") || (head.len() >= 2 && head[0] == 0xFF && (head[1] & 0xE0) == 0xE0),
        "wav" => head.starts_with(b"RIFF"),
        "flac" => head.starts_with(b"fLaC"),
        "ogg" => head.starts_with(b"OggS"),
        "aac" => head.starts_with(&[0xFF, 0xF1]) || head.starts_with(&[0xFF, 0xF9]),
        _ => true, // unrecognized extensions are allowed through; the transcoder will reject garbage input itself
    }
}

pub struct UploadRequest {
    pub owner_id: UserId,
    pub claimed_filename: String,
    pub bytes: Vec<u8>,
}

pub async fn intake_upload(
    workspace_root: &PathBuf,
    max_size_bytes: u64,
    request: UploadRequest,
) -> Result<Asset, AppError> {
    if request.bytes.len() as u64 > max_size_bytes {
        return Err(AppError::bad_request(format!(
            "upload exceeds the {max_size_bytes}-byte limit"
        )));
    }

    let ext = PathBuf::from(&request.claimed_filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let head = &request.bytes[..request.bytes.len().min(64)];
    if !signature_matches(&ext, head) {
        return Err(AppError::bad_request(
            "file signature does not match its extension",
        ));
    }

    let owner_dir = workspace_root.join(request.owner_id.to_string());
    tokio::fs::create_dir_all(&owner_dir)
        .await
        .map_err(|e| AppError::internal(format!("failed to prepare upload directory: {e}")))?;

    let asset_id = Uuid::new_v4();
    let basename = if ext.is_empty() {
        asset_id.to_string()
    } else {
        format!("{asset_id}.{ext}")
    };
    let stored_path = owner_dir.join(&basename);

    let mut file = tokio::fs::File::create(&stored_path)
        .await
        .map_err(|e| AppError::internal(format!("failed to create upload file: {e}")))?;
    file.write_all(&request.bytes)
        .await
        .map_err(|e| AppError::internal(format!("failed to write upload: {e}")))?;

    Ok(Asset {
        id: asset_id,
        owner_id: request.owner_id,
        display_name: request.claimed_filename,
        stored_path: stored_path.to_string_lossy().into_owned(),
        status: AssetStatus::Uploaded,
        size_bytes: request.bytes.len() as u64,
        created_at: chrono::Utc::now(),
    })
}
