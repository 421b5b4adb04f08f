use std::process::Stdio;

use axum::extract::{Multipart, Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tokio::process::Command;
use uuid::Uuid;

use reelqueue_core::model::Asset;

use crate::auth::middleware::AuthUser;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::upload::{intake_upload, UploadRequest};

pub async fn upload(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    mut multipart: Multipart,
) -> AppResult<Json<Asset>> {
    let mut filename = None;
    let mut bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(str::to_string);
            bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| AppError::bad_request(format!("failed to read upload body: {e}")))?
                    .to_vec(),
            );
        }
    }

    let filename = filename.ok_or_else(|| AppError::bad_request("missing file field"))?;
    let bytes = bytes.ok_or_else(|| AppError::bad_request("missing file field"))?;

    let asset = intake_upload(
        &state.config.workspace_root,
        state.config.max_upload_size_bytes,
        UploadRequest {
            owner_id,
            claimed_filename: filename,
            bytes,
        },
    )
    .await?;

    state.store.create_asset(asset.clone()).await?;
    Ok(Json(asset))
}

pub async fn list_files(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
) -> AppResult<Json<Vec<Asset>>> {
    let assets = state.store.list_user_assets(owner_id).await?;
    Ok(Json(assets))
}

#[derive(Debug, Deserialize)]
pub struct FilenameQuery {
    pub filename: Uuid,
}

/// Delegates to the companion probe binary for container/stream
/// metadata rather than parsing containers itself.
pub async fn file_info(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Query(query): Query<FilenameQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let asset = state.store.get_asset(query.filename).await?;
    if asset.owner_id != owner_id {
        return Err(AppError::forbidden("asset is not owned by this user"));
    }

    let output = Command::new(&state.config.ffprobe_path)
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(&asset.stored_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| AppError::internal(format!("failed to run probe binary: {e}")))?;

    if !output.status.success() {
        return Err(AppError::internal("probe binary exited with an error"));
    }

    serde_json::from_slice(&output.stdout)
        .map(Json)
        .map_err(|e| AppError::internal(format!("probe output was not valid JSON: {e}")))
}

pub async fn download_file(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(asset_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let asset = state.store.get_asset(asset_id).await?;
    if asset.owner_id != owner_id {
        return Err(AppError::forbidden("asset is not owned by this user"));
    }

    let bytes = tokio::fs::read(&asset.stored_path)
        .await
        .map_err(|e| AppError::internal(format!("failed to read asset file: {e}")))?;

    let headers = [(
        axum::http::header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{}\"", asset.display_name),
    )];

    Ok((headers, bytes))
}

/// Also removes any task that produced or references this asset, so
/// deleting a source clip doesn't leave orphaned task rows behind.
pub async fn delete_file(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Query(query): Query<FilenameQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let asset = state.store.get_asset(query.filename).await?;
    if asset.owner_id != owner_id {
        return Err(AppError::forbidden("asset is not owned by this user"));
    }

    let tasks = state.store.list_user_tasks(owner_id, 0, u64::MAX).await?;
    for task in tasks {
        if task.result_asset_id == Some(query.filename) {
            state.store.delete_task(task.id).await?;
        }
    }

    let _ = tokio::fs::remove_file(&asset.stored_path).await;
    state.store.delete_asset(query.filename).await?;

    Ok(Json(serde_json::json!({ "deleted": query.filename })))
}
