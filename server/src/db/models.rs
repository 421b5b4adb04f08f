//! Row shapes returned by `sqlx::query_as!`-free hand mapping: no
//! compile-time `DATABASE_URL` checking, favoring `query_as::<_, T>`
//! with `FromRow` over the macro variants since the crate isn't always
//! built against a live database.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use reelqueue_core::model::{Asset, AssetStatus, Task, TaskStatus};

#[derive(FromRow)]
pub struct AssetRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub display_name: String,
    pub stored_path: String,
    pub status: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

impl From<AssetRow> for Asset {
    fn from(row: AssetRow) -> Self {
        Asset {
            id: row.id,
            owner_id: row.owner_id,
            display_name: row.display_name,
            stored_path: row.stored_path,
            status: parse_asset_status(&row.status),
            size_bytes: row.size_bytes as u64,
            created_at: row.created_at,
        }
    }
}

pub fn asset_status_str(status: AssetStatus) -> &'static str {
    match status {
        AssetStatus::Uploaded => "uploaded",
        AssetStatus::Processed => "processed",
    }
}

fn parse_asset_status(raw: &str) -> AssetStatus {
    match raw {
        "processed" => AssetStatus::Processed,
        _ => AssetStatus::Uploaded,
    }
}

#[derive(FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub source_display_name: String,
    pub argv: String,
    pub planned_final_path: String,
    pub status: String,
    pub progress: i16,
    pub details: Option<String>,
    pub result_asset_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: row.id,
            owner_id: row.owner_id,
            source_display_name: row.source_display_name,
            argv: row.argv,
            planned_final_path: row.planned_final_path,
            status: parse_task_status(&row.status),
            progress: row.progress.clamp(0, 100) as u8,
            details: row.details,
            result_asset_id: row.result_asset_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub fn task_status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Processing => "processing",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
    }
}

fn parse_task_status(raw: &str) -> TaskStatus {
    match raw {
        "processing" => TaskStatus::Processing,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        _ => TaskStatus::Pending,
    }
}

#[derive(FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}
