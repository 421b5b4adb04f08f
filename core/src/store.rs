//! Collaborator adapters: the trait seams the core talks to the
//! outside world through. A thin `sqlx::PgPool` wrapper would do for a
//! single backend, but lifting it to a trait here keeps the core crate
//! storage-agnostic; the `server` crate provides the concrete
//! Postgres-backed implementation.

use std::path::Path;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::{Asset, AssetId, Task, TaskId, TaskStatus, UserId};

/// Partial update applied to a task record. Every field left `None` is
/// left unchanged, so a caller only needs to name what changed.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub details: Option<Option<String>>,
    pub result_asset_id: Option<Option<AssetId>>,
}

impl TaskUpdate {
    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(Some(details.into()));
        self
    }

    pub fn result_asset_id(mut self, asset_id: AssetId) -> Self {
        self.result_asset_id = Some(Some(asset_id));
        self
    }
}

/// The durable record of users' assets and tasks. All operations are
/// synchronous from the core's point of view: the core never assumes
/// transactionality spans more than one call.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_task(&self, task: Task) -> CoreResult<()>;
    async fn update_task(&self, task_id: TaskId, update: TaskUpdate) -> CoreResult<()>;
    async fn get_task(&self, task_id: TaskId) -> CoreResult<Task>;
    async fn list_user_tasks(&self, owner_id: UserId, skip: u64, limit: u64) -> CoreResult<Vec<Task>>;
    async fn delete_task(&self, task_id: TaskId) -> CoreResult<()>;

    /// Tasks left `pending` or `processing` — used only by crash
    /// recovery at startup, before the dispatcher starts consuming.
    async fn list_nonterminal_tasks(&self) -> CoreResult<Vec<Task>>;

    async fn create_asset(&self, asset: Asset) -> CoreResult<()>;
    async fn get_asset(&self, asset_id: AssetId) -> CoreResult<Asset>;
    async fn list_user_assets(&self, owner_id: UserId) -> CoreResult<Vec<Asset>>;
    async fn delete_asset(&self, asset_id: AssetId) -> CoreResult<()>;
}

/// Filesystem seam: all paths are already normalized by the caller.
/// The workspace layout is `{root}/{owner_id}/{opaque-basename}{.ext}`.
#[async_trait]
pub trait Filesystem: Send + Sync {
    async fn rename(&self, from: &Path, to: &Path) -> CoreResult<()>;
    async fn remove(&self, path: &Path) -> CoreResult<()>;
    async fn exists(&self, path: &Path) -> bool;
    async fn size(&self, path: &Path) -> CoreResult<u64>;
}

/// The straightforward `tokio::fs`-backed implementation; sufficient
/// for a single-node deployment where the workspace root is a local
/// (or NFS-mounted) directory.
pub struct TokioFilesystem;

#[async_trait]
impl Filesystem for TokioFilesystem {
    async fn rename(&self, from: &Path, to: &Path) -> CoreResult<()> {
        if tokio::fs::metadata(to).await.is_ok() {
            let _ = tokio::fs::remove_file(to).await;
        }
        tokio::fs::rename(from, to).await.map_err(Into::into)
    }

    async fn remove(&self, path: &Path) -> CoreResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn size(&self, path: &Path) -> CoreResult<u64> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(metadata.len())
    }
}
