//! Postgres-backed [`Store`]: one struct wrapping a `PgPool`, one
//! method per operation, `sqlx::query`/`query_as` rather than an ORM.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use reelqueue_core::error::{CoreError, CoreResult};
use reelqueue_core::model::{Asset, AssetId, Task, TaskId, TaskStatus, UserId};
use reelqueue_core::store::{Store, TaskUpdate};

use super::models::{asset_status_str, task_status_str, AssetRow, TaskRow};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_task(&self, task: Task) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO tasks (id, owner_id, source_display_name, argv, planned_final_path, status, progress, details, result_asset_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(task.id)
        .bind(task.owner_id)
        .bind(&task.source_display_name)
        .bind(&task.argv)
        .bind(&task.planned_final_path)
        .bind(task_status_str(task.status))
        .bind(task.progress as i16)
        .bind(&task.details)
        .bind(task.result_asset_id)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(sqlx_to_core)?;
        Ok(())
    }

    async fn update_task(&self, task_id: TaskId, update: TaskUpdate) -> CoreResult<()> {
        let current = self.get_task(task_id).await?;

        let status = update.status.unwrap_or(current.status);
        let progress = update.progress.unwrap_or(current.progress);
        let details = update.details.unwrap_or(current.details);
        let result_asset_id = update.result_asset_id.unwrap_or(current.result_asset_id);

        sqlx::query(
            "UPDATE tasks SET status = $1, progress = $2, details = $3, result_asset_id = $4, updated_at = now()
             WHERE id = $5",
        )
        .bind(task_status_str(status))
        .bind(progress as i16)
        .bind(&details)
        .bind(result_asset_id)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(sqlx_to_core)?;
        Ok(())
    }

    async fn get_task(&self, task_id: TaskId) -> CoreResult<Task> {
        let row: TaskRow = sqlx::query_as(
            "SELECT id, owner_id, source_display_name, argv, planned_final_path, status, progress, details, result_asset_id, created_at, updated_at
             FROM tasks WHERE id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_to_core)?
        .ok_or_else(|| CoreError::NotFound(format!("task {task_id} not found")))?;
        Ok(row.into())
    }

    async fn list_user_tasks(&self, owner_id: UserId, skip: u64, limit: u64) -> CoreResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT id, owner_id, source_display_name, argv, planned_final_path, status, progress, details, result_asset_id, created_at, updated_at
             FROM tasks WHERE owner_id = $1 ORDER BY created_at DESC OFFSET $2 LIMIT $3",
        )
        .bind(owner_id)
        .bind(skip as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_to_core)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_task(&self, task_id: TaskId) -> CoreResult<()> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_to_core)?;
        Ok(())
    }

    async fn list_nonterminal_tasks(&self) -> CoreResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT id, owner_id, source_display_name, argv, planned_final_path, status, progress, details, result_asset_id, created_at, updated_at
             FROM tasks WHERE status IN ('pending', 'processing')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_to_core)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_asset(&self, asset: Asset) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO assets (id, owner_id, display_name, stored_path, status, size_bytes, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(asset.id)
        .bind(asset.owner_id)
        .bind(&asset.display_name)
        .bind(&asset.stored_path)
        .bind(asset_status_str(asset.status))
        .bind(asset.size_bytes as i64)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await
        .map_err(sqlx_to_core)?;
        Ok(())
    }

    async fn get_asset(&self, asset_id: AssetId) -> CoreResult<Asset> {
        let row: AssetRow = sqlx::query_as(
            "SELECT id, owner_id, display_name, stored_path, status, size_bytes, created_at FROM assets WHERE id = $1",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_to_core)?
        .ok_or_else(|| CoreError::NotFound(format!("asset {asset_id} not found")))?;
        Ok(row.into())
    }

    async fn list_user_assets(&self, owner_id: UserId) -> CoreResult<Vec<Asset>> {
        let rows: Vec<AssetRow> = sqlx::query_as(
            "SELECT id, owner_id, display_name, stored_path, status, size_bytes, created_at
             FROM assets WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_to_core)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_asset(&self, asset_id: AssetId) -> CoreResult<()> {
        sqlx::query("DELETE FROM assets WHERE id = $1")
            .bind(asset_id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_to_core)?;
        Ok(())
    }
}

fn sqlx_to_core(err: sqlx::Error) -> CoreError {
    CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}

/// Users live outside the core's contract (auth is an external
/// collaborator concern), so their repository sits beside `PgStore`
/// rather than implementing a core trait.
pub struct UserRepo {
    pool: PgPool,
}

impl UserRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, username: &str, password_hash: &str) -> Result<UserId, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, username, password_hash) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<super::models::UserRow>, sqlx::Error> {
        sqlx::query_as("SELECT id, username, password_hash, created_at FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn find_by_id(&self, id: UserId) -> Result<Option<super::models::UserRow>, sqlx::Error> {
        sqlx::query_as("SELECT id, username, password_hash, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }
}
