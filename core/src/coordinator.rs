//! Task lifecycle coordinator.
//!
//! Bridges command synthesis, the runner, the progress hub and the
//! per-user queues: the one place that knows the full state machine
//! `pending -> processing -> {completed, failed}`. Split out as its
//! own type since the dispatcher is deliberately dumb — it only knows
//! FIFO order and calls back into here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::capability::CapabilityProbe;
use crate::command::{self, SynthesizedCommand};
use crate::error::{CoreError, CoreResult};
use crate::hub::{ProgressFrame, ProgressHub};
use crate::model::{Asset, AssetStatus, ProcessRequest, Task, TaskId, TaskStatus, UserId};
use crate::queue::{QueueSet, TaskRunner};
use crate::runner::{ActiveProcessTable, ProgressSink, SubprocessRunner};
use crate::store::{Filesystem, Store, TaskUpdate};

/// Everything the runner needs for one task, computed once at submit
/// time and held in memory until the dispatcher picks the task up.
/// Living only in memory (not the store) is intentional: in-flight
/// tasks are not promised to survive a crash, so there is nothing to
/// reconstruct here after a restart — crash recovery instead marks the
/// task `failed` outright.
struct PreparedRun {
    owner_id: UserId,
    source_asset_id: Uuid,
    synthesized: SynthesizedCommand,
    total_duration: f64,
}

pub struct TaskLifecycleCoordinator {
    store: Arc<dyn Store>,
    filesystem: Arc<dyn Filesystem>,
    hub: ProgressHub,
    queues: QueueSet,
    active: ActiveProcessTable,
    capability_probe: Arc<CapabilityProbe>,
    ffmpeg_path: String,
    prepared: Mutex<HashMap<TaskId, PreparedRun>>,
}

impl TaskLifecycleCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        filesystem: Arc<dyn Filesystem>,
        hub: ProgressHub,
        queues: QueueSet,
        active: ActiveProcessTable,
        capability_probe: Arc<CapabilityProbe>,
        ffmpeg_path: impl Into<String>,
    ) -> Self {
        Self {
            store,
            filesystem,
            hub,
            queues,
            active,
            capability_probe,
            ffmpeg_path: ffmpeg_path.into(),
            prepared: Mutex::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.hub
    }

    /// Scan the store for tasks left `pending` or `processing` from a
    /// prior run and mark them failed. Must run before the dispatcher
    /// starts consuming.
    pub async fn recover_on_startup(&self) -> CoreResult<()> {
        let stuck = self.store.list_nonterminal_tasks().await?;
        if stuck.is_empty() {
            info!("crash recovery: no in-flight tasks found");
            return Ok(());
        }
        warn!(count = stuck.len(), "crash recovery: marking in-flight tasks failed");
        for task in stuck {
            self.store
                .update_task(
                    task.id,
                    TaskUpdate::default()
                        .status(TaskStatus::Failed)
                        .details("restarted while in flight"),
                )
                .await?;
        }
        Ok(())
    }

    /// Validate ownership of every referenced source asset, synthesize
    /// a command for each, persist a `pending` task, and enqueue it.
    /// Never partially fails silently: the first invalid source aborts
    /// the whole batch before any task is created.
    pub async fn submit(&self, owner_id: UserId, request: ProcessRequest) -> CoreResult<Vec<TaskId>> {
        if request.files.is_empty() {
            return Err(CoreError::BadRequest("no source assets specified".into()));
        }

        let mut sources = Vec::with_capacity(request.files.len());
        for asset_id in &request.files {
            let asset = self.store.get_asset(*asset_id).await?;
            if asset.owner_id != owner_id {
                return Err(CoreError::Forbidden(format!(
                    "asset {asset_id} is not owned by this user"
                )));
            }
            sources.push(asset);
        }

        let capability = self.capability_probe.detect().await;
        let mut task_ids = Vec::with_capacity(sources.len());

        for asset in sources {
            let source_path = PathBuf::from(&asset.stored_path);
            let synthesized = command::synthesize(
                &self.ffmpeg_path,
                &source_path,
                &asset.display_name,
                &request,
                &capability,
            );

            let task_id = Uuid::new_v4();
            let task = Task::new_pending(
                task_id,
                owner_id,
                asset.display_name.clone(),
                synthesized.argv_string(),
                synthesized.final_path.to_string_lossy().into_owned(),
            );
            self.store.create_task(task).await?;

            self.prepared.lock().insert(
                task_id,
                PreparedRun {
                    owner_id,
                    source_asset_id: asset.id,
                    synthesized,
                    total_duration: request.total_duration,
                },
            );

            self.queues.enqueue(owner_id, task_id);
            task_ids.push(task_id);
        }

        Ok(task_ids)
    }

    /// Cancel a task regardless of whether it is still queued or
    /// already running. A cancel on an already-terminal task is a
    /// no-op — status never reverts.
    pub async fn cancel(&self, owner_id: UserId, task_id: TaskId) -> CoreResult<()> {
        let task = self.store.get_task(task_id).await?;
        if task.owner_id != owner_id {
            return Err(CoreError::Forbidden("task is not owned by this user".into()));
        }
        if task.status.is_terminal() {
            return Ok(());
        }

        if self.queues.cancel_if_queued(task_id) {
            self.prepared.lock().remove(&task_id);
            self.finalize_failure(task_id, task.progress, "cancelled while queued")
                .await?;
        } else {
            // Already running: signal the runner. It observes the kill,
            // returns `Cancelled`, and `run_task` below does the actual
            // bookkeeping once the child exits.
            self.active.cancel(task_id).await;
        }
        Ok(())
    }

    async fn finalize_failure(&self, task_id: TaskId, progress: u8, details: &str) -> CoreResult<()> {
        self.store
            .update_task(
                task_id,
                TaskUpdate::default()
                    .status(TaskStatus::Failed)
                    .details(details.to_string()),
            )
            .await?;
        self.hub
            .publish(
                task_id,
                ProgressFrame::terminal(progress, TaskStatus::Failed, Some(details.to_string())),
            )
            .await;
        Ok(())
    }

    async fn finalize_success(&self, task_id: TaskId, result_asset_id: Uuid) -> CoreResult<()> {
        self.store
            .update_task(
                task_id,
                TaskUpdate::default()
                    .status(TaskStatus::Completed)
                    .progress(100)
                    .result_asset_id(result_asset_id),
            )
            .await?;
        self.hub
            .publish(task_id, ProgressFrame::terminal(100, TaskStatus::Completed, None))
            .await;
        Ok(())
    }

    async fn process_one(&self, task_id: TaskId, prepared: PreparedRun) {
        self.store
            .update_task(
                task_id,
                TaskUpdate::default().status(TaskStatus::Processing).progress(0),
            )
            .await
            .ok();
        self.hub.publish(task_id, ProgressFrame::tick(0)).await;

        let runner = SubprocessRunner::new(self.active.clone());
        let sink = CoordinatorProgressSink {
            store: self.store.clone(),
            hub: self.hub.clone(),
            task_id,
        };

        let argv = prepared.synthesized.argv.clone();
        let outcome = runner
            .run(task_id, &argv, prepared.total_duration, &sink)
            .await;

        match outcome {
            Ok(_tail) => {
                if let Err(e) = self.promote_artifact(task_id, prepared).await {
                    error!(%task_id, error = %e, "post-process failed after successful transcode");
                    let _ = self
                        .finalize_failure(task_id, 99, &format!("post-processing failed: {e}"))
                        .await;
                }
            }
            Err(e) => {
                let _ = self.filesystem.remove(&prepared.synthesized.temp_path).await;
                let details = failure_details(&e);
                if let Err(store_err) = self.finalize_failure(task_id, 0, &details).await {
                    error!(%task_id, error = %store_err, "failed to persist task failure");
                }
            }
        }
    }

    async fn promote_artifact(&self, task_id: TaskId, prepared: PreparedRun) -> CoreResult<()> {
        self.filesystem
            .rename(&prepared.synthesized.temp_path, &prepared.synthesized.final_path)
            .await
            .map_err(|e| CoreError::PostProcessFailed(e.to_string()))?;

        let size_bytes = self
            .filesystem
            .size(&prepared.synthesized.final_path)
            .await
            .unwrap_or(0);

        let asset = Asset {
            id: Uuid::new_v4(),
            owner_id: prepared.owner_id,
            display_name: prepared.synthesized.final_display_name.clone(),
            stored_path: prepared.synthesized.final_path.to_string_lossy().into_owned(),
            status: AssetStatus::Processed,
            size_bytes,
            created_at: Utc::now(),
        };
        let asset_id = asset.id;
        self.store
            .create_asset(asset)
            .await
            .map_err(|e| CoreError::PostProcessFailed(e.to_string()))?;

        let _ = prepared.source_asset_id; // retained for traceability only

        self.finalize_success(task_id, asset_id).await
    }
}

fn failure_details(e: &CoreError) -> String {
    match e {
        CoreError::TranscoderStalled { secs } => format!("stalled: no output for {secs}s"),
        CoreError::TranscoderMissing => "transcoder binary not found on PATH".to_string(),
        CoreError::TranscoderFailed { tail } => {
            if tail.is_empty() {
                "transcoder exited with a non-zero status".to_string()
            } else {
                tail.clone()
            }
        }
        CoreError::Cancelled => "cancelled".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl TaskRunner for TaskLifecycleCoordinator {
    async fn run_task(&self, _owner_id: UserId, task_id: TaskId) {
        let prepared = self.prepared.lock().remove(&task_id);
        let Some(prepared) = prepared else {
            warn!(%task_id, "dispatcher popped a task with no prepared run, skipping");
            return;
        };
        self.process_one(task_id, prepared).await;
    }
}

struct CoordinatorProgressSink {
    store: Arc<dyn Store>,
    hub: ProgressHub,
    task_id: TaskId,
}

#[async_trait]
impl ProgressSink for CoordinatorProgressSink {
    async fn publish(&self, progress: Option<u8>) {
        if let Some(p) = progress {
            let _ = self
                .store
                .update_task(self.task_id, TaskUpdate::default().progress(p))
                .await;
            self.hub.publish(self.task_id, ProgressFrame::tick(p)).await;
        }
        // `progress = None` (unknown total duration) is a pure liveness
        // tick: nothing numeric to persist or push, the coalescing in
        // the runner already bounds how often we even get called.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::path::Path;

    use crate::model::{AssetId, Preset};

    #[derive(Default)]
    struct FakeStore {
        tasks: Mutex<StdHashMap<TaskId, Task>>,
        assets: Mutex<StdHashMap<AssetId, Asset>>,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn create_task(&self, task: Task) -> CoreResult<()> {
            self.tasks.lock().insert(task.id, task);
            Ok(())
        }

        async fn update_task(&self, task_id: TaskId, update: TaskUpdate) -> CoreResult<()> {
            let mut tasks = self.tasks.lock();
            let task = tasks
                .get_mut(&task_id)
                .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))?;
            if let Some(status) = update.status {
                task.status = status;
            }
            if let Some(progress) = update.progress {
                task.progress = progress;
            }
            if let Some(details) = update.details {
                task.details = details;
            }
            if let Some(result_asset_id) = update.result_asset_id {
                task.result_asset_id = result_asset_id;
            }
            task.updated_at = Utc::now();
            Ok(())
        }

        async fn get_task(&self, task_id: TaskId) -> CoreResult<Task> {
            self.tasks
                .lock()
                .get(&task_id)
                .cloned()
                .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))
        }

        async fn list_user_tasks(&self, owner_id: UserId, _skip: u64, _limit: u64) -> CoreResult<Vec<Task>> {
            Ok(self
                .tasks
                .lock()
                .values()
                .filter(|t| t.owner_id == owner_id)
                .cloned()
                .collect())
        }

        async fn delete_task(&self, task_id: TaskId) -> CoreResult<()> {
            self.tasks.lock().remove(&task_id);
            Ok(())
        }

        async fn list_nonterminal_tasks(&self) -> CoreResult<Vec<Task>> {
            Ok(self
                .tasks
                .lock()
                .values()
                .filter(|t| !t.status.is_terminal())
                .cloned()
                .collect())
        }

        async fn create_asset(&self, asset: Asset) -> CoreResult<()> {
            self.assets.lock().insert(asset.id, asset);
            Ok(())
        }

        async fn get_asset(&self, asset_id: AssetId) -> CoreResult<Asset> {
            self.assets
                .lock()
                .get(&asset_id)
                .cloned()
                .ok_or_else(|| CoreError::NotFound(format!("asset {asset_id}")))
        }

        async fn list_user_assets(&self, owner_id: UserId) -> CoreResult<Vec<Asset>> {
            Ok(self
                .assets
                .lock()
                .values()
                .filter(|a| a.owner_id == owner_id)
                .cloned()
                .collect())
        }

        async fn delete_asset(&self, asset_id: AssetId) -> CoreResult<()> {
            self.assets.lock().remove(&asset_id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFilesystem;

    #[async_trait]
    impl Filesystem for FakeFilesystem {
        async fn rename(&self, _from: &Path, _to: &Path) -> CoreResult<()> {
            Ok(())
        }
        async fn remove(&self, _path: &Path) -> CoreResult<()> {
            Ok(())
        }
        async fn exists(&self, _path: &Path) -> bool {
            true
        }
        async fn size(&self, _path: &Path) -> CoreResult<u64> {
            Ok(1024)
        }
    }

    fn process_request(asset_id: AssetId) -> ProcessRequest {
        ProcessRequest {
            files: vec![asset_id],
            container: "mp4".to_string(),
            start_time: 0.0,
            end_time: 10.0,
            total_duration: 10.0,
            video_codec: "h264".to_string(),
            audio_codec: "aac".to_string(),
            video_bitrate: None,
            audio_bitrate: None,
            resolution: None,
            use_hardware_acceleration: false,
            preset: Preset::Balanced,
        }
    }

    fn coordinator(store: Arc<FakeStore>) -> TaskLifecycleCoordinator {
        TaskLifecycleCoordinator::new(
            store,
            Arc::new(FakeFilesystem),
            ProgressHub::new(),
            QueueSet::new(),
            ActiveProcessTable::default(),
            Arc::new(CapabilityProbe::with_override("ffmpeg", crate::model::HwVendor::None)),
            // `true` always exits 0 and writes nothing to stderr, standing
            // in for a transcoder that completes with no progress ticks.
            "true",
        )
    }

    #[tokio::test]
    async fn happy_path_submit_and_run_completes_the_task() {
        let store = Arc::new(FakeStore::default());
        let owner_id = Uuid::new_v4();
        let asset_id = Uuid::new_v4();
        store
            .create_asset(Asset {
                id: asset_id,
                owner_id,
                display_name: "clip.mp4".to_string(),
                stored_path: "/tmp/clip.mp4".to_string(),
                status: AssetStatus::Uploaded,
                size_bytes: 100,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let coord = coordinator(store.clone());
        let task_ids = coord.submit(owner_id, process_request(asset_id)).await.unwrap();
        assert_eq!(task_ids.len(), 1);
        let task_id = task_ids[0];

        TaskRunner::run_task(&coord, owner_id, task_id).await;

        let task = store.get_task(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert!(task.result_asset_id.is_some());

        let produced = store.get_asset(task.result_asset_id.unwrap()).await.unwrap();
        assert_eq!(produced.status, AssetStatus::Processed);
    }

    #[tokio::test]
    async fn submit_rejects_an_asset_owned_by_someone_else() {
        let store = Arc::new(FakeStore::default());
        let owner_id = Uuid::new_v4();
        let other_owner = Uuid::new_v4();
        let asset_id = Uuid::new_v4();
        store
            .create_asset(Asset {
                id: asset_id,
                owner_id: other_owner,
                display_name: "clip.mp4".to_string(),
                stored_path: "/tmp/clip.mp4".to_string(),
                status: AssetStatus::Uploaded,
                size_bytes: 100,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let coord = coordinator(store);
        let result = coord.submit(owner_id, process_request(asset_id)).await;
        assert!(matches!(result, Err(CoreError::Forbidden(_))));
    }

    #[tokio::test]
    async fn cancel_while_queued_finalizes_as_failed_without_running() {
        let store = Arc::new(FakeStore::default());
        let owner_id = Uuid::new_v4();
        let asset_id = Uuid::new_v4();
        store
            .create_asset(Asset {
                id: asset_id,
                owner_id,
                display_name: "clip.mp4".to_string(),
                stored_path: "/tmp/clip.mp4".to_string(),
                status: AssetStatus::Uploaded,
                size_bytes: 100,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let coord = coordinator(store.clone());
        let task_ids = coord.submit(owner_id, process_request(asset_id)).await.unwrap();
        let task_id = task_ids[0];

        coord.cancel(owner_id, task_id).await.unwrap();

        let task = store.get_task(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.details.as_deref(), Some("cancelled while queued"));
    }

    #[tokio::test]
    async fn recover_on_startup_fails_nonterminal_tasks() {
        let store = Arc::new(FakeStore::default());
        let owner_id = Uuid::new_v4();
        store
            .create_task(Task::new_pending(
                Uuid::new_v4(),
                owner_id,
                "clip.mp4".to_string(),
                "ffmpeg ...".to_string(),
                "/tmp/out.mp4".to_string(),
            ))
            .await
            .unwrap();

        let coord = coordinator(store.clone());
        coord.recover_on_startup().await.unwrap();

        let tasks = store.list_user_tasks(owner_id, 0, 10).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        assert_eq!(tasks[0].details.as_deref(), Some("restarted while in flight"));
    }
}
