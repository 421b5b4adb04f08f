//! Shared test-app builder: assembles a full `AppState` and router over
//! an `#[sqlx::test]`-provisioned pool so integration tests exercise
//! the real routing and handler stack.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;
use tempfile::TempDir;

use reelqueue_core::{
    ActiveProcessTable, CapabilityProbe, ProgressHub, QueueSet, Store, TaskLifecycleCoordinator,
};
use reelqueue_core::model::HwVendor;
use reelqueue_core::store::TokioFilesystem;
use reelqueue_server::auth::jwt::JwtKeyManager;
use reelqueue_server::db::PgStore;
use reelqueue_server::infra::app_state::AppState;
use reelqueue_server::infra::config::Config;

fn fixture_path(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub _workspace: TempDir,
}

/// Builds a full router against a real (ephemeral, `#[sqlx::test]`-provisioned)
/// Postgres pool, with the "transcoder" swapped for a fixture shell
/// script so the suite never depends on a real ffmpeg binary being on
/// PATH. `transcoder` is one of the scripts under `tests/fixtures/`.
pub async fn build_app(pool: PgPool, transcoder: &str) -> TestApp {
    let workspace = tempfile::tempdir().expect("tempdir");

    let config = Arc::new(Config {
        bind_addr: "127.0.0.1:0".to_string(),
        database_url: String::new(),
        workspace_root: workspace.path().to_path_buf(),
        ffmpeg_path: fixture_path(transcoder),
        ffprobe_path: "true".to_string(),
        secret_key: "test-only-secret-key-do-not-reuse".to_string(),
        algorithm: "HS256".to_string(),
        access_token_expire_minutes: 60,
        cors_origins: Vec::new(),
        max_upload_size_bytes: 50 * 1024 * 1024,
        enable_hardware_acceleration_detection: false,
    });

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let filesystem = Arc::new(TokioFilesystem);
    let hub = ProgressHub::new();
    let queues = QueueSet::new();
    let active = ActiveProcessTable::default();
    let capability_probe = Arc::new(CapabilityProbe::with_override(
        config.ffmpeg_path.clone(),
        HwVendor::None,
    ));

    let coordinator = Arc::new(TaskLifecycleCoordinator::new(
        store.clone(),
        filesystem,
        hub.clone(),
        queues.clone(),
        active,
        capability_probe.clone(),
        config.ffmpeg_path.clone(),
    ));

    let jwt = Arc::new(JwtKeyManager::new(
        config.secret_key.clone(),
        JwtKeyManager::parse_algorithm(&config.algorithm),
        config.access_token_expire_minutes,
    ));

    let state = AppState {
        config,
        store,
        pg_pool: pool,
        coordinator,
        queues,
        hub,
        capability_probe,
        jwt,
    };

    let router = reelqueue_server::routes::build_router(state.clone());

    TestApp {
        router,
        state,
        _workspace: workspace,
    }
}

/// Spawns the dispatcher loop against the test app's queues/coordinator,
/// same wiring as `main.rs`. Returns the shutdown sender; dropping it
/// without sending is fine for a test, the task just dies with the
/// runtime.
pub fn spawn_dispatcher(app: &TestApp) -> tokio::sync::watch::Sender<bool> {
    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(reelqueue_core::run_dispatcher(
        app.state.queues.clone(),
        app.state.coordinator.clone(),
        rx,
    ));
    tx
}

/// A minimal, correctly-signatured MP4 header, matching the sniff rule
/// in `upload.rs` (bytes 4..8 must be `ftyp`).
pub fn fake_mp4_bytes() -> Vec<u8> {
    let mut bytes = vec![0u8, 0, 0, 24];
    bytes.extend_from_slice(b"ftypisom");
    bytes.extend_from_slice(&[0u8; 16]);
    bytes
}
