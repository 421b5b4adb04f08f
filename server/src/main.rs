//! Entry point: load config, connect to Postgres, wire the core's
//! components into an `AppState`, recover any in-flight tasks from a
//! prior run, start the dispatcher, and serve.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use reelqueue_core::{
    ActiveProcessTable, CapabilityProbe, ProgressHub, QueueSet, Store, TaskLifecycleCoordinator,
};

use reelqueue_server::auth::jwt::JwtKeyManager;
use reelqueue_server::infra::app_state::AppState;
use reelqueue_server::infra::config::ConfigLoader;
use reelqueue_server::{db, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelqueue_server=info,reelqueue_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(ConfigLoader::new().load()?);
    info!(bind_addr = %config.bind_addr, "configuration loaded");

    tokio::fs::create_dir_all(&config.workspace_root).await?;

    let pg_pool = db::connect(&config.database_url).await?;
    info!("database connected and migrations applied");

    let store: Arc<dyn Store> = Arc::new(db::PgStore::new(pg_pool.clone()));
    let filesystem = Arc::new(reelqueue_core::store::TokioFilesystem);
    let hub = ProgressHub::new();
    let queues = QueueSet::new();
    let active = ActiveProcessTable::default();

    let capability_probe = if config.enable_hardware_acceleration_detection {
        Arc::new(CapabilityProbe::new(config.ffmpeg_path.clone()))
    } else {
        Arc::new(CapabilityProbe::with_override(
            config.ffmpeg_path.clone(),
            reelqueue_core::model::HwVendor::None,
        ))
    };

    let coordinator = Arc::new(TaskLifecycleCoordinator::new(
        store.clone(),
        filesystem,
        hub.clone(),
        queues.clone(),
        active,
        capability_probe.clone(),
        config.ffmpeg_path.clone(),
    ));

    coordinator.recover_on_startup().await?;

    let jwt = Arc::new(JwtKeyManager::new(
        config.secret_key.clone(),
        JwtKeyManager::parse_algorithm(&config.algorithm),
        config.access_token_expire_minutes,
    ));

    let state = AppState {
        config: config.clone(),
        store,
        pg_pool,
        coordinator: coordinator.clone(),
        queues: queues.clone(),
        hub,
        capability_probe,
        jwt,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_handle = tokio::spawn(reelqueue_core::run_dispatcher(
        queues,
        coordinator,
        shutdown_rx,
    ));

    let app = routes::build_router(state);

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid BIND_ADDR {:?}: {e}", config.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "reelqueue server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("signalling dispatcher to stop");
    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatcher_handle.await {
        warn!(error = %e, "dispatcher task did not shut down cleanly");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
