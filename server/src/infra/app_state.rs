use std::fmt;
use std::sync::Arc;

use reelqueue_core::{CapabilityProbe, ProgressHub, QueueSet, Store, TaskLifecycleCoordinator};

use crate::auth::jwt::JwtKeyManager;
use crate::infra::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    /// The users table lives outside the core's contract (auth is an
    /// external collaborator), so handlers reach the pool directly to
    /// build a `UserRepo` rather than going through `Store`.
    pub pg_pool: sqlx::PgPool,
    pub coordinator: Arc<TaskLifecycleCoordinator>,
    pub queues: QueueSet,
    pub hub: ProgressHub,
    pub capability_probe: Arc<CapabilityProbe>,
    pub jwt: Arc<JwtKeyManager>,
}

impl AppState {
    pub fn pg_pool(&self) -> sqlx::PgPool {
        self.pg_pool.clone()
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
