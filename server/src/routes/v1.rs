//! Route table: one file per resource, merged into a single versioned
//! router. Bearer-auth is applied per-route via
//! `axum::middleware::from_fn_with_state` rather than blanket-wrapping
//! the whole router, since `/token`, `/users/` (registration) and
//! `/healthz` must stay open.

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::auth::middleware::auth_middleware;
use crate::handlers::{asset_handlers, auth_handlers, capability_handlers, task_handlers, ws_handlers};
use crate::infra::app_state::AppState;
use crate::middleware::rate_limit::{rate_limit_token_endpoint, TokenBucketLimiter};

pub fn router(state: AppState) -> Router<AppState> {
    let token_limiter = TokenBucketLimiter::new();

    let public = Router::new()
        .route("/token", post(auth_handlers::issue_token))
        .layer(from_fn_with_state(token_limiter, rate_limit_token_endpoint))
        .route("/users/", post(auth_handlers::register));

    let authenticated = Router::new()
        .route("/users/me", get(auth_handlers::me))
        .route("/api/upload", post(asset_handlers::upload))
        .route("/api/files", get(asset_handlers::list_files))
        .route("/api/file-info", get(asset_handlers::file_info))
        .route("/api/download-file/:id", get(asset_handlers::download_file))
        .route("/api/delete-file", delete(asset_handlers::delete_file))
        .route("/api/process", post(task_handlers::submit))
        .route("/api/tasks", get(task_handlers::list_tasks))
        .route("/api/task-status/:id", get(task_handlers::task_status))
        .route("/api/tasks/:id", delete(task_handlers::cancel_task))
        .route("/api/capabilities", get(capability_handlers::capabilities))
        .route("/ws/progress/:id", get(ws_handlers::progress_ws))
        .layer(from_fn_with_state(state, auth_middleware));

    public.merge(authenticated)
}
