use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::infra::app_state::AppState;

/// Upgrades to a WebSocket and forwards progress frames for one task
/// until it reaches a terminal state or the client disconnects. The
/// bearer token is validated by `auth_middleware` same as every other
/// `/api` route; ownership of the task itself is re-checked here since
/// a task id is otherwise guessable and the socket carries no further
/// credential of its own.
pub async fn progress_ws(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(task_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let task = state
        .store
        .get_task(task_id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    if task.owner_id != owner_id {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(ws.on_upgrade(move |socket| forward_progress(socket, state, task_id)))
}

async fn forward_progress(mut socket: WebSocket, state: AppState, task_id: Uuid) {
    let mut rx = state.hub.attach(task_id);

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let is_terminal = frame.is_terminal();
                let payload = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(_) => break,
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
                if is_terminal {
                    break;
                }
            }
            incoming = socket.recv() => {
                if incoming.is_none() {
                    break;
                }
            }
        }
    }

    state.hub.detach(task_id);
    let _ = socket.send(Message::Close(None)).await;
}
