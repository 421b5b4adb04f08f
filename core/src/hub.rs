//! Progress hub.
//!
//! A `task_id -> observer` map with attach/detach/publish, guarding a
//! `DashMap` of live connections, scoped to one observer per task (a
//! task has exactly one WS client watching it) rather than a
//! many-per-room model.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::model::{TaskId, TaskStatus};

/// One frame pushed to an attached observer.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressFrame {
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ProgressFrame {
    pub fn tick(progress: u8) -> Self {
        Self {
            progress,
            status: None,
            details: None,
        }
    }

    pub fn terminal(progress: u8, status: TaskStatus, details: Option<String>) -> Self {
        Self {
            progress,
            status: Some(status),
            details,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.map(TaskStatus::is_terminal).unwrap_or(false)
    }
}

const OBSERVER_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone, Default)]
pub struct ProgressHub {
    observers: Arc<DashMap<TaskId, mpsc::Sender<ProgressFrame>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer channel, returning the receiving half.
    /// A pre-existing observer for the same task is displaced: its
    /// sender is dropped, which closes its receiver.
    pub fn attach(&self, task_id: TaskId) -> mpsc::Receiver<ProgressFrame> {
        let (tx, rx) = mpsc::channel(OBSERVER_CHANNEL_CAPACITY);
        self.observers.insert(task_id, tx);
        rx
    }

    pub fn detach(&self, task_id: TaskId) {
        self.observers.remove(&task_id);
    }

    /// Non-blocking for progress ticks: a full or missing channel just
    /// drops the update, since the next tick supersedes it. Terminal
    /// frames are sent synchronously so they are never lost, then the
    /// observer is detached.
    pub async fn publish(&self, task_id: TaskId, frame: ProgressFrame) {
        let is_terminal = frame.is_terminal();

        if is_terminal {
            if let Some((_, tx)) = self.observers.remove(&task_id) {
                // A full channel here still must not lose the
                // terminal frame; block briefly rather than drop it.
                let _ = tx.send(frame).await;
            }
            return;
        }

        if let Some(tx) = self.observers.get(&task_id) {
            let _ = tx.try_send(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn publish_without_observer_is_a_silent_noop() {
        let hub = ProgressHub::new();
        hub.publish(Uuid::new_v4(), ProgressFrame::tick(5)).await;
    }

    #[tokio::test]
    async fn attach_then_publish_delivers_frame() {
        let hub = ProgressHub::new();
        let task_id = Uuid::new_v4();
        let mut rx = hub.attach(task_id);

        hub.publish(task_id, ProgressFrame::tick(10)).await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.progress, 10);
    }

    #[tokio::test]
    async fn second_attach_displaces_first() {
        let hub = ProgressHub::new();
        let task_id = Uuid::new_v4();
        let mut first_rx = hub.attach(task_id);
        let mut second_rx = hub.attach(task_id);

        hub.publish(task_id, ProgressFrame::tick(20)).await;
        assert!(first_rx.recv().await.is_none());
        assert_eq!(second_rx.recv().await.unwrap().progress, 20);
    }

    #[tokio::test]
    async fn terminal_frame_is_delivered_then_detaches() {
        let hub = ProgressHub::new();
        let task_id = Uuid::new_v4();
        let mut rx = hub.attach(task_id);

        hub.publish(
            task_id,
            ProgressFrame::terminal(100, TaskStatus::Completed, None),
        )
        .await;

        let frame = rx.recv().await.unwrap();
        assert!(frame.is_terminal());
        assert!(rx.recv().await.is_none());

        // A repeat detach (coordinator's own cleanup path) is a no-op.
        hub.detach(task_id);
    }
}
