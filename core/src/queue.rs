//! Per-user queues and the fair round-robin dispatcher.
//!
//! A single long-running task reacting to channel traffic, backed by a
//! `HashMap<owner_id, VecDeque<_>>` — a guarded mapping instead of a
//! priority heap, since cross-user priority is explicitly out of scope
//! here: every user gets fair round-robin service, never preferential
//! ordering.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::model::{TaskId, UserId};

const DISPATCH_IDLE_SLEEP: Duration = Duration::from_millis(50);

/// Invoked by the dispatcher for each task it pops off a user's queue.
/// Implemented by the task lifecycle coordinator (C6); the dispatcher
/// itself knows nothing about argv, stores, or the runner.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, owner_id: UserId, task_id: TaskId);
}

struct Inner {
    queues: HashMap<UserId, VecDeque<TaskId>>,
    /// Reverse index so `cancel(task_id)` doesn't have to scan every
    /// user's queue to find where a task lives.
    location: HashMap<TaskId, UserId>,
}

impl Inner {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            location: HashMap::new(),
        }
    }
}

/// The in-memory queue set. Cheaply cloneable; all clones share the
/// same guarded state.
#[derive(Clone)]
pub struct QueueSet {
    inner: Arc<Mutex<Inner>>,
}

impl Default for QueueSet {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueSet {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
        }
    }

    /// Append to the user's queue, creating it on first use. Never
    /// blocks on I/O; the lock's critical section is O(1).
    pub fn enqueue(&self, owner_id: UserId, task_id: TaskId) {
        let mut inner = self.inner.lock();
        inner.queues.entry(owner_id).or_default().push_back(task_id);
        inner.location.insert(task_id, owner_id);
    }

    /// Remove a task from its owner's queue if it is still waiting
    /// there. Returns `true` if it was found and removed; `false`
    /// means it is already running (or unknown to the queue set), in
    /// which case the caller must fall back to signalling the runner.
    pub fn cancel_if_queued(&self, task_id: TaskId) -> bool {
        let mut inner = self.inner.lock();
        let Some(owner_id) = inner.location.get(&task_id).copied() else {
            return false;
        };
        let Some(queue) = inner.queues.get_mut(&owner_id) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|id| *id != task_id);
        let removed = queue.len() != before;
        if removed {
            inner.location.remove(&task_id);
        }
        removed
    }

    /// Snapshot the owners with non-empty queues, then pop at most one
    /// task per owner in snapshot order. Used by the dispatcher; split
    /// out for unit testing the fairness property without spinning up
    /// the whole loop.
    fn dispatch_round(&self) -> Vec<(UserId, TaskId)> {
        let mut inner = self.inner.lock();
        let owners: Vec<UserId> = inner
            .queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(owner, _)| *owner)
            .collect();

        let mut round = Vec::with_capacity(owners.len());
        for owner in owners {
            if let Some(queue) = inner.queues.get_mut(&owner) {
                if let Some(task_id) = queue.pop_front() {
                    inner.location.remove(&task_id);
                    round.push((owner, task_id));
                }
            }
        }
        round
    }
}

/// Runs the dispatcher loop until `shutdown` resolves. Each pass visits
/// every user with a non-empty queue exactly once, running that user's
/// head-of-line task to completion before moving to the next user —
/// fair round-robin, one task at a time process-wide.
pub async fn run_dispatcher(
    queues: QueueSet,
    runner: Arc<dyn TaskRunner>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    info!("dispatcher loop starting");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let round = queues.dispatch_round();
        if round.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(DISPATCH_IDLE_SLEEP) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        }

        for (owner_id, task_id) in round {
            debug!(%owner_id, %task_id, "dispatching task");
            runner.run_task(owner_id, task_id).await;
        }

        tokio::task::yield_now().await;
    }
    info!("dispatcher loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn enqueue_then_cancel_removes_task() {
        let queues = QueueSet::new();
        let owner = Uuid::new_v4();
        let task = Uuid::new_v4();
        queues.enqueue(owner, task);
        assert!(queues.cancel_if_queued(task));
        assert!(!queues.cancel_if_queued(task));
    }

    #[test]
    fn dispatch_round_visits_each_user_once() {
        let queues = QueueSet::new();
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();

        for _ in 0..5 {
            queues.enqueue(user_a, Uuid::new_v4());
        }
        queues.enqueue(user_b, Uuid::new_v4());

        let round = queues.dispatch_round();
        assert_eq!(round.len(), 2);
        let owners: Vec<UserId> = round.iter().map(|(o, _)| *o).collect();
        assert!(owners.contains(&user_a));
        assert!(owners.contains(&user_b));

        // B's single task started in the very first round alongside
        // A's first — fairness even though A has a much longer
        // backlog.
        let second_round = queues.dispatch_round();
        assert_eq!(second_round.len(), 1);
        assert_eq!(second_round[0].0, user_a);
    }

    #[test]
    fn cancel_on_unknown_task_is_false() {
        let queues = QueueSet::new();
        assert!(!queues.cancel_if_queued(Uuid::new_v4()));
    }
}
