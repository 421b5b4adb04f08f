//! Subprocess runner.
//!
//! Spawns the transcoder, reads its stderr for `time=` progress tokens,
//! and enforces the stall timeout: regex-based elapsed-time extraction,
//! tail retention, kill-on-stall, all built around `tokio::select!`
//! rather than raw signal handling, since this runner has no HLS
//! segment bookkeeping to carry along.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A line reader over the child's stderr that decodes lossily instead
/// of failing the whole read on a non-UTF-8 byte sequence —
/// `AsyncBufReadExt::lines` is strict UTF-8 and would turn a single
/// malformed line into an I/O error for the entire task.
struct LossyLineReader {
    inner: BufReader<tokio::process::ChildStderr>,
}

impl LossyLineReader {
    fn new(stderr: tokio::process::ChildStderr) -> Self {
        Self {
            inner: BufReader::new(stderr),
        }
    }

    /// Returns `Ok(None)` at EOF, matching `Lines::next_line`'s contract.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let mut buf = Vec::new();
        let n = self.inner.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}

use crate::error::{CoreError, CoreResult};
use crate::model::TaskId;

const STALL_TIMEOUT: Duration = Duration::from_secs(30);
const TAIL_LINES: usize = 20;
const COALESCE_PROGRESS_STEP: u8 = 10;
const COALESCE_INTERVAL: Duration = Duration::from_secs(3);

static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").unwrap());

/// Something the runner reports to as it consumes stderr: either a
/// numeric progress tick or a plain liveness tick when duration is
/// unknown. Coalesced internally before being handed here. Async
/// because the coordinator's implementation also persists the tick to
/// the store, not just the in-memory hub.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, progress: Option<u8>);
}

/// `task_id -> running child`, so a concurrent `cancel()` can reach in
/// and kill it. The runner installs its own entry on spawn and removes
/// it on every return path, successful or not.
#[derive(Clone, Default)]
pub struct ActiveProcessTable {
    inner: Arc<dashmap::DashMap<TaskId, Arc<Mutex<Child>>>>,
}

impl ActiveProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, task_id: TaskId, child: Arc<Mutex<Child>>) {
        self.inner.insert(task_id, child);
    }

    fn remove(&self, task_id: TaskId) {
        self.inner.remove(&task_id);
    }

    /// Kill the task's subprocess if one is currently registered.
    /// Returns `true` if an entry was found (and a kill attempted).
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        let Some(entry) = self.inner.get(&task_id) else {
            return false;
        };
        let child = entry.clone();
        drop(entry);
        let mut guard = child.lock().await;
        let _ = guard.start_kill();
        true
    }
}

pub struct SubprocessRunner {
    active: ActiveProcessTable,
}

impl SubprocessRunner {
    pub fn new(active: ActiveProcessTable) -> Self {
        Self { active }
    }

    /// Run one transcode. `total_duration <= 0` disables numeric
    /// progress; only liveness ticks (`progress = None`) are
    /// published. On success returns the captured stderr tail for
    /// diagnostics; on any failure the specific [`CoreError`] variant
    /// carries the reason.
    pub async fn run(
        &self,
        task_id: TaskId,
        argv: &[String],
        total_duration: f64,
        sink: &dyn ProgressSink,
    ) -> CoreResult<String> {
        let program = argv.first().cloned().unwrap_or_default();
        let args = argv.get(1..).unwrap_or_default();

        let mut command = Command::new(&program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::TranscoderMissing);
            }
            Err(e) => return Err(CoreError::Io(e)),
        };

        let stderr = child
            .stderr
            .take()
            .expect("stderr was requested as piped");
        let mut lines = LossyLineReader::new(stderr);

        let shared_child = Arc::new(Mutex::new(child));
        self.active.insert(task_id, shared_child.clone());

        let outcome = self
            .read_until_exit(task_id, &mut lines, total_duration, sink, &shared_child)
            .await;

        self.active.remove(task_id);
        outcome
    }

    async fn read_until_exit(
        &self,
        task_id: TaskId,
        lines: &mut LossyLineReader,
        total_duration: f64,
        sink: &dyn ProgressSink,
        shared_child: &Arc<Mutex<Child>>,
    ) -> CoreResult<String> {
        let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
        let mut last_published_progress: Option<u8> = None;
        let mut last_publish_at = Instant::now();

        loop {
            let next_line = tokio::time::timeout(STALL_TIMEOUT, lines.next_line()).await;

            let line = match next_line {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => break, // stderr closed: process is exiting
                Ok(Err(e)) => return Err(CoreError::Io(e)),
                Err(_elapsed) => {
                    warn!(?task_id, "transcoder stalled, killing");
                    let mut guard = shared_child.lock().await;
                    let _ = guard.start_kill();
                    let _ = guard.wait().await;
                    return Err(CoreError::TranscoderStalled {
                        secs: STALL_TIMEOUT.as_secs(),
                    });
                }
            };

            push_tail(&mut tail, line.clone());

            if let Some(elapsed) = parse_elapsed_seconds(&line) {
                let progress = if total_duration > 0.0 {
                    Some(((elapsed / total_duration) * 100.0).floor().min(99.0) as u8)
                } else {
                    None
                };
                maybe_publish(
                    sink,
                    progress,
                    &mut last_published_progress,
                    &mut last_publish_at,
                )
                .await;
            }
        }

        let status = {
            let mut guard = shared_child.lock().await;
            guard.wait().await.map_err(CoreError::Io)?
        };

        let tail_text = tail.into_iter().collect::<Vec<_>>().join("\n");

        if status.success() {
            debug!(?task_id, "transcoder exited cleanly");
            Ok(tail_text)
        } else if status.code().is_none() {
            // No exit code means it was killed by a signal — only our
            // own cancel path does that (the stall path already
            // returned above).
            Err(CoreError::Cancelled)
        } else {
            Err(CoreError::TranscoderFailed { tail: tail_text })
        }
    }
}

fn push_tail(tail: &mut VecDeque<String>, line: String) {
    if tail.len() == TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

async fn maybe_publish(
    sink: &dyn ProgressSink,
    progress: Option<u8>,
    last_published_progress: &mut Option<u8>,
    last_publish_at: &mut Instant,
) {
    let now = Instant::now();
    let elapsed_since_publish = now.duration_since(*last_publish_at);

    let should_publish = match (progress, *last_published_progress) {
        (Some(p), Some(last)) => {
            p >= last.saturating_add(COALESCE_PROGRESS_STEP) || elapsed_since_publish >= COALESCE_INTERVAL
        }
        (Some(_), None) => true,
        (None, _) => elapsed_since_publish >= COALESCE_INTERVAL,
    };

    if should_publish {
        sink.publish(progress).await;
        if let Some(p) = progress {
            *last_published_progress = Some(p);
        }
        *last_publish_at = now;
    }
}

/// Parse `time=H:M:S.cc` with arbitrary-digit hours/minutes; no
/// assumption of zero-padded widths.
fn parse_elapsed_seconds(line: &str) -> Option<f64> {
    let caps = TIME_RE.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
