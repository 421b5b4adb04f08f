//! Orchestration core for the reelqueue transcoding service.
//!
//! This crate has no knowledge of HTTP, SQL, or JWTs — those live in
//! the `server` crate. What's here is capability detection, command
//! synthesis, subprocess execution, progress fan-out, per-user
//! queueing, and the lifecycle state machine that ties them together.

pub mod capability;
pub mod command;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod model;
pub mod queue;
pub mod runner;
pub mod store;

pub use capability::CapabilityProbe;
pub use coordinator::TaskLifecycleCoordinator;
pub use error::{CoreError, CoreResult};
pub use hub::{ProgressFrame, ProgressHub};
pub use queue::{run_dispatcher, QueueSet, TaskRunner};
pub use runner::{ActiveProcessTable, SubprocessRunner};
pub use store::{Filesystem, Store, TaskUpdate};
