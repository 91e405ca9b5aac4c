//! filetally: count whole-token occurrences of interactive queries across a
//! fixed set of files, one worker per file.

pub mod bridge;
pub mod controller;
pub mod pool;
pub mod query;
pub mod search;
pub mod spawn;
pub mod worker;

pub use controller::{
    ChannelError, Controller, ControllerConfig, ControllerError, ControllerState, DEFAULT_PROMPT,
    LoopExit, Match, ShutdownError,
};
pub use pool::{MAX_WORKERS, StartupError, WorkerHandle};
pub use query::Query;
pub use spawn::{ProcessSpawner, SpawnError, TaskSpawner, WorkerSpawner};
pub use worker::{WorkerError, run_stdio_worker, run_worker};
