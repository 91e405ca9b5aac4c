//! Worker spawn strategies.
//!
//! A spawner creates the channel pair for one file, starts a worker bound to
//! the worker ends, and hands back the controller ends plus a way to
//! terminate the worker.
//!
//! - [`TaskSpawner`]: worker runs as a tokio task over in-memory channels
//! - [`ProcessSpawner`]: worker runs as a child process over stdin/stdout pipes

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::bridge::channel::{ControllerEnds, IN_MEMORY_CAPACITY, in_memory_pair};
use crate::bridge::protocol::WorkerId;
use crate::worker::{WorkerError, run_worker};

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] io::Error),
    #[error("channel setup failed: {0}")]
    Channel(String),
    #[error("spawn failed: {0}")]
    Other(String),
}

/// Forced termination of one running worker.
pub trait WorkerLifecycle: Send {
    /// Stop the worker without waiting for it. An error means the worker may
    /// still be alive.
    fn terminate(&mut self) -> io::Result<()>;
}

/// A freshly started worker, as seen from the controller.
pub struct SpawnedWorker {
    pub id: WorkerId,
    pub ends: ControllerEnds,
    pub lifecycle: Box<dyn WorkerLifecycle>,
}

/// Extension point for different worker spawn strategies.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, file: &Path) -> Result<SpawnedWorker, SpawnError>;
}

/// Runs each worker as a tokio task. Must be called from inside a runtime.
pub struct TaskSpawner {
    next_id: AtomicU32,
    capacity: usize,
}

impl Default for TaskSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSpawner {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            capacity: IN_MEMORY_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

impl WorkerSpawner for TaskSpawner {
    fn spawn(&self, file: &Path) -> Result<SpawnedWorker, SpawnError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SpawnError::Other(format!("no tokio runtime: {}", e)))?;

        let id = WorkerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (controller, worker) = in_memory_pair(self.capacity);
        let file = file.to_path_buf();

        let task = runtime.spawn(async move {
            match run_worker(id, file, worker).await {
                Ok(never) => match never {},
                Err(WorkerError::Disconnected) => {
                    tracing::debug!(worker = %id, "Worker task finished");
                }
                Err(e) => {
                    tracing::error!(
                        worker = %id,
                        error = %e,
                        status = e.exit_code(),
                        "Worker task failed"
                    );
                }
            }
        });

        tracing::debug!(worker = %id, "Spawned worker task");
        Ok(SpawnedWorker {
            id,
            ends: controller,
            lifecycle: Box::new(TaskLifecycle { task }),
        })
    }
}

struct TaskLifecycle {
    task: JoinHandle<()>,
}

impl WorkerLifecycle for TaskLifecycle {
    fn terminate(&mut self) -> io::Result<()> {
        self.task.abort();
        Ok(())
    }
}

/// Runs each worker as a child process: `<program> <args>... <file>`.
///
/// The child must speak the framed protocol on stdin/stdout, which is what
/// [`crate::worker::run_stdio_worker`] does. Its stderr is inherited.
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Spawn workers by re-executing the running binary.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, file: &Path) -> Result<SpawnedWorker, SpawnError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(file)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let (Some(pid), Some(stdin), Some(stdout)) =
            (child.id(), child.stdin.take(), child.stdout.take())
        else {
            // Don't leave a half-wired child behind.
            if let Err(e) = child.start_kill() {
                tracing::warn!(program = %self.program.display(), error = %e, "Failed to kill half-started worker process");
            }
            return Err(SpawnError::Channel(
                "worker process pipes not captured".to_string(),
            ));
        };

        tracing::debug!(pid, program = %self.program.display(), "Spawned worker process");
        Ok(SpawnedWorker {
            id: WorkerId::new(pid),
            ends: ControllerEnds::from_io(stdin, stdout),
            lifecycle: Box::new(ProcessLifecycle { pid, child }),
        })
    }
}

struct ProcessLifecycle {
    #[cfg_attr(not(unix), allow(dead_code))]
    pid: u32,
    #[cfg_attr(unix, allow(dead_code))]
    child: Child,
}

impl WorkerLifecycle for ProcessLifecycle {
    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let pid = i32::try_from(self.pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        kill(Pid::from_raw(pid), Signal::SIGKILL)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}
