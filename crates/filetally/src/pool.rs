//! Worker pool: the ordered table of worker handles owned by the controller.
//!
//! The pool is sized once from the input file list and never grows or
//! shrinks except when it is drained at shutdown.

use std::io;
use std::path::{Path, PathBuf};

use futures::{SinkExt, StreamExt};

use crate::bridge::channel::ControllerEnds;
use crate::bridge::protocol::{MatchResponse, QueryRequest, WorkerId};
use crate::spawn::{SpawnedWorker, WorkerLifecycle};

/// Hard upper bound on the number of workers (and therefore input files).
pub const MAX_WORKERS: usize = 10;

/// Problems with the file list, detected before anything is spawned.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Pass file name(s) as arguments.")]
    NoFiles,

    #[error("No more than {cap} files can be processed (got {given}).")]
    TooManyFiles { given: usize, cap: usize },

    #[error("File '{}' does not exist.", .0.display())]
    MissingFile(PathBuf),
}

/// Validate a file list against the pool cap and the filesystem.
pub fn check_files(files: &[PathBuf], cap: usize) -> Result<(), StartupError> {
    if files.is_empty() {
        return Err(StartupError::NoFiles);
    }

    let cap = cap.min(MAX_WORKERS);
    if files.len() > cap {
        return Err(StartupError::TooManyFiles {
            given: files.len(),
            cap,
        });
    }

    if let Some(missing) = files
        .iter()
        .find(|file| !matches!(file.try_exists(), Ok(true)))
    {
        return Err(StartupError::MissingFile(missing.clone()));
    }

    Ok(())
}

/// Controller-side record of one running worker.
pub struct WorkerHandle {
    id: WorkerId,
    file: PathBuf,
    ends: ControllerEnds,
    lifecycle: Box<dyn WorkerLifecycle>,
}

impl WorkerHandle {
    pub fn new(file: PathBuf, spawned: SpawnedWorker) -> Self {
        Self {
            id: spawned.id,
            file,
            ends: spawned.ends,
            lifecycle: spawned.lifecycle,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Write one query frame and flush it.
    pub(crate) async fn send_query(&mut self, query: QueryRequest) -> io::Result<()> {
        self.ends.inbound.send(query).await
    }

    /// Read one response frame. `None` means the worker's channel closed.
    pub(crate) async fn recv_response(&mut self) -> Option<io::Result<MatchResponse>> {
        self.ends.outbound.next().await
    }

    pub(crate) fn terminate(&mut self) -> io::Result<()> {
        self.lifecycle.terminate()
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("file", &self.file)
            .finish_non_exhaustive()
    }
}

/// Ordered worker handles, one per input file, in input order.
#[derive(Debug, Default)]
pub struct WorkerPool {
    handles: Vec<WorkerHandle>,
}

impl WorkerPool {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            handles: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, handle: WorkerHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[WorkerHandle] {
        &self.handles
    }

    pub(crate) fn handles_mut(&mut self) -> &mut [WorkerHandle] {
        &mut self.handles
    }

    /// Find the handle for a worker identity.
    ///
    /// Linear scan: pools are at most [`MAX_WORKERS`] long.
    pub fn resolve(&self, id: WorkerId) -> Option<&WorkerHandle> {
        self.handles.iter().find(|handle| handle.id == id)
    }

    /// Remove every handle, in order. Dropping a handle releases its channel ends.
    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, WorkerHandle> {
        self.handles.drain(..)
    }
}
