//! Worker side of the query protocol.
//!
//! A worker answers queries for one file until something external stops it.
//! The same loop runs inside a tokio task (task mode) or as the body of a
//! child process speaking over stdin/stdout (process mode). The controller
//! side is in controller.rs.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bridge::channel::WorkerEnds;
use crate::bridge::protocol::{MatchResponse, WorkerId};
use crate::search::{self, SearchError};

/// Exit status of a worker process that lost its channel.
pub const EXIT_CHANNEL_FAILED: u8 = 1;
/// Exit status of a worker process whose file could not be searched.
pub const EXIT_SEARCH_FAILED: u8 = 3;

/// Why a worker stopped. Workers never stop on their own, so every exit is one of these.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("controller closed the query channel")]
    Disconnected,

    #[error("channel failure: {0}")]
    Channel(#[from] std::io::Error),

    /// The file could not be searched; no count is reported for it.
    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("search task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl WorkerError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Search(_) => EXIT_SEARCH_FAILED,
            _ => EXIT_CHANNEL_FAILED,
        }
    }
}

/// Run the worker loop: read a query, count it in `file`, answer with identity and count.
///
/// Only returns on failure.
pub async fn run_worker(
    id: WorkerId,
    file: PathBuf,
    mut ends: WorkerEnds,
) -> Result<Infallible, WorkerError> {
    let file: Arc<Path> = Arc::from(file);
    tracing::debug!(worker = %id, file = %file.display(), "Worker started");

    loop {
        let query = match ends.recv().await {
            Some(Ok(query)) => query,
            Some(Err(e)) => {
                tracing::error!(worker = %id, error = %e, "Query channel error");
                return Err(WorkerError::Channel(e));
            }
            None => {
                tracing::debug!(worker = %id, "Query channel closed (controller gone?), exiting");
                return Err(WorkerError::Disconnected);
            }
        };

        tracing::debug!(
            worker = %id,
            query = %query.text,
            file = %file.display(),
            "Searching"
        );

        let count = match search_file(Arc::clone(&file), query.text).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(worker = %id, error = %e, "Search failed, worker exiting");
                return Err(e);
            }
        };

        ends.send(MatchResponse::new(id, count)).await?;
        tracing::trace!(worker = %id, count, "Response sent");
    }
}

/// Entry point for a worker child process.
///
/// Identity is this process's pid; the channel pair is stdin/stdout. Returns
/// the error that ended the loop so the caller can pick an exit status.
pub async fn run_stdio_worker(file: PathBuf) -> WorkerError {
    let id = WorkerId::current_process();
    match run_worker(id, file, WorkerEnds::stdio()).await {
        Ok(never) => match never {},
        Err(e) => e,
    }
}

async fn search_file(file: Arc<Path>, token: String) -> Result<u64, WorkerError> {
    let count = tokio::task::spawn_blocking(move || search::count_token(&file, &token)).await??;
    Ok(count)
}
