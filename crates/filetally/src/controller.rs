//! Controller - owns the worker pool and drives query rounds.
//!
//! Flow:
//! 1. Validate the file list, then spawn one worker per file (in order)
//! 2. Read a query line, broadcast it to every worker
//! 3. Collect exactly one response per worker, correlate by identity, print
//! 4. Repeat until end of input or interrupt
//! 5. Terminate every worker, wait out the grace period

use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::bridge::protocol::{MatchResponse, QueryRequest, WorkerId};
use crate::pool::{MAX_WORKERS, StartupError, WorkerHandle, WorkerPool, check_files};
use crate::query::Query;
use crate::spawn::{SpawnError, TaskSpawner, WorkerSpawner};

/// Prompt shown before each query when running interactively.
pub const DEFAULT_PROMPT: &str = "Enter a string to search for: ";

/// Process exit status for a rejected file list and for spawn, channel, I/O
/// and shutdown failures.
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Spawning,
    Running,
    ShuttingDown,
    Terminated,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

pub struct ControllerConfig {
    pub max_workers: usize,
    pub shutdown_grace: Duration,
    pub prompt: Option<String>,
    pub spawner: Arc<dyn WorkerSpawner>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_workers: MAX_WORKERS,
            shutdown_grace: Duration::from_secs(1),
            prompt: None,
            spawner: Arc::new(TaskSpawner::new()),
        }
    }
}

impl ControllerConfig {
    /// Lower the worker cap. Values above [`MAX_WORKERS`] are clamped.
    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n.min(MAX_WORKERS);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = spawner;
        self
    }
}

/// A round failed on a worker channel. Fatal to the controller.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to send query to worker {worker} ({}): {source}", file.display())]
    Broadcast {
        worker: WorkerId,
        file: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read response from worker {worker} ({}): {source}", file.display())]
    Read {
        worker: WorkerId,
        file: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("worker {worker} ({}) closed its channel before answering", file.display())]
    Closed { worker: WorkerId, file: PathBuf },

    #[error("response from unknown worker {0}")]
    UnknownWorker(WorkerId),

    #[error("response on the channel of worker {channel} claims to be from worker {claimed}")]
    Misattributed { channel: WorkerId, claimed: WorkerId },
}

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("failed to terminate worker {worker} ({}): {source}", file.display())]
    Terminate {
        worker: WorkerId,
        file: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error("failed to spawn worker for {}: {source}", file.display())]
    Spawn {
        file: PathBuf,
        #[source]
        source: SpawnError,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),

    #[error("failed to read query: {0}")]
    Input(#[source] io::Error),

    #[error("failed to write results: {0}")]
    Output(#[source] io::Error),

    #[error("controller is {actual}, expected {expected}")]
    InvalidState {
        expected: ControllerState,
        actual: ControllerState,
    },
}

impl ControllerError {
    /// Every controller error, including a rejected file list, ends the
    /// process with the same failure status.
    pub fn exit_code(&self) -> u8 {
        EXIT_FAILURE
    }
}

/// One worker's result for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub worker: WorkerId,
    pub file: PathBuf,
    pub count: u64,
}

impl Match {
    /// The console line for this result.
    pub fn render(&self, query: &Query) -> String {
        format!(
            "Child [{}] found {} occurrence(s) of '{}' in {}.",
            self.worker,
            self.count,
            query,
            self.file.display()
        )
    }
}

/// Why the query loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    EndOfInput,
    Interrupted,
}

enum Step {
    Continue,
    EndOfInput,
}

pub struct Controller {
    config: ControllerConfig,
    pool: WorkerPool,
    state: ControllerState,
    /// A round was started and has not completed. Its responses may still be
    /// in flight, so no further round can be trusted.
    round_open: bool,
    shutdown_started: bool,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            pool: WorkerPool::default(),
            state: ControllerState::Idle,
            round_open: false,
            shutdown_started: false,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Worker handles in input-file order.
    pub fn handles(&self) -> &[WorkerHandle] {
        self.pool.handles()
    }

    /// Spawn one worker per file, in order.
    ///
    /// The file list is validated before anything is created. If any spawn
    /// fails, every worker already started is terminated before returning.
    pub fn spawn(&mut self, files: &[PathBuf]) -> Result<(), ControllerError> {
        self.expect_state(ControllerState::Idle)?;
        check_files(files, self.config.max_workers)?;

        self.state = ControllerState::Spawning;
        tracing::info!(workers = files.len(), "Spawning workers");
        self.pool = WorkerPool::with_capacity(files.len());

        for file in files {
            match self.config.spawner.spawn(file) {
                Ok(spawned) => {
                    tracing::debug!(worker = %spawned.id, file = %file.display(), "Worker spawned");
                    self.pool.push(WorkerHandle::new(file.clone(), spawned));
                }
                Err(source) => {
                    tracing::error!(file = %file.display(), error = %source, "Spawn failed, tearing down pool");
                    self.state = ControllerState::ShuttingDown;
                    self.shutdown_started = true;
                    if let Err(e) = self.terminate_all(&mut io::sink()) {
                        tracing::error!(error = %e, "Teardown after spawn failure incomplete");
                    }
                    self.state = ControllerState::Terminated;
                    return Err(ControllerError::Spawn {
                        file: file.clone(),
                        source,
                    });
                }
            }
        }

        self.state = ControllerState::Running;
        tracing::info!(workers = self.pool.len(), "Worker pool ready");
        Ok(())
    }

    /// Read queries from `input` and run one round per non-empty line.
    ///
    /// Returns when input ends or `interrupt` completes, whichever is first.
    /// An interrupt abandons the current round and, like any error, moves the
    /// controller to `ShuttingDown`: no further rounds can run. Does not
    /// terminate the workers; call [`Controller::shutdown`] afterwards.
    pub async fn run_query_loop<R, W, F>(
        &mut self,
        mut input: R,
        out: &mut W,
        interrupt: F,
    ) -> Result<LoopExit, ControllerError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
        F: Future<Output = ()>,
    {
        self.expect_running()?;
        tokio::pin!(interrupt);
        let mut line = String::new();

        loop {
            tokio::select! {
                biased;

                () = &mut interrupt => {
                    tracing::info!(round_open = self.round_open, "Interrupt received");
                    self.state = ControllerState::ShuttingDown;
                    return Ok(LoopExit::Interrupted);
                }

                step = self.step(&mut input, &mut line, out) => {
                    match step {
                        Ok(Step::Continue) => {}
                        Ok(Step::EndOfInput) => {
                            tracing::debug!("End of input");
                            return Ok(LoopExit::EndOfInput);
                        }
                        Err(e) => {
                            self.state = ControllerState::ShuttingDown;
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn step<R, W>(
        &mut self,
        input: &mut R,
        line: &mut String,
        out: &mut W,
    ) -> Result<Step, ControllerError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        if let Some(prompt) = &self.config.prompt {
            write!(out, "{}", prompt)
                .and_then(|()| out.flush())
                .map_err(ControllerError::Output)?;
        }

        line.clear();
        let read = input
            .read_line(line)
            .await
            .map_err(ControllerError::Input)?;
        if read == 0 {
            return Ok(Step::EndOfInput);
        }

        let Some(query) = Query::from_line(line) else {
            tracing::trace!("Empty line, skipping round");
            return Ok(Step::Continue);
        };

        self.round(&query, out).await?;
        Ok(Step::Continue)
    }

    /// Run one round: broadcast `query`, collect one response per worker,
    /// print a line per result.
    ///
    /// Results are returned (and printed) in arrival order. A failed round,
    /// or one whose future is dropped before completing, leaves the controller
    /// unable to run another: stale responses may still be queued.
    pub async fn round<W: Write>(
        &mut self,
        query: &Query,
        out: &mut W,
    ) -> Result<Vec<Match>, ControllerError> {
        self.expect_running()?;
        self.round_open = true;

        match self.run_round(query, out).await {
            Ok(matches) => {
                self.round_open = false;
                Ok(matches)
            }
            Err(e) => {
                tracing::error!(query = %query, error = %e, "Round failed, pool is no longer usable");
                self.state = ControllerState::ShuttingDown;
                Err(e)
            }
        }
    }

    async fn run_round<W: Write>(
        &mut self,
        query: &Query,
        out: &mut W,
    ) -> Result<Vec<Match>, ControllerError> {
        tracing::debug!(query = %query, workers = self.pool.len(), "Starting round");

        self.broadcast(query).await?;
        let responses = self.collect_responses().await?;

        let mut matches = Vec::with_capacity(responses.len());
        for response in responses {
            let handle = self
                .pool
                .resolve(response.worker)
                .ok_or(ChannelError::UnknownWorker(response.worker))?;
            let found = Match {
                worker: handle.id(),
                file: handle.file().to_path_buf(),
                count: response.count,
            };
            writeln!(out, "{}", found.render(query)).map_err(ControllerError::Output)?;
            matches.push(found);
        }
        out.flush().map_err(ControllerError::Output)?;

        Ok(matches)
    }

    /// Send the query to every worker, one after another, in pool order.
    /// Every frame is flushed before this returns.
    async fn broadcast(&mut self, query: &Query) -> Result<(), ChannelError> {
        for handle in self.pool.handles_mut() {
            handle
                .send_query(QueryRequest::new(query.as_str()))
                .await
                .map_err(|source| ChannelError::Broadcast {
                    worker: handle.id(),
                    file: handle.file().to_path_buf(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Wait for exactly one response from every worker, in whatever order they arrive.
    async fn collect_responses(&mut self) -> Result<Vec<MatchResponse>, ChannelError> {
        let mut pending: FuturesUnordered<_> = self
            .pool
            .handles_mut()
            .iter_mut()
            .map(|handle| read_response(handle))
            .collect();

        let mut responses = Vec::with_capacity(pending.len());
        while let Some(result) = pending.next().await {
            responses.push(result?);
        }
        Ok(responses)
    }

    /// Terminate every worker and release the pool.
    ///
    /// Writes one `Shutting down child [<id>]...` line to `out` per attempt.
    /// Safe to call more than once; only the first call does anything. If
    /// any worker could not be terminated the rest are still attempted and
    /// the first failure is returned.
    pub async fn shutdown<W: Write>(&mut self, out: &mut W) -> Result<(), ControllerError> {
        if self.shutdown_started {
            tracing::debug!(state = %self.state, "Shutdown already in progress");
            return Ok(());
        }

        self.shutdown_started = true;
        self.state = ControllerState::ShuttingDown;
        tracing::info!(workers = self.pool.len(), "Shutting down workers");
        let result = self.terminate_all(out);

        if !self.config.shutdown_grace.is_zero() {
            tokio::time::sleep(self.config.shutdown_grace).await;
        }

        self.state = ControllerState::Terminated;
        result.map_err(ControllerError::from)
    }

    fn terminate_all(&mut self, out: &mut dyn Write) -> Result<(), ShutdownError> {
        let mut first_failure = None;

        for mut handle in self.pool.drain() {
            tracing::info!(worker = %handle.id(), file = %handle.file().display(), "Shutting down worker");
            if let Err(e) = writeln!(out, "Shutting down child [{}]...", handle.id()) {
                tracing::warn!(error = %e, "Failed to report worker shutdown");
            }
            if let Err(source) = handle.terminate() {
                tracing::error!(worker = %handle.id(), error = %source, "Worker shutdown failed");
                if first_failure.is_none() {
                    first_failure = Some(ShutdownError::Terminate {
                        worker: handle.id(),
                        file: handle.file().to_path_buf(),
                        source,
                    });
                }
            }
        }

        if let Err(e) = out.flush() {
            tracing::warn!(error = %e, "Failed to flush shutdown report");
        }
        first_failure.map_or(Ok(()), Err)
    }

    /// Like `expect_state(Running)`, but also refuses if a previous round never
    /// completed. That round's responses may still be queued, so the pool is
    /// given up rather than risk reading them as answers to a new query.
    fn expect_running(&mut self) -> Result<(), ControllerError> {
        if self.state == ControllerState::Running && self.round_open {
            tracing::error!("Previous round was abandoned, pool is no longer usable");
            self.state = ControllerState::ShuttingDown;
        }
        self.expect_state(ControllerState::Running)
    }

    fn expect_state(&self, expected: ControllerState) -> Result<(), ControllerError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ControllerError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if !self.pool.is_empty() {
            tracing::warn!(workers = self.pool.len(), "Controller dropped without shutdown");
            if let Err(e) = self.terminate_all(&mut io::sink()) {
                tracing::error!(error = %e, "Failed to terminate workers on drop");
            }
        }
    }
}

async fn read_response(handle: &mut WorkerHandle) -> Result<MatchResponse, ChannelError> {
    let channel = handle.id();
    let response = match handle.recv_response().await {
        Some(Ok(response)) => response,
        Some(Err(source)) => {
            return Err(ChannelError::Read {
                worker: channel,
                file: handle.file().to_path_buf(),
                source,
            });
        }
        None => {
            tracing::warn!(worker = %channel, "Response channel closed (worker crashed?)");
            return Err(ChannelError::Closed {
                worker: channel,
                file: handle.file().to_path_buf(),
            });
        }
    };

    if response.worker != channel {
        return Err(ChannelError::Misattributed {
            channel,
            claimed: response.worker,
        });
    }

    tracing::trace!(worker = %channel, count = response.count, "Response received");
    Ok(response)
}
