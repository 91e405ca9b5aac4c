//! IPC bridge for filetally controller/worker communication.
//!
//! This module provides the wire protocol, codec, and channel plumbing shared
//! by the controller and every worker, whether the worker runs as a task or
//! as a child process.
//!
//! # Architecture
//!
//! - **protocol**: Message types (QueryRequest, MatchResponse, WorkerId)
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite
//! - **channel**: Per-worker duplex channel pairs and their owned ends

pub mod channel;
pub mod codec;
pub mod protocol;
