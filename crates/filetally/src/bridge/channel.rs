//! Duplex channel pairs between the controller and one worker.
//!
//! Every worker gets two one-directional byte channels:
//! - **inbound**: controller writes `QueryRequest` frames, worker reads them
//! - **outbound**: worker writes `MatchResponse` frames, controller reads them
//!
//! Each side holds only the ends it uses. An end held by the wrong side would
//! keep the channel open after its owner is gone, and the peer would block
//! forever instead of seeing end-of-stream.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::JsonCodec;
use super::protocol::{MatchResponse, QueryRequest};

/// Byte capacity of each in-memory channel.
pub const IN_MEMORY_CAPACITY: usize = 64 * 1024;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub type QueryWriter = FramedWrite<BoxedWriter, JsonCodec<QueryRequest>>;
pub type QueryReader = FramedRead<BoxedReader, JsonCodec<QueryRequest>>;
pub type ResponseWriter = FramedWrite<BoxedWriter, JsonCodec<MatchResponse>>;
pub type ResponseReader = FramedRead<BoxedReader, JsonCodec<MatchResponse>>;

/// Controller side of a channel pair: write end of inbound, read end of outbound.
pub struct ControllerEnds {
    pub inbound: QueryWriter,
    pub outbound: ResponseReader,
}

impl ControllerEnds {
    pub fn from_io<W, R>(inbound: W, outbound: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            inbound: FramedWrite::new(Box::new(inbound), JsonCodec::new()),
            outbound: FramedRead::new(Box::new(outbound), JsonCodec::new()),
        }
    }
}

/// Worker side of a channel pair: read end of inbound, write end of outbound.
pub struct WorkerEnds {
    pub inbound: QueryReader,
    pub outbound: ResponseWriter,
}

impl WorkerEnds {
    pub fn from_io<R, W>(inbound: R, outbound: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inbound: FramedRead::new(Box::new(inbound), JsonCodec::new()),
            outbound: FramedWrite::new(Box::new(outbound), JsonCodec::new()),
        }
    }

    /// Ends for a worker running as a child process: stdin in, stdout out.
    pub fn stdio() -> Self {
        Self::from_io(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Read the next query. `None` means the controller closed the channel.
    pub async fn recv(&mut self) -> Option<std::io::Result<QueryRequest>> {
        self.inbound.next().await
    }

    pub async fn send(&mut self, response: MatchResponse) -> std::io::Result<()> {
        self.outbound.send(response).await
    }
}

/// Create an in-memory channel pair for a task worker.
///
/// Each duplex stream carries a single direction, so the half that direction
/// never uses is dropped here and never handed to either side.
pub fn in_memory_pair(capacity: usize) -> (ControllerEnds, WorkerEnds) {
    let (controller_in, worker_in) = tokio::io::duplex(capacity);
    let (controller_out, worker_out) = tokio::io::duplex(capacity);

    let (_, query_tx) = tokio::io::split(controller_in);
    let (query_rx, _) = tokio::io::split(worker_in);
    let (response_rx, _) = tokio::io::split(controller_out);
    let (_, response_tx) = tokio::io::split(worker_out);

    tracing::trace!(capacity, "Created in-memory channel pair");

    (
        ControllerEnds::from_io(query_tx, response_rx),
        WorkerEnds::from_io(query_rx, response_tx),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::WorkerId;

    #[tokio::test]
    async fn query_and_response_cross_the_pair() {
        let (mut controller, mut worker) = in_memory_pair(IN_MEMORY_CAPACITY);

        controller
            .inbound
            .send(QueryRequest::new("cat"))
            .await
            .unwrap();
        let query = worker.recv().await.unwrap().unwrap();
        assert_eq!(query.text, "cat");

        worker
            .send(MatchResponse::new(WorkerId::new(1), 2))
            .await
            .unwrap();
        let resp = controller.outbound.next().await.unwrap().unwrap();
        assert_eq!(resp, MatchResponse::new(WorkerId::new(1), 2));
    }

    #[tokio::test]
    async fn dropped_worker_is_seen_as_end_of_stream() {
        let (mut controller, worker) = in_memory_pair(IN_MEMORY_CAPACITY);
        drop(worker);

        assert!(controller.outbound.next().await.is_none());
        assert!(
            controller
                .inbound
                .send(QueryRequest::new("cat"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn dropped_controller_is_seen_by_worker() {
        let (controller, mut worker) = in_memory_pair(IN_MEMORY_CAPACITY);
        drop(controller);

        assert!(worker.recv().await.is_none());
    }

    #[tokio::test]
    async fn queued_queries_arrive_in_order() {
        let (mut controller, mut worker) = in_memory_pair(IN_MEMORY_CAPACITY);

        for text in ["one", "two", "three"] {
            controller
                .inbound
                .send(QueryRequest::new(text))
                .await
                .unwrap();
        }

        for expected in ["one", "two", "three"] {
            let query = worker.recv().await.unwrap().unwrap();
            assert_eq!(query.text, expected);
        }
    }
}
