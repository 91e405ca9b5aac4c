//! Framed codec for controller/worker channels.
//!
//! Uses LengthDelimitedCodec for framing + serde_json for serialization.
//! Works over any AsyncRead/AsyncWrite (pipes, in-memory duplex streams).

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Largest frame either side will accept.
///
/// A query is at most 1024 bytes, but JSON escaping of control characters can
/// grow it up to six-fold.
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

/// Codec that frames messages with a 4-byte length prefix and serializes with JSON.
pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self::with_max_frame_length(MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_length(max: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(max)
                .new_codec(),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                let item = serde_json::from_slice(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(json_size_bytes = json.len(), "Encoding frame");
        self.inner.encode(Bytes::from(json), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{MatchResponse, QueryRequest, WorkerId};

    #[test]
    fn query_frame_is_length_prefixed_json() {
        let mut codec = JsonCodec::<QueryRequest>::new();
        let mut buf = BytesMut::new();

        codec.encode(QueryRequest::new("dog"), &mut buf).unwrap();

        let body = br#"{"text":"dog"}"#;
        assert_eq!(&buf[..4], &(body.len() as u32).to_be_bytes());
        assert_eq!(&buf[4..], body);
    }

    #[test]
    fn decode_waits_for_complete_frame() {
        let mut encoder = JsonCodec::<MatchResponse>::new();
        let mut full = BytesMut::new();
        encoder
            .encode(MatchResponse::new(WorkerId::new(7), 3), &mut full)
            .unwrap();

        let mut decoder = JsonCodec::<MatchResponse>::new();
        let mut partial = BytesMut::from(&full[..full.len() - 2]);
        assert!(decoder.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 2..]);
        let decoded = decoder.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.worker, WorkerId::new(7));
        assert_eq!(decoded.count, 3);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut encoder = JsonCodec::<QueryRequest>::with_max_frame_length(usize::MAX);
        let mut buf = BytesMut::new();
        encoder
            .encode(QueryRequest::new("x".repeat(MAX_FRAME_BYTES)), &mut buf)
            .unwrap();

        let mut decoder = JsonCodec::<QueryRequest>::new();
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn garbage_body_is_invalid_data() {
        let mut decoder = JsonCodec::<MatchResponse>::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.extend_from_slice(b"nope!");

        let err = decoder.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
