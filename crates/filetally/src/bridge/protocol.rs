//! Wire protocol types for controller/worker communication.
//!
//! One channel pair per worker:
//! - **Inbound** (controller → worker): `QueryRequest`
//! - **Outbound** (worker → controller): `MatchResponse`

use serde::{Deserialize, Serialize};

/// Opaque identity of a worker.
///
/// Process workers use their OS process id; task workers get a number from
/// the spawner. The controller never interprets the value beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(u32);

impl WorkerId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Identity of the current OS process.
    pub fn current_process() -> Self {
        Self(std::process::id())
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A query broadcast to every worker at the start of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub text: String,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A worker's answer for one round: who answered, and how many matches.
///
/// Identity always travels with the count so the controller can correlate
/// regardless of arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResponse {
    pub worker: WorkerId,
    pub count: u64,
}

impl MatchResponse {
    pub fn new(worker: WorkerId, count: u64) -> Self {
        Self { worker, count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_request_serializes() {
        insta::assert_json_snapshot!(QueryRequest::new("dog"), @r###"
        {
          "text": "dog"
        }
        "###);
    }

    #[test]
    fn match_response_serializes() {
        let resp = MatchResponse::new(WorkerId::new(4242), 3);
        insta::assert_json_snapshot!(resp, @r###"
        {
          "worker": 4242,
          "count": 3
        }
        "###);
    }

    #[test]
    fn worker_id_is_transparent() {
        let json = serde_json::to_string(&WorkerId::new(17)).unwrap();
        assert_eq!(json, "17");

        let parsed: WorkerId = serde_json::from_str("17").unwrap();
        assert_eq!(parsed, WorkerId::new(17));
    }

    #[test]
    fn response_rejects_missing_identity() {
        let parsed = serde_json::from_str::<MatchResponse>(r#"{"count": 3}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn worker_id_displays_raw_value() {
        assert_eq!(WorkerId::new(981).to_string(), "981");
    }
}
