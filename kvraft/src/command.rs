//! The command payload submitted to consensus, and the outcomes produced by applying it.

use serde::Deserialize;
use serde::Serialize;

/// The kind of operation carried by a [`Command`].
///
/// This is also the wire-level `type` field of the three RPCs (§6 of the design doc): a
/// request's `type` is checked against the operation the handler expects (e.g. `Get` only
/// accepts `OpType::Get`) before anything is ever submitted to consensus.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum OpType {
    OpenSession,
    Get,
    Put,
    Append,
    Delete,
}

/// A fresh, opaque identifier attached only to `OpenSession` commands so that the resulting
/// session id is unguessable. Generated by the coordinator at submission time, never by a client.
pub type Nonce = String;

/// The sole payload type submitted to the consensus log.
///
/// `Command` implements [`async_raft::AppData`] (directly, or via the reference backend's
/// equivalent bound) and must therefore be `Clone + Debug + Send + Sync + Serialize +
/// DeserializeOwned + 'static`, which is why every field here is itself cheaply cloneable.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub op: OpType,
    pub key: String,
    pub value: String,
    /// Only meaningful when `op == OpenSession`; empty otherwise.
    pub nonce: Nonce,
}

impl Command {
    pub fn open_session(nonce: Nonce) -> Self {
        Self {
            op: OpType::OpenSession,
            key: String::new(),
            value: String::new(),
            nonce,
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self {
            op: OpType::Get,
            key: key.into(),
            value: String::new(),
            nonce: String::new(),
        }
    }

    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            op: OpType::Put,
            key: key.into(),
            value: value.into(),
            nonce: String::new(),
        }
    }

    pub fn append(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            op: OpType::Append,
            key: key.into(),
            value: value.into(),
            nonce: String::new(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            op: OpType::Delete,
            key: key.into(),
            value: String::new(),
            nonce: String::new(),
        }
    }
}

/// The result of applying one committed `Command` to the state machine.
///
/// `term` is filled in by the apply pump from the entry's consensus term, not by the state
/// machine itself — the state machine only ever sees `sessionId` as its own contribution.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub term: u64,
    /// Populated only for an applied `OpenSession`.
    pub session_id: Option<String>,
}
