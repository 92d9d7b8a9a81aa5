//! Error types.
//!
//! Two, deliberately kept apart (§7 of the design doc):
//!
//! - [`ErrCode`] is the stable wire enum returned to clients in an RPC reply. It is never
//!   constructed from [`Error`] directly; each handler maps outcomes to it explicitly.
//! - [`Error`] is this process's internal error type, covering the fatal conditions that
//!   terminate the process (snapshot codec failures, storage initialization failures) and
//!   configuration validation failures raised at startup.

use thiserror::Error;

/// The stable wire values returned to clients. Renaming or reordering these is a breaking
/// change to every client of this service.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ErrCode {
    Ok,
    NoKey,
    WrongLeader,
    InvalidSession,
    InvalidRequestType,
    InvalidPassword,
}

/// Fatal or startup-time errors. Anything reaching `main` as `Err(Error)` is logged and the
/// process exits non-zero; no component is expected to recover from these in-process.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to encode snapshot: {0}")]
    SnapshotEncode(#[from] serde_json::Error),

    #[error("failed to decode snapshot: truncated or malformed blob ({0})")]
    SnapshotDecode(String),

    #[error("storage initialization failed: {0}")]
    StorageInit(#[source] anyhow::Error),

    #[error("consensus module reported a contract violation: {0}")]
    ConsensusContractViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
