//! The consensus module contract consumed by the RSM layer (§6 of the design doc, "Consumed
//! consensus interface"). This is deliberately the only point of contact between the request
//! coordinator / apply pump and whatever is doing leader election and log replication — see
//! SPEC_FULL.md §4.5 for the reference backends that implement it.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::command::Command;

/// What `start` reports back to the caller, immediately, before the command is committed.
#[derive(Clone, Copy, Debug)]
pub struct StartResult {
    pub index: u64,
    pub term: u64,
    pub is_leader: bool,
}

/// A single message delivered by the apply stream, in commit order.
#[derive(Clone, Debug)]
pub enum ApplyMsg {
    /// A committed command entry, ready to be applied to the state machine.
    Command { index: u64, term: u64, command: Command },
    /// A snapshot installed out of band (e.g. sent to a lagging follower); the state machine
    /// should be replaced wholesale rather than have this entry applied incrementally.
    Snapshot { index: u64, bytes: Vec<u8> },
}

/// The contract the replicated state machine depends on.
///
/// Implementors must guarantee: `start` never blocks on commitment, `subscribe` delivers
/// `ApplyMsg::Command` entries in strictly increasing `index` order starting at 1 (or at the
/// index following the most recently applied snapshot), and a displaced pending request is
/// never silently dropped — it is the *coordinator's* job to notice the displacement (by term
/// mismatch), not the consensus module's, but the module must still eventually apply something
/// at every index it assigned.
#[async_trait]
pub trait ConsensusModule: Send + Sync + 'static {
    /// Non-blocking submission. `is_leader = false` means the caller must not wait: no entry
    /// was appended on this node's behalf, and `index`/`term` are meaningless.
    async fn start(&self, command: Command) -> StartResult;

    /// A cheap leadership probe, distinct from `start` so that a Get/Update pre-check doesn't
    /// pay the cost of a submission just to learn "not leader" (§4.1).
    async fn get_state(&self) -> (u64, bool);

    /// Inform the consensus log that entries up through `last_included_index` may be discarded,
    /// now that `bytes` captures the equivalent state machine as of that index.
    async fn snapshot(&self, last_included_index: u64, bytes: Vec<u8>);

    /// Subscribe to the apply stream. The apply pump is expected to subscribe exactly once, at
    /// startup, and to be the sole consumer (§4.2: "the apply pump is the sole writer").
    fn subscribe(&self) -> broadcast::Receiver<ApplyMsg>;
}

pub mod local;

#[cfg(feature = "async-raft-backend")]
pub mod raft_adapter;
