//! The single coordinator lock's payload (§5: "Mutual exclusion").
//!
//! Everything the design doc lists as living behind the coordinator lock — `tab`,
//! `commitIndex`, `uniqueId` (all three inside [`StateMachine`]), `sessionMap`, `replyChan`
//! (the pending-slot registry), and `nextSnapshotIndex` — is gathered into this one struct so
//! that there is exactly one `tokio::sync::Mutex` in the whole crate guarding them, rather than
//! several locks whose relative ordering would need to be reasoned about.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::command::ApplyResult;
use crate::session::SessionRegistry;
use crate::state_machine::StateMachine;

pub(crate) struct PendingSlot {
    pub(crate) tx: oneshot::Sender<ApplyResult>,
}

pub struct Shared {
    pub(crate) state_machine: StateMachine,
    pub(crate) sessions: SessionRegistry,
    pub(crate) pending: HashMap<u64, PendingSlot>,
    /// `None` when snapshotting is disabled; `Some(next_threshold)` otherwise (§4.4's
    /// `disabled` / `armed(nextIdx)` states).
    pub(crate) next_snapshot_index: Option<u64>,
}

impl Shared {
    pub fn new(state_machine: StateMachine, next_snapshot_index: Option<u64>) -> Self {
        Self {
            state_machine,
            sessions: SessionRegistry::new(),
            pending: HashMap::new(),
            next_snapshot_index,
        }
    }

    /// Install a fresh pending slot at `index`, displacing and notifying any prior waiter first
    /// (§3 invariant 3, §4.1 step 2). `term` is the *new* submission's own observed term — it is
    /// reused as the displacement sentinel, which is what guarantees the displaced waiter's own
    /// term comparison (done by its own coordinator task, against the term *it* observed at
    /// submission) fails, since that would require the new and old submissions to share a term,
    /// which a correct consensus module never assigns twice at the same index.
    pub(crate) fn install_pending(&mut self, index: u64, term: u64) -> oneshot::Receiver<ApplyResult> {
        let (tx, rx) = oneshot::channel();
        if let Some(old) = self.pending.remove(&index) {
            let _ = old.tx.send(ApplyResult { term, session_id: None });
        }
        self.pending.insert(index, PendingSlot { tx });
        rx
    }

    /// Deliver an apply outcome to whatever pending slot exists at `index`, if any (§4.2).
    pub(crate) fn deliver(&mut self, index: u64, outcome: ApplyResult) {
        if let Some(slot) = self.pending.remove(&index) {
            let _ = slot.tx.send(outcome);
        }
    }
}
