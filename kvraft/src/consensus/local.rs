//! A single-node, in-process reference implementation of [`ConsensusModule`].
//!
//! This is **not** a consensus protocol: there is no election and no replication, because there
//! is only ever one node. It exists so that the demo binary and the test harness (§4.8) have a
//! trivial, deterministic backend to drive the request coordinator, apply pump, session
//! registry, and snapshot manager against — the components that are actually the subject of
//! this crate. A handful of test-only methods let the scenarios of §8 that require a leader
//! change simulate one without standing up a second node.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

use crate::command::Command;
use crate::consensus::ApplyMsg;
use crate::consensus::ConsensusModule;
use crate::consensus::StartResult;

struct Inner {
    term: u64,
    is_leader: bool,
    next_index: u64,
    auto_apply: bool,
}

/// See the module-level docs.
pub struct LocalConsensus {
    inner: Mutex<Inner>,
    apply_tx: broadcast::Sender<ApplyMsg>,
}

impl LocalConsensus {
    /// Construct a fresh, pristine node that starts out as its own cluster's leader in term 1.
    pub fn new() -> Self {
        let (apply_tx, _rx) = broadcast::channel(1024);
        Self {
            inner: Mutex::new(Inner {
                term: 1,
                is_leader: true,
                next_index: 1,
                auto_apply: true,
            }),
            apply_tx,
        }
    }

    /// Restore to a given `(commit_index, term)`, as a node would after a restart with an
    /// existing snapshot (§4.4): the next command submitted must be assigned an index strictly
    /// greater than everything the snapshot already covers.
    pub fn new_from_snapshot(commit_index: u64, term: u64) -> Self {
        let (apply_tx, _rx) = broadcast::channel(1024);
        Self {
            inner: Mutex::new(Inner {
                term: term.max(1),
                is_leader: true,
                next_index: commit_index + 1,
                auto_apply: true,
            }),
            apply_tx,
        }
    }

    /// Test-only: demote this node so that subsequent `start` calls report `is_leader = false`.
    pub async fn step_down(&self) {
        self.inner.lock().await.is_leader = false;
    }

    /// Test-only: toggle whether `start` immediately broadcasts the entry it just assigned an
    /// index to. Turning this off opens a window between a caller's `start` returning and the
    /// entry actually being applied, so that a concurrent `override_entry` at the same index can
    /// genuinely displace the pending slot before the original apply ever reaches it (§8 scenario
    /// 7) instead of always losing the race to a synchronous apply.
    pub async fn set_auto_apply(&self, auto_apply: bool) {
        self.inner.lock().await.auto_apply = auto_apply;
    }

    /// Test-only: promote this node (back) to leader, optionally in a new term.
    pub async fn become_leader(&self, term: Option<u64>) {
        let mut inner = self.inner.lock().await;
        if let Some(term) = term {
            inner.term = inner.term.max(term);
        }
        inner.is_leader = true;
    }

    /// Test-only: simulate a higher-term leader overwriting the entry at `index` with a
    /// different command, exercising §8 scenario 7 ("leader change mid-request"). `index` must
    /// already have been assigned by an earlier `start` call on this node.
    pub async fn override_entry(&self, index: u64, replacement: Command) {
        let new_term = {
            let mut inner = self.inner.lock().await;
            inner.term += 1;
            inner.term
        };
        // The broadcast channel drops the message if there are no receivers; that's fine, it
        // mirrors a real apply stream where a message delivered before the pump subscribed
        // would never have been seen either.
        let _ = self.apply_tx.send(ApplyMsg::Command {
            index,
            term: new_term,
            command: replacement,
        });
    }
}

impl Default for LocalConsensus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsensusModule for LocalConsensus {
    async fn start(&self, command: Command) -> StartResult {
        let (index, term, auto_apply) = {
            let mut inner = self.inner.lock().await;
            if !inner.is_leader {
                return StartResult {
                    index: 0,
                    term: 0,
                    is_leader: false,
                };
            }
            let index = inner.next_index;
            inner.next_index += 1;
            (index, inner.term, inner.auto_apply)
        };

        // A single-node "cluster" commits immediately: there is no majority to wait on besides
        // ourselves. A real multi-node backend would only broadcast once a majority of peers
        // acknowledged the append. `auto_apply` exists purely for tests that need to widen that
        // window (see `set_auto_apply`).
        if auto_apply {
            let _ = self.apply_tx.send(ApplyMsg::Command { index, term, command });
        }

        StartResult { index, term, is_leader: true }
    }

    async fn get_state(&self) -> (u64, bool) {
        let inner = self.inner.lock().await;
        (inner.term, inner.is_leader)
    }

    async fn snapshot(&self, _last_included_index: u64, _bytes: Vec<u8>) {
        // Nothing to compact: this backend never retains a log, so there is nothing to trim.
        // A real backend would truncate its log up through `last_included_index` here and
        // persist `bytes` as the new base snapshot.
    }

    fn subscribe(&self) -> broadcast::Receiver<ApplyMsg> {
        self.apply_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_assigns_increasing_indices() {
        let c = LocalConsensus::new();
        let r1 = c.start(Command::put("a", "1")).await;
        let r2 = c.start(Command::put("b", "2")).await;
        assert!(r1.is_leader && r2.is_leader);
        assert_eq!(r2.index, r1.index + 1);
        assert_eq!(r1.term, r2.term);
    }

    #[tokio::test]
    async fn non_leader_refuses_to_start() {
        let c = LocalConsensus::new();
        c.step_down().await;
        let r = c.start(Command::get("a")).await;
        assert!(!r.is_leader);
    }

    #[tokio::test]
    async fn restored_node_resumes_after_commit_index() {
        let c = LocalConsensus::new_from_snapshot(42, 3);
        let r = c.start(Command::put("a", "1")).await;
        assert_eq!(r.index, 43);
        assert_eq!(r.term, 3);
    }

    #[tokio::test]
    async fn override_entry_delivers_a_new_term_at_the_same_index() {
        let c = LocalConsensus::new();
        let mut rx = c.subscribe();
        let r = c.start(Command::put("a", "1")).await;
        let _first = rx.recv().await.unwrap();

        c.override_entry(r.index, Command::put("a", "2")).await;
        let second = rx.recv().await.unwrap();
        match second {
            ApplyMsg::Command { index, term, .. } => {
                assert_eq!(index, r.index);
                assert!(term > r.term);
            }
            _ => panic!("expected a command apply"),
        }
    }
}
