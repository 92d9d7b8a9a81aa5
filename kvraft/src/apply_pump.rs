//! The apply pump: the single consumer of the consensus apply stream (§4.2).
//!
//! This task is the sole writer of `Shared::state_machine` and `Shared::sessions` — the
//! request coordinator only ever reads `tab` (for `Get`, after confirming the read's
//! linearization point) and writes/reads the pending-slot table, never the state machine
//! fields directly.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::warn;

use crate::config::Config;
use crate::consensus::ApplyMsg;
use crate::consensus::ConsensusModule;
use crate::shared::Shared;
use crate::snapshot;
use crate::storage::SnapshotStorage;

/// Spawn the apply pump. Subscribes to `consensus`'s apply stream immediately, before returning,
/// so that no committed entry can be missed between construction and the task actually polling.
pub fn spawn<C: ConsensusModule>(
    config: Config,
    consensus: Arc<C>,
    storage: Arc<dyn SnapshotStorage>,
    shared: Arc<Mutex<Shared>>,
) -> JoinHandle<()> {
    let mut rx = consensus.subscribe();
    tokio::spawn(async move {
        loop {
            let msg = match rx.recv().await {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Closed) => {
                    warn!(me = config.me, "apply stream closed; apply pump exiting");
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(me = config.me, missed, "apply pump lagged behind the apply stream");
                    continue;
                }
            };

            let mut snapshot_due = false;
            match msg {
                ApplyMsg::Command { index, term, command } => {
                    let mut guard = shared.lock().await;
                    let expected = guard.state_machine.commit_index() + 1;
                    if index != expected {
                        // Defensive (§4.2): a correct consensus module never violates this.
                        // A future hardening pass should promote this to fatal (§7).
                        warn!(me = config.me, index, expected, "out-of-order apply; ignoring entry");
                        continue;
                    }

                    let outcome = guard.state_machine.apply(index, term, &command);
                    if let Some(session_id) = &outcome.session_id {
                        guard.sessions.insert(session_id.clone());
                    }
                    guard.deliver(index, outcome);

                    if guard.next_snapshot_index == Some(index) {
                        snapshot_due = true;
                        guard.next_snapshot_index = Some(index + config.max_raft_state.max(1) as u64);
                    }
                }
                ApplyMsg::Snapshot { index, bytes } => {
                    let mut guard = shared.lock().await;
                    if let Err(e) = guard.state_machine.restore_snapshot(&bytes) {
                        error!(me = config.me, error = %e, "fatal: snapshot apply failed to decode");
                        std::process::exit(1);
                    }
                    if guard.state_machine.commit_index() != index {
                        warn!(
                            me = config.me,
                            restored = guard.state_machine.commit_index(),
                            snapshot_index = index,
                            "commitIndex mismatch after snapshot restore; trusting the snapshot (§9 open question)"
                        );
                    }
                }
            }

            if snapshot_due {
                snapshot::take(&shared, &consensus, &storage).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::config::Config;
    use crate::consensus::local::LocalConsensus;
    use crate::state_machine::StateMachine;
    use crate::storage::MemSnapshotStorage;
    use std::time::Duration;

    fn test_config(max_raft_state: i64) -> Config {
        Config::new(1, "secret", 0, max_raft_state, -1, false).unwrap()
    }

    #[tokio::test]
    async fn applies_commands_in_order_and_advances_commit_index() {
        let consensus = Arc::new(LocalConsensus::new());
        let storage: Arc<dyn SnapshotStorage> = Arc::new(MemSnapshotStorage::new());
        let shared = Arc::new(Mutex::new(Shared::new(StateMachine::new(), None)));
        let _pump = spawn(test_config(0), consensus.clone(), storage, shared.clone());

        consensus.start(Command::put("a", "1")).await;
        consensus.start(Command::put("b", "2")).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let guard = shared.lock().await;
        assert_eq!(guard.state_machine.commit_index(), 2);
        assert_eq!(guard.state_machine.get("a"), Some("1"));
        assert_eq!(guard.state_machine.get("b"), Some("2"));
    }

    #[tokio::test]
    async fn snapshot_fires_at_threshold_and_is_persisted() {
        let consensus = Arc::new(LocalConsensus::new());
        let storage = Arc::new(MemSnapshotStorage::new());
        let storage_dyn: Arc<dyn SnapshotStorage> = storage.clone();
        let shared = Arc::new(Mutex::new(Shared::new(StateMachine::new(), snapshot::initial_threshold(2, 0))));
        let _pump = spawn(test_config(2), consensus.clone(), storage_dyn, shared.clone());

        consensus.start(Command::put("a", "1")).await;
        consensus.start(Command::put("b", "2")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let saved = storage.read_snapshot().await.unwrap();
        assert!(saved.is_some(), "expected a snapshot to have been taken at the threshold");
    }
}
