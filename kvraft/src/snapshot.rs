//! Snapshot manager (§4.4).
//!
//! The manager itself holds no state beyond configuration — the threshold state machine
//! (`disabled` / `armed(nextIdx)`) lives in `Shared::next_snapshot_index`, since it has to be
//! read and advanced under the same lock the apply pump already holds while applying an entry.
//! What lives here is the encode/persist/compact sequence triggered once that threshold fires,
//! and the restore-on-startup logic.

use std::sync::Arc;

use tracing::error;
use tracing::info;

use crate::consensus::ConsensusModule;
use crate::error::Result;
use crate::shared::Shared;
use crate::state_machine::StateMachine;
use crate::storage::SnapshotStorage;

/// The initial threshold state for a freshly constructed `Shared` (§4.4's state diagram).
pub fn initial_threshold(max_raft_state: i64, commit_index: u64) -> Option<u64> {
    if max_raft_state > 0 {
        Some(commit_index + max_raft_state as u64)
    } else {
        None
    }
}

/// Build the starting state machine for a node: restored from `storage` if a snapshot exists,
/// pristine otherwise. Decode failure is fatal (§4.4), surfaced as `Err` so the caller can log
/// and exit rather than silently running from a half-initialized state.
pub async fn restore_or_new(storage: &dyn SnapshotStorage) -> Result<StateMachine> {
    let mut sm = StateMachine::new();
    if let Some(bytes) = storage
        .read_snapshot()
        .await
        .map_err(crate::error::Error::StorageInit)?
    {
        sm.restore_snapshot(&bytes)?;
        info!(commit_index = sm.commit_index(), "restored state machine from snapshot");
    }
    Ok(sm)
}

/// Encode the current state machine, persist it, and tell the consensus module the log may be
/// compacted up through `commit_index`. Called by the apply pump once `next_snapshot_index` is
/// reached; encode/persist failures are fatal (§7).
pub async fn take<C: ConsensusModule>(
    shared: &tokio::sync::Mutex<Shared>,
    consensus: &Arc<C>,
    storage: &Arc<dyn SnapshotStorage>,
) {
    let (index, bytes) = {
        let guard = shared.lock().await;
        let bytes = match guard.state_machine.encode_snapshot() {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "fatal: failed to encode snapshot");
                std::process::exit(1);
            }
        };
        (guard.state_machine.commit_index(), bytes)
    };

    if let Err(e) = storage.save_snapshot(bytes.clone()).await {
        error!(error = %e, "fatal: failed to persist snapshot");
        std::process::exit(1);
    }

    consensus.snapshot(index, bytes).await;
    info!(index, "snapshot taken and consensus log compaction requested");
}
