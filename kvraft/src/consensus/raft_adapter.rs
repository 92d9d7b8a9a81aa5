//! An optional adapter wiring [`ConsensusModule`](crate::consensus::ConsensusModule) onto
//! `async-raft`'s real leader-election / log-replication engine, gated behind the
//! `async-raft-backend` feature.
//!
//! [`LocalConsensus`](super::local::LocalConsensus) already satisfies the contract directly and
//! is what the demo binary and the test suite use; this module exists so the crate's dependency
//! stack stays aligned with a genuine consensus engine rather than only ever exercising a
//! hand-rolled single-node stand-in. It is single-node only: no [`RaftNetwork`] transport is
//! implemented here, since a wire protocol between peers is out of scope (§1 non-goals).
//!
//! `async-raft::Raft::client_write` already blocks until its entry is committed and applied; the
//! translation work here is entirely in the other direction, turning that blocking call back into
//! the decoupled start/stream shape [`ConsensusModule`] expects, so that [`crate::apply_pump`]
//! stays the single place that mutates the state machine regardless of which backend is wired in.

use std::io;
use std::ops::Bound;
use std::ops::RangeBounds;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use async_trait::async_trait;
use async_raft::config::Config as RaftConfig;
use async_raft::error::AppendEntriesError;
use async_raft::error::InstallSnapshotError;
use async_raft::error::VoteError;
use async_raft::raft::AppendEntriesRequest;
use async_raft::raft::AppendEntriesResponse;
use async_raft::raft::ClientWriteRequest;
use async_raft::raft::Entry;
use async_raft::raft::EntryPayload;
use async_raft::raft::InstallSnapshotRequest;
use async_raft::raft::InstallSnapshotResponse;
use async_raft::raft::MembershipConfig;
use async_raft::raft::VoteRequest;
use async_raft::raft::VoteResponse;
use async_raft::storage::HardState;
use async_raft::storage::InitialState;
use async_raft::storage::Snapshot as RaftSnapshot;
use async_raft::storage::SnapshotMeta;
use async_raft::AppData;
use async_raft::AppDataResponse;
use async_raft::LogId;
use async_raft::NodeId;
use async_raft::Raft;
use async_raft::RaftNetwork;
use async_raft::RaftStorage;
use tokio::io::AsyncRead;
use tokio::io::AsyncSeek;
use tokio::io::AsyncWrite;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tracing::warn;

use crate::command::ApplyResult;
use crate::command::Command;
use crate::consensus::ApplyMsg;
use crate::consensus::ConsensusModule;
use crate::consensus::StartResult;

impl AppData for Command {}
impl AppDataResponse for ApplyResult {}

/// A growable, purely in-memory snapshot buffer. Good enough for a single node with no peers to
/// transfer a snapshot to or from.
pub struct SnapshotCursor(io::Cursor<Vec<u8>>);

impl AsyncRead for SnapshotCursor {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for SnapshotCursor {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

impl AsyncSeek for SnapshotCursor {
    fn start_seek(mut self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.0).start_seek(position)
    }
    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.0).poll_complete(cx)
    }
}

struct StoreInner {
    log: Vec<Entry<Command>>,
    hard_state: Option<HardState>,
    last_applied: LogId,
    state_machine: crate::state_machine::StateMachine,
    current_snapshot: Option<(SnapshotMeta, Vec<u8>)>,
}

impl Default for StoreInner {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            hard_state: None,
            last_applied: LogId { term: 0, index: 0 },
            state_machine: crate::state_machine::StateMachine::new(),
            current_snapshot: None,
        }
    }
}

/// The `RaftStorage` impl backing a single-node [`RaftAdapter`]: an in-memory log plus this
/// crate's own [`crate::state_machine::StateMachine`] as the applied state.
pub struct Store {
    id: NodeId,
    inner: Mutex<StoreInner>,
}

impl Store {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    fn range_to_vec(log: &[Entry<Command>], range: impl RangeBounds<u64>) -> Vec<Entry<Command>> {
        let start = match range.start_bound() {
            Bound::Included(i) => *i,
            Bound::Excluded(i) => i + 1,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(i) => i + 1,
            Bound::Excluded(i) => *i,
            Bound::Unbounded => u64::MAX,
        };
        log.iter()
            .filter(|e| e.log_id.index >= start && e.log_id.index < end)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RaftStorage<Command, ApplyResult> for Store {
    type SnapshotData = SnapshotCursor;
    type ShutdownError = crate::error::Error;

    async fn get_membership_config(&self) -> anyhow::Result<MembershipConfig> {
        let inner = self.inner.lock().await;
        for entry in inner.log.iter().rev() {
            if let EntryPayload::ConfigChange(change) = &entry.payload {
                return Ok(change.membership.clone());
            }
        }
        Ok(MembershipConfig::new_initial(self.id))
    }

    async fn get_initial_state(&self) -> anyhow::Result<InitialState> {
        let inner = self.inner.lock().await;
        let membership = self.get_membership_config().await?;
        let last_log_id = inner.log.last().map(|e| e.log_id).unwrap_or(LogId { term: 0, index: 0 });
        Ok(InitialState {
            last_log_id,
            last_applied_log: inner.last_applied,
            hard_state: inner.hard_state.clone().unwrap_or_default(),
            membership,
        })
    }

    async fn save_hard_state(&self, hs: &HardState) -> anyhow::Result<()> {
        self.inner.lock().await.hard_state = Some(hs.clone());
        Ok(())
    }

    async fn get_log_entries<RNG: RangeBounds<u64> + Clone + std::fmt::Debug + Send + Sync>(
        &self,
        range: RNG,
    ) -> anyhow::Result<Vec<Entry<Command>>> {
        let inner = self.inner.lock().await;
        Ok(Self::range_to_vec(&inner.log, range))
    }

    async fn try_get_log_entry(&self, log_index: u64) -> anyhow::Result<Option<Entry<Command>>> {
        let inner = self.inner.lock().await;
        Ok(inner.log.iter().find(|e| e.log_id.index == log_index).cloned())
    }

    async fn get_last_log_id(&self) -> anyhow::Result<LogId> {
        let inner = self.inner.lock().await;
        Ok(inner.log.last().map(|e| e.log_id).unwrap_or(inner.last_applied))
    }

    async fn delete_logs_from<RNG: RangeBounds<u64> + Clone + std::fmt::Debug + Send + Sync>(
        &self,
        range: RNG,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.log.retain(|e| !range.contains(&e.log_id.index));
        Ok(())
    }

    async fn append_to_log(&self, entries: &[&Entry<Command>]) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        for entry in entries {
            inner.log.push((*entry).clone());
        }
        Ok(())
    }

    async fn apply_to_state_machine(&self, entries: &[&Entry<Command>]) -> anyhow::Result<Vec<ApplyResult>> {
        let mut inner = self.inner.lock().await;
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            inner.last_applied = entry.log_id;
            let result = match &entry.payload {
                EntryPayload::Normal(normal) => inner.state_machine.apply(entry.log_id.index, entry.log_id.term, &normal.data),
                _ => ApplyResult {
                    term: entry.log_id.term,
                    session_id: None,
                },
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn do_log_compaction(&self) -> anyhow::Result<RaftSnapshot<Self::SnapshotData>> {
        let mut inner = self.inner.lock().await;
        let bytes = inner
            .state_machine
            .encode_snapshot()
            .map_err(|e| anyhow::anyhow!("snapshot encode failed: {}", e))?;
        let membership = self.get_membership_config().await?;
        let meta = SnapshotMeta {
            last_log_id: inner.last_applied,
            membership,
            snapshot_id: format!("{}-{}", inner.last_applied.term, inner.last_applied.index),
        };
        inner.current_snapshot = Some((meta.clone(), bytes.clone()));
        inner.log.retain(|e| e.log_id.index > inner.last_applied.index);
        Ok(RaftSnapshot {
            meta,
            snapshot: Box::new(SnapshotCursor(io::Cursor::new(bytes))),
        })
    }

    async fn begin_receiving_snapshot(&self) -> anyhow::Result<Box<Self::SnapshotData>> {
        Ok(Box::new(SnapshotCursor(io::Cursor::new(Vec::new()))))
    }

    async fn finalize_snapshot_installation(
        &self,
        meta: &SnapshotMeta,
        snapshot: Box<Self::SnapshotData>,
    ) -> anyhow::Result<()> {
        let bytes = snapshot.0.into_inner();
        let mut inner = self.inner.lock().await;
        inner
            .state_machine
            .restore_snapshot(&bytes)
            .map_err(|e| anyhow::anyhow!("snapshot decode failed: {}", e))?;
        inner.last_applied = meta.last_log_id;
        inner.current_snapshot = Some((meta.clone(), bytes));
        inner.log.retain(|e| e.log_id.index > meta.last_log_id.index);
        Ok(())
    }

    async fn get_current_snapshot(&self) -> anyhow::Result<Option<RaftSnapshot<Self::SnapshotData>>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .current_snapshot
            .clone()
            .map(|(meta, bytes)| RaftSnapshot {
                meta,
                snapshot: Box::new(SnapshotCursor(io::Cursor::new(bytes))),
            }))
    }
}

/// A network with no peers: every membership change this single node could ever see names only
/// itself, so these methods are never actually called in practice. They exist to satisfy
/// [`RaftNetwork`]; wiring a real transport here is future work, not part of this crate.
pub struct NullNetwork;

#[async_trait]
impl RaftNetwork<Command> for NullNetwork {
    async fn append_entries(
        &self,
        target: NodeId,
        _rpc: AppendEntriesRequest<Command>,
    ) -> anyhow::Result<AppendEntriesResponse, AppendEntriesError> {
        Err(AppendEntriesError::Fatal(anyhow::anyhow!("no network transport configured for peer {}", target)))
    }

    async fn install_snapshot(
        &self,
        target: NodeId,
        _rpc: InstallSnapshotRequest,
    ) -> anyhow::Result<InstallSnapshotResponse, InstallSnapshotError> {
        Err(InstallSnapshotError::Fatal(anyhow::anyhow!("no network transport configured for peer {}", target)))
    }

    async fn vote(&self, target: NodeId, _rpc: VoteRequest) -> anyhow::Result<VoteResponse, VoteError> {
        Err(VoteError::Fatal(anyhow::anyhow!("no network transport configured for peer {}", target)))
    }
}

/// Wraps a real `async_raft::Raft<Command, ApplyResult, NullNetwork, Store>` to satisfy
/// [`ConsensusModule`]. Built for a single-node cluster: `id` is the only member, so the network
/// is never exercised.
pub struct RaftAdapter {
    raft: Raft<Command, ApplyResult, NullNetwork, Store>,
    applied_tx: broadcast::Sender<ApplyMsg>,
    next_index: std::sync::atomic::AtomicU64,
}

impl RaftAdapter {
    pub async fn new(id: NodeId) -> anyhow::Result<Self> {
        let config = Arc::new(RaftConfig::build("kvraft".into()).validate()?);
        let network = Arc::new(NullNetwork);
        let storage = Arc::new(Store::new(id));
        let last_log_id = storage.get_last_log_id().await?;
        let raft = Raft::new(id, config, network, storage);
        raft.initialize(std::iter::once(id).collect())
            .await
            .map_err(|e| anyhow::anyhow!("failed to initialize single-node cluster: {}", e))?;

        let (applied_tx, _) = broadcast::channel(1024);
        Ok(Self {
            raft,
            applied_tx,
            next_index: std::sync::atomic::AtomicU64::new(last_log_id.index + 1),
        })
    }
}

#[async_trait]
impl ConsensusModule for RaftAdapter {
    async fn start(&self, command: Command) -> StartResult {
        let (term, is_leader) = self.get_state().await;
        if !is_leader {
            return StartResult {
                index: 0,
                term,
                is_leader: false,
            };
        }

        // `client_write` only reports the assigned log index once the entry is committed, but
        // `ConsensusModule::start` must hand the index back before that so the coordinator can
        // install a pending slot first. A single-node cluster appends to its own log in call
        // order, so reserving the next index here matches what `client_write` will assign;
        // `apply_pump`'s out-of-order check is the backstop if that ever doesn't hold.
        let index = self.next_index.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let raft = self.raft.clone();
        let applied_tx = self.applied_tx.clone();
        let request = ClientWriteRequest::new(command.clone());
        tokio::spawn(async move {
            match raft.client_write(request).await {
                Ok(response) => {
                    let _ = applied_tx.send(ApplyMsg::Command {
                        index: response.index,
                        term: response.data.term,
                        command,
                    });
                }
                Err(e) => warn!(error = %e, index, "client_write failed"),
            }
        });

        StartResult {
            index,
            term,
            is_leader: true,
        }
    }

    async fn get_state(&self) -> (u64, bool) {
        let metrics = self.raft.metrics().borrow().clone();
        (metrics.current_term, metrics.current_leader == Some(metrics.id))
    }

    async fn snapshot(&self, _index: u64, _snapshot: Vec<u8>) {
        // async-raft triggers compaction on its own policy via `Store::do_log_compaction`; this
        // crate's threshold-driven `crate::snapshot::take` is only meaningful for
        // `LocalConsensus`, which has no compaction policy of its own.
    }

    fn subscribe(&self) -> broadcast::Receiver<ApplyMsg> {
        self.applied_tx.subscribe()
    }
}
