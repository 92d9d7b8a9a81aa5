//! A strongly consistent, fault-tolerant replicated key-value store, built around the
//! integration of a replicated state machine (RSM) layer and a Raft-class consensus module.
//!
//! See `SPEC_FULL.md` at the repository root for the full design. In short:
//!
//! - [`consensus`] defines the contract this crate consumes from its consensus module
//!   ([`consensus::ConsensusModule`]), plus the reference backends that satisfy it.
//! - [`command`] is the wire/log payload (`Command`) and its apply outcome (`ApplyResult`).
//! - [`state_machine`] is the deterministic map + counters the apply pump mutates.
//! - [`session`] is the session registry and its background reaper.
//! - [`shared`] gathers everything behind the single coordinator lock (§5).
//! - [`coordinator`] is the request coordinator the RPC façade calls into (§4.1).
//! - [`apply_pump`] is the single consumer of the consensus apply stream (§4.2).
//! - [`snapshot`] is the snapshot manager (§4.4).
//! - [`storage`] is the snapshot persistence contract (§6).
//! - [`server`] is a thin illustrative RPC façade (§1: real transport is out of scope).

pub mod apply_pump;
pub mod command;
pub mod config;
pub mod consensus;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod server;
pub mod session;
pub mod shared;
pub mod snapshot;
pub mod state_machine;
pub mod storage;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::consensus::ConsensusModule;
use crate::coordinator::RequestCoordinator;
use crate::error::Result;
use crate::shared::Shared;
use crate::storage::SnapshotStorage;

/// A fully wired node: restores (or creates) the state machine, spawns the apply pump and the
/// session reaper, and returns a [`RequestCoordinator`] ready to be handed to an RPC façade.
///
/// This is the one function the demo binary (`src/bin/kvserver.rs`) and the integration tests
/// both call — the wiring itself is not interesting enough to duplicate in both places.
pub async fn start_node<C: ConsensusModule>(
    config: Config,
    consensus: Arc<C>,
    storage: Arc<dyn SnapshotStorage>,
) -> Result<Arc<RequestCoordinator<C>>> {
    let state_machine = snapshot::restore_or_new(storage.as_ref()).await?;
    let next_snapshot_index = snapshot::initial_threshold(config.max_raft_state, state_machine.commit_index());
    let shared = Arc::new(Mutex::new(Shared::new(state_machine, next_snapshot_index)));

    apply_pump::spawn(config.clone(), consensus.clone(), storage, shared.clone());
    session::spawn_reaper(&config, shared.clone());

    Ok(Arc::new(RequestCoordinator::new(config, consensus, shared)))
}
