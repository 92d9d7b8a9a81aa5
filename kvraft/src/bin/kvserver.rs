//! Demo node binary.
//!
//! Wires a single node up against the in-process reference consensus backend
//! ([`kvraft::consensus::local::LocalConsensus`]) and serves the three RPCs over the toy
//! length-prefixed JSON transport in [`kvraft::server`]. This is enough to exercise the whole
//! crate end to end; it is not a multi-node deployment (§1: the concrete consensus
//! implementation and its network transport are out of scope).

use std::env;
use std::sync::Arc;

use kvraft::config::Config;
use kvraft::consensus::local::LocalConsensus;
use kvraft::storage::MemSnapshotStorage;
use tokio::net::TcpListener;
use tracing::info;

fn parse_env_or(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let me = parse_env_or("KVRAFT_ME", 1) as u64;
    let password = env::var("KVRAFT_PASSWORD").unwrap_or_else(|_| "changeme".to_string());
    let port = parse_env_or("KVRAFT_PORT", 0);
    let max_raft_state = parse_env_or("KVRAFT_MAX_RAFT_STATE", 0);
    let session_timeout = parse_env_or("KVRAFT_SESSION_TIMEOUT", 0);
    let log_enabled = env::var("KVRAFT_LOG").map(|v| v != "0").unwrap_or(true);

    let config = Config::new(me, password, port, max_raft_state, session_timeout, log_enabled)
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    kvraft::logging::init(config.log_enabled);
    info!(me = config.me, port = config.port, "starting kvraft node");

    let consensus = Arc::new(LocalConsensus::new());
    let storage: Arc<dyn kvraft::storage::SnapshotStorage> = Arc::new(MemSnapshotStorage::new());
    let coordinator = kvraft::start_node(config.clone(), consensus, storage).await?;

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    kvraft::server::serve(listener, coordinator).await;
    Ok(())
}
