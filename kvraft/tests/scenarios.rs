//! End-to-end scenarios against `start_node` wired up with `LocalConsensus`, the same way the
//! demo binary wires a real node (§8).

use std::sync::Arc;
use std::time::Duration;

use kvraft::command::OpType;
use kvraft::config::Config;
use kvraft::consensus::local::LocalConsensus;
use kvraft::error::ErrCode;
use kvraft::storage::MemSnapshotStorage;
use kvraft::storage::SnapshotStorage;

fn config(password: &str, max_raft_state: i64, session_timeout: i64) -> Config {
    Config::new(1, password, 0, max_raft_state, session_timeout, false).unwrap()
}

async fn open_session(coordinator: &kvraft::coordinator::RequestCoordinator<LocalConsensus>, password: &str) -> String {
    let reply = coordinator.open_session(password, OpType::OpenSession).await;
    assert_eq!(reply.err_code, ErrCode::Ok);
    reply.session_id
}

#[tokio::test]
async fn basic_lifecycle() {
    let consensus = Arc::new(LocalConsensus::new());
    let storage: Arc<dyn SnapshotStorage> = Arc::new(MemSnapshotStorage::new());
    let coordinator = kvraft::start_node(config("secret", 0, -1), consensus, storage).await.unwrap();

    let session_id = open_session(&coordinator, "secret").await;
    assert!(session_id.starts_with("1-"));

    let put = coordinator.update("a", "1", OpType::Put, &session_id).await;
    assert_eq!(put.err_code, ErrCode::Ok);

    let get = coordinator.get("a", &session_id, OpType::Get).await;
    assert_eq!(get.err_code, ErrCode::Ok);
    assert_eq!(get.value, "1");

    let delete = coordinator.update("a", "", OpType::Delete, &session_id).await;
    assert_eq!(delete.err_code, ErrCode::Ok);

    let missing = coordinator.get("a", &session_id, OpType::Get).await;
    assert_eq!(missing.err_code, ErrCode::NoKey);
    assert_eq!(missing.value, "");
}

#[tokio::test]
async fn append_semantics() {
    let consensus = Arc::new(LocalConsensus::new());
    let storage: Arc<dyn SnapshotStorage> = Arc::new(MemSnapshotStorage::new());
    let coordinator = kvraft::start_node(config("secret", 0, -1), consensus, storage).await.unwrap();
    let session_id = open_session(&coordinator, "secret").await;

    coordinator.update("k", "hello", OpType::Put, &session_id).await;
    coordinator.update("k", " world", OpType::Append, &session_id).await;
    let get = coordinator.get("k", &session_id, OpType::Get).await;
    assert_eq!(get.value, "hello world");

    coordinator.update("new", "x", OpType::Append, &session_id).await;
    let get_new = coordinator.get("new", &session_id, OpType::Get).await;
    assert_eq!(get_new.value, "x");
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let consensus = Arc::new(LocalConsensus::new());
    let storage: Arc<dyn SnapshotStorage> = Arc::new(MemSnapshotStorage::new());
    let coordinator = kvraft::start_node(config("secret", 0, -1), consensus, storage).await.unwrap();

    let reply = coordinator.open_session("bad", OpType::OpenSession).await;
    assert_eq!(reply.err_code, ErrCode::InvalidPassword);
    assert_eq!(reply.session_id, "");
}

#[tokio::test]
async fn wrong_leader_short_circuits_before_touching_consensus() {
    let consensus = Arc::new(LocalConsensus::new());
    consensus.step_down().await;
    let storage: Arc<dyn SnapshotStorage> = Arc::new(MemSnapshotStorage::new());
    let coordinator = kvraft::start_node(config("secret", 0, -1), consensus, storage).await.unwrap();

    // A session id this node never issued: since the node never becomes leader, the precheck's
    // leadership probe must fail before the (nonexistent) session is ever consulted.
    let get = coordinator.get("a", "no-such-session", OpType::Get).await;
    assert_eq!(get.err_code, ErrCode::WrongLeader);

    let update = coordinator.update("a", "1", OpType::Put, "no-such-session").await;
    assert_eq!(update.err_code, ErrCode::WrongLeader);
}

#[tokio::test]
async fn session_expires_after_idle_timeout() {
    let consensus = Arc::new(LocalConsensus::new());
    let storage: Arc<dyn SnapshotStorage> = Arc::new(MemSnapshotStorage::new());
    let coordinator = kvraft::start_node(config("secret", 0, 1), consensus, storage).await.unwrap();
    let session_id = open_session(&coordinator, "secret").await;

    tokio::time::sleep(Duration::from_secs(3)).await;

    let get = coordinator.get("a", &session_id, OpType::Get).await;
    assert_eq!(get.err_code, ErrCode::InvalidSession);
}

#[tokio::test]
async fn snapshot_then_restart_preserves_state() {
    // OpenSession consumes index 1, so the 24 Puts below land at indices 2..25. Sizing
    // max_raft_state at 25 means the only snapshot threshold (§4.4) fires exactly once, at
    // index 25 — the very last Put — so the saved snapshot is guaranteed to cover every key
    // written before the restart, rather than leaving a tail of un-snapshotted writes behind.
    const NUM_KEYS: u64 = 24;
    const MAX_RAFT_STATE: i64 = 25;

    let consensus = Arc::new(LocalConsensus::new());
    let storage = Arc::new(MemSnapshotStorage::new());
    let storage_dyn: Arc<dyn SnapshotStorage> = storage.clone();
    let coordinator = kvraft::start_node(config("secret", MAX_RAFT_STATE, -1), consensus, storage_dyn)
        .await
        .unwrap();
    let session_id = open_session(&coordinator, "secret").await;

    for i in 0..NUM_KEYS {
        let key = format!("k{}", i);
        coordinator.update(&key, &i.to_string(), OpType::Put, &session_id).await;
    }
    // Give the apply pump time to process every command and cross the snapshot threshold.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let saved = storage.read_snapshot().await.unwrap().expect("a snapshot should have been taken by now");

    // Simulate a restart: a fresh node, fresh consensus module, but storage seeded from the
    // snapshot the old leader left behind. The restarted consensus must be told where the
    // restored state machine's commit index and term left off (§4.4) — a plain `new()` would
    // start assigning indices from 1 again, which the apply pump would reject as out-of-order
    // against the already-restored commit index, hanging `open_session` below forever.
    let restarted_consensus = Arc::new(LocalConsensus::new_from_snapshot(NUM_KEYS + 1, 1));
    let restarted_storage: Arc<dyn SnapshotStorage> = Arc::new(MemSnapshotStorage::seeded_with(saved));
    let restarted = kvraft::start_node(config("secret", MAX_RAFT_STATE, -1), restarted_consensus, restarted_storage)
        .await
        .unwrap();
    let new_session = open_session(&restarted, "secret").await;

    for i in 0..NUM_KEYS {
        let key = format!("k{}", i);
        let get = restarted.get(&key, &new_session, OpType::Get).await;
        assert_eq!(get.err_code, ErrCode::Ok, "key {} missing after restore", key);
        assert_eq!(get.value, i.to_string());
    }
}

#[tokio::test]
async fn leader_change_mid_request_surfaces_as_wrong_leader() {
    let consensus = Arc::new(LocalConsensus::new());
    let storage: Arc<dyn SnapshotStorage> = Arc::new(MemSnapshotStorage::new());
    let coordinator = kvraft::start_node(config("secret", 0, -1), consensus.clone(), storage).await.unwrap();
    let session_id = open_session(&coordinator, "secret").await;

    // Disable auto-apply so that `start` below only reserves an index/term and returns, without
    // immediately broadcasting the entry; that opens a genuine window, between the coordinator
    // installing its pending slot and the original command ever being applied, for a concurrent
    // higher-term leader to displace the same index first. Without this, `LocalConsensus::start`
    // applies synchronously and the override always arrives after the index is already committed,
    // so it is rejected as out-of-order and never reaches the pending slot.
    consensus.set_auto_apply(false).await;

    let consensus_for_override = consensus.clone();
    let override_task = tokio::spawn(async move {
        // Give the update a moment to reach `install_pending` before displacing index 2 (index 1
        // was consumed by OpenSession above).
        tokio::time::sleep(Duration::from_millis(5)).await;
        consensus_for_override
            .override_entry(2, kvraft::command::Command::put("a", "overwritten"))
            .await;
    });

    // This exercises scenario 7's displacement path deterministically: the coordinator that
    // submitted the original Put must observe a term mismatch (the override lands with a higher
    // term than the one `start` handed back) and report WRONG_LEADER, never OK.
    let update = coordinator.update("a", "1", OpType::Put, &session_id).await;
    override_task.await.unwrap();

    assert_eq!(update.err_code, ErrCode::WrongLeader);
}
