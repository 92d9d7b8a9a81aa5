//! The deterministic in-memory state machine (§3, §4.2, §4.4).
//!
//! `StateMachine` is mutated only by the apply pump (`crate::apply_pump`); nothing else ever
//! calls [`StateMachine::apply`]. It is, however, read directly by the request coordinator to
//! answer `Get` after the coordinator has confirmed (via the apply pump) that the read's
//! linearization point has been reached.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::command::ApplyResult;
use crate::command::Command;
use crate::command::OpType;
use crate::error::Error;
use crate::error::Result;

/// The authoritative replicated state (§3).
#[derive(Debug, Default)]
pub struct StateMachine {
    tab: BTreeMap<String, String>,
    commit_index: u64,
    unique_id: u64,
}

/// The three self-describing fields persisted in a snapshot (§6: "Persisted snapshot layout"),
/// encoded as length-prefixed JSON: simple, human-inspectable, and round-trips `u64` and UTF-8
/// `BTreeMap<String, String>` losslessly.
#[derive(Serialize, Deserialize)]
struct SnapshotImage {
    unique_id: u64,
    commit_index: u64,
    tab: BTreeMap<String, String>,
}

impl StateMachine {
    /// A pristine state machine, as constructed on a node with no existing snapshot.
    pub fn new() -> Self {
        Self {
            tab: BTreeMap::new(),
            commit_index: 0,
            unique_id: 1,
        }
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tab.get(key).map(String::as_str)
    }

    /// Apply one committed command, advancing `commit_index` to `index`.
    ///
    /// Callers (the apply pump) are responsible for the invariant that `index == commit_index +
    /// 1`; this method asserts it debug-only because violating it is a fatal, not a recoverable,
    /// condition (§7), and the apply pump itself is what decides "fatal" vs. "log and ignore".
    pub fn apply(&mut self, index: u64, term: u64, command: &Command) -> ApplyResult {
        debug_assert_eq!(index, self.commit_index + 1, "apply pump must serialize indices");
        self.commit_index = index;

        let session_id = match command.op {
            OpType::OpenSession => {
                let id = format!("{}-{}", self.unique_id, command.nonce);
                self.unique_id += 1;
                Some(id)
            }
            OpType::Put => {
                self.tab.insert(command.key.clone(), command.value.clone());
                None
            }
            OpType::Append => {
                self.tab
                    .entry(command.key.clone())
                    .and_modify(|v| v.push_str(&command.value))
                    .or_insert_with(|| command.value.clone());
                None
            }
            OpType::Delete => {
                self.tab.remove(&command.key);
                None
            }
            OpType::Get => None,
        };

        ApplyResult { term, session_id }
    }

    /// Encode `{uniqueId, commitIndex, tab}` into a self-describing byte blob (§4.4, §6).
    pub fn encode_snapshot(&self) -> Result<Vec<u8>> {
        let image = SnapshotImage {
            unique_id: self.unique_id,
            commit_index: self.commit_index,
            tab: self.tab.clone(),
        };
        Ok(serde_json::to_vec(&image)?)
    }

    /// Decode and atomically install the three fields of a snapshot image. Decode failure is
    /// fatal (§4.4): a truncated or mis-ordered blob can never be a valid state to run from.
    pub fn restore_snapshot(&mut self, bytes: &[u8]) -> Result<()> {
        let image: SnapshotImage =
            serde_json::from_slice(bytes).map_err(|e| Error::SnapshotDecode(e.to_string()))?;
        self.unique_id = image.unique_id;
        self.commit_index = image.commit_index;
        self.tab = image.tab;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get() {
        let mut sm = StateMachine::new();
        sm.apply(1, 1, &Command::put("a", "1"));
        assert_eq!(sm.get("a"), Some("1"));
        assert_eq!(sm.commit_index(), 1);
    }

    #[test]
    fn append_onto_absent_key_behaves_like_put() {
        let mut sm = StateMachine::new();
        sm.apply(1, 1, &Command::append("new", "x"));
        assert_eq!(sm.get("new"), Some("x"));
    }

    #[test]
    fn append_onto_existing_key_concatenates() {
        let mut sm = StateMachine::new();
        sm.apply(1, 1, &Command::put("k", "hello"));
        sm.apply(2, 1, &Command::append("k", " world"));
        assert_eq!(sm.get("k"), Some("hello world"));
    }

    #[test]
    fn delete_removes_key() {
        let mut sm = StateMachine::new();
        sm.apply(1, 1, &Command::put("a", "1"));
        sm.apply(2, 1, &Command::delete("a"));
        assert_eq!(sm.get("a"), None);
    }

    #[test]
    fn open_session_increments_unique_id_and_is_deterministic() {
        let mut sm = StateMachine::new();
        let r1 = sm.apply(1, 1, &Command::open_session("nonce-a".into()));
        let r2 = sm.apply(2, 1, &Command::open_session("nonce-b".into()));
        assert_eq!(r1.session_id.unwrap(), "1-nonce-a");
        assert_eq!(r2.session_id.unwrap(), "2-nonce-b");
    }

    #[test]
    fn snapshot_round_trips() {
        let mut sm = StateMachine::new();
        sm.apply(1, 1, &Command::put("a", "1"));
        sm.apply(2, 1, &Command::open_session("n".into()));
        let bytes = sm.encode_snapshot().unwrap();

        let mut restored = StateMachine::new();
        restored.restore_snapshot(&bytes).unwrap();
        assert_eq!(restored.get("a"), Some("1"));
        assert_eq!(restored.commit_index(), sm.commit_index());
    }

    #[test]
    fn decode_rejects_truncated_blob() {
        let mut sm = StateMachine::new();
        assert!(sm.restore_snapshot(b"not json").is_err());
    }
}
