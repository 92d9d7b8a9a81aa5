//! The request coordinator (§4.1): the entry point the RPC façade calls into.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;
use tracing::debug;
use tracing::warn;

use crate::command::ApplyResult;
use crate::command::Command;
use crate::command::OpType;
use crate::config::Config;
use crate::consensus::ConsensusModule;
use crate::error::ErrCode;
use crate::shared::Shared;

/// Outcome of `OpenSession`.
pub struct OpenSessionReply {
    pub session_id: String,
    pub err_code: ErrCode,
}

/// Outcome of `Get`.
pub struct GetReply {
    pub value: String,
    pub err_code: ErrCode,
}

/// Outcome of `Update` (Put / Append / Delete).
pub struct UpdateReply {
    pub err_code: ErrCode,
}

/// The coordinator, generic over the consensus module it submits to. One instance is
/// constructed per node and shared (behind `Arc`) across every in-flight RPC handler task.
pub struct RequestCoordinator<C: ConsensusModule> {
    config: Config,
    consensus: Arc<C>,
    shared: Arc<Mutex<Shared>>,
    nonce_counter: AtomicU64,
}

impl<C: ConsensusModule> RequestCoordinator<C> {
    pub fn new(config: Config, consensus: Arc<C>, shared: Arc<Mutex<Shared>>) -> Self {
        Self {
            config,
            consensus,
            shared,
            nonce_counter: AtomicU64::new(0),
        }
    }

    pub fn shared(&self) -> &Arc<Mutex<Shared>> {
        &self.shared
    }

    /// A fresh, locally-unguessable-enough nonce for `OpenSession`. Uniqueness across the
    /// cluster's lifetime matters (it becomes part of the session id); this node's identity is
    /// folded in so that two nodes minting a nonce at "the same" logical instant never collide.
    fn fresh_nonce(&self) -> String {
        let counter = self.nonce_counter.fetch_add(1, Ordering::Relaxed);
        let random: u64 = rand::random();
        format!("{}.{}.{:x}", self.config.me, counter, random)
    }

    pub async fn open_session(&self, password: &str, op: OpType) -> OpenSessionReply {
        if op != OpType::OpenSession {
            return OpenSessionReply {
                session_id: String::new(),
                err_code: ErrCode::InvalidRequestType,
            };
        }
        if password != self.config.password {
            return OpenSessionReply {
                session_id: String::new(),
                err_code: ErrCode::InvalidPassword,
            };
        }

        let command = Command::open_session(self.fresh_nonce());
        match self.submit(command).await {
            Ok(result) => OpenSessionReply {
                session_id: result.session_id.unwrap_or_default(),
                err_code: ErrCode::Ok,
            },
            Err(err_code) => OpenSessionReply {
                session_id: String::new(),
                err_code,
            },
        }
    }

    pub async fn get(&self, key: &str, session_id: &str, op: OpType) -> GetReply {
        if op != OpType::Get {
            return GetReply {
                value: String::new(),
                err_code: ErrCode::InvalidRequestType,
            };
        }
        if let Err(err_code) = self.precheck(session_id).await {
            return GetReply {
                value: String::new(),
                err_code,
            };
        }

        // A no-op Get is still submitted through consensus (§4.1): it is the linearization
        // point that guarantees this read is ordered after every earlier committed write.
        match self.submit(Command::get(key)).await {
            Ok(_) => {
                let guard = self.shared.lock().await;
                match guard.state_machine.get(key) {
                    Some(value) => GetReply {
                        value: value.to_string(),
                        err_code: ErrCode::Ok,
                    },
                    None => GetReply {
                        value: String::new(),
                        err_code: ErrCode::NoKey,
                    },
                }
            }
            Err(err_code) => GetReply {
                value: String::new(),
                err_code,
            },
        }
    }

    pub async fn update(&self, key: &str, value: &str, op: OpType, session_id: &str) -> UpdateReply {
        if !matches!(op, OpType::Put | OpType::Append | OpType::Delete) {
            return UpdateReply {
                err_code: ErrCode::InvalidRequestType,
            };
        }
        if let Err(err_code) = self.precheck(session_id).await {
            return UpdateReply { err_code };
        }

        let command = match op {
            OpType::Put => Command::put(key, value),
            OpType::Append => Command::append(key, value),
            OpType::Delete => Command::delete(key),
            _ => unreachable!("validated above"),
        };

        match self.submit(command).await {
            Ok(_) => UpdateReply { err_code: ErrCode::Ok },
            Err(err_code) => UpdateReply { err_code },
        }
    }

    /// Shared pre-checks for `Get` and `Update` (§4.1): leadership and session validity.
    /// Touching the session's activity timestamp here also serves as the existence check
    /// (§4.3).
    async fn precheck(&self, session_id: &str) -> Result<(), ErrCode> {
        let (_, is_leader) = self.consensus.get_state().await;
        if !is_leader {
            return Err(ErrCode::WrongLeader);
        }

        let mut guard = self.shared.lock().await;
        if !guard.sessions.touch(session_id) {
            return Err(ErrCode::InvalidSession);
        }
        Ok(())
    }

    /// The submission protocol of §4.1: submit, install a pending slot keyed by the assigned
    /// index, await delivery, and accept the outcome only if its term matches what we observed
    /// at submission.
    async fn submit(&self, command: Command) -> Result<ApplyResult, ErrCode> {
        let start = self.consensus.start(command).await;
        if !start.is_leader {
            return Err(ErrCode::WrongLeader);
        }

        let rx = {
            let mut guard = self.shared.lock().await;
            guard.install_pending(start.index, start.term)
        };

        let outcome = match rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                // The sender was dropped without a send, which only happens if this process is
                // tearing down; there is no meaningful client-facing error code for that, so we
                // surface it the same way a lost leadership race would look to the client.
                warn!(index = start.index, "pending slot dropped without delivery");
                return Err(ErrCode::WrongLeader);
            }
        };

        if outcome.term == start.term {
            Ok(outcome)
        } else {
            debug!(
                index = start.index,
                submitted_term = start.term,
                delivered_term = outcome.term,
                "term mismatch at apply; our submission did not survive a leader change"
            );
            Err(ErrCode::WrongLeader)
        }
    }
}
