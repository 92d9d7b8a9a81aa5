//! Session registry and reaper (§4.3).

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;

/// `sessionId -> lastActivity`. Touched under the coordinator lock that guards the rest of the
/// shared state; see `crate::shared::Shared`.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Instant>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly applied `OpenSession`.
    pub fn insert(&mut self, session_id: String) {
        self.sessions.insert(session_id, Instant::now());
    }

    /// Touch `session_id`'s activity timestamp and report whether it exists. This doubles as
    /// the existence check (§4.3): a request against an unknown session never reaches this far
    /// with a "found" result.
    pub fn touch(&mut self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(last_activity) => {
                *last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Remove every session idle for at least `timeout`. Called only by the reaper.
    fn sweep_expired(&mut self, timeout: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, last_activity| last_activity.elapsed() < timeout);
        before - self.sessions.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Spawn the background reaper task, if `config.sessions_expire()` and the timeout is a
/// positive, finite duration worth sweeping on. `sessionTimeout == 0` was already normalized to
/// [`crate::config::DEFAULT_SESSION_TIMEOUT_SECS`] by [`Config::new`]; `< 0` disables the reaper
/// entirely (§4.3).
pub fn spawn_reaper(
    config: &Config,
    shared: std::sync::Arc<Mutex<crate::shared::Shared>>,
) -> Option<tokio::task::JoinHandle<()>> {
    if !config.sessions_expire() {
        info!(me = config.me, "session reaper disabled (sessionTimeout < 0)");
        return None;
    }

    let timeout = Duration::from_secs(config.session_timeout as u64);
    let me = config.me;
    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(timeout).await;
            let mut guard = shared.lock().await;
            let expired = guard.sessions.sweep_expired(timeout);
            if expired > 0 {
                info!(me, expired, "reaped expired sessions");
            }
        }
    }))
}
