//! Runtime configuration honored by this crate (§6 of the design doc).
//!
//! Parsing a config file or CLI flags into this struct is external to this crate (§1); what
//! lives here is the shape of the options the core actually reads, and the validation that
//! turns a malformed value into a startup error instead of a confusing runtime failure.

use crate::error::Error;
use crate::error::Result;

/// Default session idle timeout, in seconds, used when `session_timeout == 0`.
pub const DEFAULT_SESSION_TIMEOUT_SECS: i64 = 3600;

/// Default listener port used when `port == 0`.
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Clone, Debug)]
pub struct Config {
    /// Integer node identity, used in logs. Must be unique per cluster.
    pub me: u64,

    /// Shared secret presented by `OpenSession`.
    pub password: String,

    /// Listener port. `0` maps to [`DEFAULT_PORT`]; negative values are rejected.
    pub port: u16,

    /// If `> 0`, snapshot every N applied commands. `0` disables snapshotting.
    pub max_raft_state: i64,

    /// Session idle timeout in seconds. `> 0` is used as-is, `0` maps to
    /// [`DEFAULT_SESSION_TIMEOUT_SECS`], and `< 0` disables expiry entirely.
    pub session_timeout: i64,

    /// Diagnostic verbosity toggle; see [`crate::logging::init`].
    pub log_enabled: bool,
}

impl Config {
    /// Build a validated config from caller-supplied raw fields.
    ///
    /// `raw_port` and `raw_session_timeout` are taken as signed so that "negative means reject"
    /// and "negative means disabled" can be expressed the same way they are in the design doc,
    /// without relying on unsigned-subtraction wraparound to detect a caller's mistake.
    pub fn new(
        me: u64,
        password: impl Into<String>,
        raw_port: i64,
        max_raft_state: i64,
        raw_session_timeout: i64,
        log_enabled: bool,
    ) -> Result<Self> {
        let password = password.into();
        if password.is_empty() {
            return Err(Error::InvalidConfig("password must not be empty".into()));
        }
        if raw_port < 0 {
            return Err(Error::InvalidConfig(format!("port must be >= 0, got {}", raw_port)));
        }

        let port = if raw_port == 0 {
            DEFAULT_PORT
        } else {
            u16::try_from(raw_port)
                .map_err(|_| Error::InvalidConfig(format!("port {} does not fit in u16", raw_port)))?
        };

        let session_timeout = if raw_session_timeout == 0 {
            DEFAULT_SESSION_TIMEOUT_SECS
        } else {
            raw_session_timeout
        };

        Ok(Self {
            me,
            password,
            port,
            max_raft_state,
            session_timeout,
            log_enabled,
        })
    }

    /// Whether the session reaper should run at all (§4.3: `sessionTimeout < 0` never expires).
    pub fn sessions_expire(&self) -> bool {
        self.session_timeout >= 0
    }

    /// Whether snapshotting is armed at startup (§4.4).
    pub fn snapshotting_enabled(&self) -> bool {
        self.max_raft_state > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_password() {
        assert!(Config::new(1, "", 0, 0, 0, false).is_err());
    }

    #[test]
    fn rejects_negative_port() {
        assert!(Config::new(1, "secret", -1, 0, 0, false).is_err());
    }

    #[test]
    fn zero_port_maps_to_default() {
        let cfg = Config::new(1, "secret", 0, 0, 0, false).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
    }

    #[test]
    fn zero_session_timeout_maps_to_default() {
        let cfg = Config::new(1, "secret", 0, 0, 0, false).unwrap();
        assert_eq!(cfg.session_timeout, DEFAULT_SESSION_TIMEOUT_SECS);
        assert!(cfg.sessions_expire());
    }

    #[test]
    fn negative_session_timeout_disables_expiry() {
        let cfg = Config::new(1, "secret", 0, 0, -1, false).unwrap();
        assert!(!cfg.sessions_expire());
    }

    #[test]
    fn positive_max_raft_state_enables_snapshotting() {
        let cfg = Config::new(1, "secret", 0, 10, 0, false).unwrap();
        assert!(cfg.snapshotting_enabled());
    }
}
