//! Structured logging setup (§4.6 of the design doc).

use tracing_subscriber::prelude::*;

/// Install the global tracing subscriber.
///
/// `log_enabled = false` installs a filter that only lets `warn` and above through, so a node
/// run with diagnostics off still surfaces fatal and near-fatal conditions. `log_enabled = true`
/// defers to `RUST_LOG` if set, falling back to `info`.
pub fn init(log_enabled: bool) {
    let filter = if log_enabled {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    } else {
        tracing_subscriber::EnvFilter::new("warn")
    };

    let fmt_layer = tracing_subscriber::fmt::Layer::default().with_ansi(false);
    let subscriber = tracing_subscriber::Registry::default().with(filter).with(fmt_layer);

    // Tests and multiple demo nodes in one process may call this more than once; ignore the
    // "already set" error rather than panicking.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
