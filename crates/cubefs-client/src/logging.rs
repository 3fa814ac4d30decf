//! Process-wide logging init. One mounted volume is one process, so this
//! is a one-shot global subscriber install rather than a per-volume
//! concern.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber reading its filter from
/// `CUBEFS_LOG`, falling back to `info` when unset or unparsable. Safe to
/// call at most once per process; a second call is a no-op (mirrors
/// `tracing_subscriber`'s own guard against double-init panics).
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("CUBEFS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
