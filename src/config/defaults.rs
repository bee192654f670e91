use std::env;
use std::path::PathBuf;

/// Idle wait between stdin polls. The original bridge slept 100ms between
/// empty reads; anything in that range keeps latency invisible to a human.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Probe interval while the client is down.
pub const DEFAULT_RECONNECT_PROBE_MS: u64 = 1_000;

pub(super) const MAX_POLL_INTERVAL_MS: u64 = 10_000;
pub(super) const MAX_RECONNECT_PROBE_MS: u64 = 60_000;
pub(super) const MAX_CLIENT_NAME_BYTES: usize = 64;

/// The client publishes its API socket under the user runtime dir when one
/// exists, otherwise under the system temp dir.
pub(super) fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join("chatclient").join("api.sock");
        }
    }
    env::temp_dir().join("chatclient-api.sock")
}
