//! Command-line parsing and validation helpers.

mod defaults;
mod validation;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use defaults::default_socket_path;
pub use defaults::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_RECONNECT_PROBE_MS};

/// CLI options for the skybridge relay. Validated values keep the stdout
/// protocol and the attach handshake well-formed.
#[derive(Debug, Parser, Clone)]
#[command(about = "skybridge - stdio event bridge for the desktop chat client API", author, version)]
pub struct AppConfig {
    /// Protocol version to request from the client API
    #[arg(value_name = "PROTOCOL")]
    pub protocol: u32,

    /// Path to the client's local API socket
    #[arg(long, env = "SKYBRIDGE_SOCKET", default_value_os_t = default_socket_path())]
    pub socket: PathBuf,

    /// Name announced to the client during attachment
    #[arg(long = "client-name", default_value = "skybridge")]
    pub client_name: String,

    /// How relay callbacks are wired into the client API
    #[arg(long = "mode", value_enum, default_value_t = RelayMode::Delegate)]
    pub mode: RelayMode,

    /// Idle wait between stdin polls (milliseconds)
    #[arg(long = "poll-interval-ms", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Probe interval while waiting for a dropped client to come back (milliseconds)
    #[arg(long = "reconnect-probe-ms", default_value_t = DEFAULT_RECONNECT_PROBE_MS)]
    pub reconnect_probe_ms: u64,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "SKYBRIDGE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "SKYBRIDGE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging command/reply snippets (debug log only)
    #[arg(
        long = "log-content",
        env = "SKYBRIDGE_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,

    /// Enable verbose timing logs
    #[arg(long)]
    pub log_timings: bool,
}

/// Runtime-selectable relay integration modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RelayMode {
    /// One tap observing every client signal; command payloads stay bare text.
    Observer,
    /// Typed per-session callbacks; submitted commands carry sequence ids.
    Delegate,
}

impl RelayMode {
    pub fn label(self) -> &'static str {
        match self {
            RelayMode::Observer => "observer",
            RelayMode::Delegate => "delegate",
        }
    }

    /// Only the delegate form tags commands with caller ids.
    pub fn tags_commands(self) -> bool {
        matches!(self, RelayMode::Delegate)
    }
}
