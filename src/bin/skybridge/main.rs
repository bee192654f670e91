//! skybridge entrypoint: attach to the local chat client and relay its API
//! over stdio.
//!
//! # Architecture
//!
//! - Stdin reader thread: forwards command lines to the ingest loop
//! - Ingest loop (main thread): tags commands and submits them to the client
//! - Client transport threads: deliver signals the relay writes to stdout
//!
//! Stdout carries newline-delimited JSON events exclusively; diagnostics go
//! to stderr and the debug log.

use anyhow::Result;
use skybridge::api::socket::SocketApi;
use skybridge::api::ClientApi;
use skybridge::bridge::run_bridge;
use skybridge::config::AppConfig;
use skybridge::{init_logging, init_tracing, log_debug, log_file_path, log_panic};
use std::panic;
use std::sync::Arc;

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    init_logging(&config);
    init_tracing(&config);
    panic::set_hook(Box::new(|info| {
        log_panic(info);
    }));

    log_debug("=== skybridge started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));
    log_debug(&format!(
        "protocol {} mode {} socket {}",
        config.protocol,
        config.mode.label(),
        config.socket.display()
    ));

    let api: Arc<dyn ClientApi> = Arc::new(SocketApi::new(&config));
    run_bridge(api, &config)
}
