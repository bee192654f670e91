pub mod api;
pub mod bridge;
pub mod config;
mod lock;
pub mod logging;
mod telemetry;

pub(crate) use lock::lock_or_recover;
pub use logging::{init_logging, log_debug, log_debug_content, log_file_path, log_panic};
pub use telemetry::init_tracing;
