use super::defaults::{MAX_CLIENT_NAME_BYTES, MAX_POLL_INTERVAL_MS, MAX_RECONNECT_PROBE_MS};
use super::AppConfig;
use anyhow::{bail, Result};
use clap::Parser;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values before any thread or socket is touched.
    pub fn validate(&mut self) -> Result<()> {
        if self.protocol == 0 {
            bail!("PROTOCOL must be a positive version number");
        }

        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            bail!(
                "--poll-interval-ms must be between 1 and {MAX_POLL_INTERVAL_MS}, got {}",
                self.poll_interval_ms
            );
        }
        if self.reconnect_probe_ms == 0 || self.reconnect_probe_ms > MAX_RECONNECT_PROBE_MS {
            bail!(
                "--reconnect-probe-ms must be between 1 and {MAX_RECONNECT_PROBE_MS}, got {}",
                self.reconnect_probe_ms
            );
        }

        // The name goes into the attach handshake line verbatim.
        let name = self.client_name.trim();
        if name.is_empty() {
            bail!("--client-name cannot be empty");
        }
        if name.len() > MAX_CLIENT_NAME_BYTES {
            bail!(
                "--client-name must be at most {MAX_CLIENT_NAME_BYTES} bytes, got {}",
                name.len()
            );
        }
        if !name.chars().all(|ch| ch.is_ascii_graphic()) {
            bail!("--client-name must be printable ASCII with no whitespace");
        }
        self.client_name = name.to_string();

        Ok(())
    }
}
