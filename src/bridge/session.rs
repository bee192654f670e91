//! Attachment lifecycle and the stdin command loop.

use crate::api::{AttachError, AttachmentStatus, ClientApi, Command, SignalRoute, SubmitError};
use crate::bridge::relay::{observer_route, BridgeDelegate, EventSink};
use crate::config::{AppConfig, RelayMode};
use crate::{lock_or_recover, log_debug, log_debug_content};
use anyhow::{Context, Result};
use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[cfg(any(test, feature = "mutants"))]
use std::time::Instant;

// ============================================================================
// Attachment Manager
// ============================================================================

/// Attachment lifecycle as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Unattached,
    Attached,
    PendingReattach,
}

/// Owns the attachment to the client API at one fixed protocol version.
pub struct Session {
    api: Arc<dyn ClientApi>,
    protocol: u32,
    state: Mutex<AttachState>,
}

impl Session {
    pub fn new(api: Arc<dyn ClientApi>, protocol: u32) -> Self {
        Self {
            api,
            protocol,
            state: Mutex::new(AttachState::Unattached),
        }
    }

    pub fn state(&self) -> AttachState {
        *lock_or_recover(&self.state, "session state")
    }

    pub fn protocol(&self) -> u32 {
        self.protocol
    }

    /// Establish (or re-establish) the attachment at the configured protocol
    /// version. Safe to call repeatedly.
    pub fn attach(&self) -> Result<u32, AttachError> {
        let granted = self.api.attach(self.protocol)?;
        *lock_or_recover(&self.state, "session state") = AttachState::Attached;
        log_debug(&format!(
            "attached at protocol {granted} (requested {})",
            self.protocol
        ));
        Ok(granted)
    }

    /// Forward one command to the client.
    pub fn submit(&self, command: Command) -> Result<(), SubmitError> {
        log_debug_content(&format!("submitting command: {}", command.text));
        self.api.send_command(command)
    }

    /// React to attachment lifecycle signals. An availability signal triggers
    /// exactly one unconditional re-attach at the original protocol version;
    /// a failed re-attach stays pending until the next availability signal.
    pub fn handle_attachment_status(&self, status: AttachmentStatus) {
        match status {
            AttachmentStatus::Available => {
                *lock_or_recover(&self.state, "session state") = AttachState::PendingReattach;
                log_debug("client available; reattaching");
                if let Err(err) = self.attach() {
                    *lock_or_recover(&self.state, "session state") = AttachState::PendingReattach;
                    log_debug(&format!("reattach failed: {err}"));
                }
            }
            AttachmentStatus::Attached => {
                *lock_or_recover(&self.state, "session state") = AttachState::Attached;
            }
            AttachmentStatus::NotAvailable | AttachmentStatus::Refused => {
                *lock_or_recover(&self.state, "session state") = AttachState::PendingReattach;
                log_debug(&format!("attachment lost: {status:?}"));
            }
        }
    }
}

// ============================================================================
// Command Ingestor
// ============================================================================

/// Caller-owned command id sequence: starts at 1, increments by 1, ids are
/// never reused within a process lifetime.
#[derive(Debug)]
pub struct CommandSeq {
    upcoming: u64,
}

impl CommandSeq {
    pub fn new() -> Self {
        Self { upcoming: 1 }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.upcoming;
        self.upcoming += 1;
        id
    }
}

impl Default for CommandSeq {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_stdin_reader(tx: Sender<String>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = io::stdin();
        let stdin_lock = stdin.lock();

        for line in stdin_lock.lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            if tx.send(line).is_err() {
                break; // Main thread has exited
            }
        }

        log_debug("stdin reader thread exiting");
    })
}

#[cfg(any(test, feature = "mutants"))]
pub(crate) fn ingest_guard_tripped(elapsed: Duration) -> bool {
    elapsed > Duration::from_secs(2)
}

/// Drain stdin lines into the session until the reader disconnects. Blank
/// lines submit nothing; an empty poll sleeps instead of spinning. Returns
/// the number of loop iterations executed.
pub(crate) fn run_ingest_loop(
    session: &Session,
    seq: &mut CommandSeq,
    rx: &Receiver<String>,
    tag_commands: bool,
    poll_interval: Duration,
    max_loops: Option<u64>,
) -> Result<u64> {
    #[cfg(any(test, feature = "mutants"))]
    let guard_start = Instant::now();
    let mut loop_count: u64 = 0;
    loop {
        #[cfg(any(test, feature = "mutants"))]
        if ingest_guard_tripped(guard_start.elapsed()) {
            panic!("ingest loop guard exceeded");
        }
        loop_count += 1;

        if let Some(limit) = max_loops {
            if loop_count >= limit {
                log_debug("ingest loop reached test limit, exiting");
                break;
            }
        }

        match rx.try_recv() {
            Ok(line) => {
                let text = line.trim_end();
                if text.is_empty() {
                    continue;
                }
                let id = if tag_commands {
                    Some(seq.next_id())
                } else {
                    None
                };
                session
                    .submit(Command::new(text, id))
                    .context("command submission failed")?;
            }
            Err(TryRecvError::Empty) => thread::sleep(poll_interval),
            Err(TryRecvError::Disconnected) => {
                log_debug("stdin closed; ingest loop exiting");
                break;
            }
        }
    }
    Ok(loop_count)
}

// ============================================================================
// Entry Point
// ============================================================================

/// Wire the relay to the client API, attach, and run the ingest loop until
/// stdin closes.
pub fn run_bridge(api: Arc<dyn ClientApi>, config: &AppConfig) -> Result<()> {
    let sink = Arc::new(EventSink::stdout());
    let session = Arc::new(Session::new(Arc::clone(&api), config.protocol));

    let route = match config.mode {
        RelayMode::Observer => observer_route(Arc::clone(&sink), Arc::clone(&session)),
        RelayMode::Delegate => SignalRoute::Delegate(Arc::new(BridgeDelegate::new(
            Arc::clone(&sink),
            Arc::clone(&session),
        ))),
    };
    api.set_route(route);

    session
        .attach()
        .with_context(|| format!("failed to attach at protocol {}", config.protocol))?;

    let (tx, rx) = mpsc::channel();
    let _stdin_handle = spawn_stdin_reader(tx);

    let mut seq = CommandSeq::new();
    run_ingest_loop(
        &session,
        &mut seq,
        &rx,
        config.mode.tags_commands(),
        Duration::from_millis(config.poll_interval_ms),
        None,
    )?;
    Ok(())
}
