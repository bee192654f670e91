//! Event serialization onto the shared output stream.

use crate::api::{ApiDelegate, ApiSignal, AttachmentStatus, Command, SignalRoute};
use crate::bridge::protocol::BridgeEvent;
use crate::bridge::session::Session;
use crate::{lock_or_recover, log_debug};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Serializes every event onto one output stream. The mutex lives here and
/// shields the stream from all concurrent emitters, including the client
/// API's delivery threads.
pub struct EventSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl EventSink {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(writer),
        }
    }

    /// Write exactly one JSON line and flush, so the parent observes the
    /// event without buffering delay. The lock is held across the whole write
    /// and released on every exit path.
    pub fn emit(&self, event: &BridgeEvent) -> io::Result<()> {
        let json = serde_json::to_string(event).map_err(io::Error::from)?;
        let mut out = lock_or_recover(&self.out, "event sink");
        writeln!(out, "{json}")?;
        out.flush()
    }

    /// Emit from a callback that cannot surface a Result. A broken output
    /// stream leaves the parent blind, so the process ends here rather than
    /// keep running with a corrupt relay.
    pub(crate) fn emit_or_exit(&self, event: &BridgeEvent) {
        if let Err(err) = self.emit(event) {
            log_debug(&format!("event relay write failed: {err}"));
            eprintln!("skybridge: event relay write failed: {err}");
            std::process::exit(1);
        }
    }
}

/// Delegate-mode integration: typed callbacks registered when the session is
/// constructed. Echoes and replies keep their caller ids.
pub struct BridgeDelegate {
    sink: Arc<EventSink>,
    session: Arc<Session>,
}

impl BridgeDelegate {
    pub fn new(sink: Arc<EventSink>, session: Arc<Session>) -> Self {
        Self { sink, session }
    }
}

impl ApiDelegate for BridgeDelegate {
    fn on_notification(&self, body: &str) {
        self.sink.emit_or_exit(&BridgeEvent::notification(body));
    }

    fn on_command_echo(&self, command: &Command) {
        self.sink.emit_or_exit(&BridgeEvent::command_echo(command));
    }

    fn on_reply(&self, command: &Command) {
        self.sink.emit_or_exit(&BridgeEvent::reply(command));
    }

    fn on_attachment_status(&self, status: AttachmentStatus) {
        self.session.handle_attachment_status(status);
    }
}

/// Observer-mode integration: one tap sees every signal the client API
/// dispatches, relays the three event kinds, and leaves everything else to
/// the transport's own handling. Attachment signals still drive the session,
/// so both modes reattach the same way.
pub fn observer_route(sink: Arc<EventSink>, session: Arc<Session>) -> SignalRoute {
    SignalRoute::Observer(Box::new(move |signal| match signal {
        ApiSignal::Notify { body } => {
            sink.emit_or_exit(&BridgeEvent::notification(body.as_str()));
        }
        ApiSignal::CommandSent { command } => {
            sink.emit_or_exit(&BridgeEvent::command_echo(command));
        }
        ApiSignal::Reply { command } => {
            sink.emit_or_exit(&BridgeEvent::reply(command));
        }
        ApiSignal::Attachment { status } => {
            session.handle_attachment_status(*status);
        }
    }))
}
