//! The client automation API, as the bridge sees it.
//!
//! The chat client is an external collaborator: it owns the wire protocol and
//! its own delivery threads. This module is the seam between the two sides: a
//! capability trait, the signal vocabulary the client dispatches, and the two
//! ways relay code can subscribe to those signals (a single observer tap or a
//! typed per-session delegate).

pub mod socket;

use std::fmt;
use std::io;
use std::sync::Arc;

/// A command bound for the client, plus the optional caller-assigned id used
/// to correlate its echo and reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: Option<u64>,
    pub text: String,
    pub reply: Option<String>,
}

impl Command {
    pub fn new(text: impl Into<String>, id: Option<u64>) -> Self {
        Self {
            id,
            text: text.into(),
            reply: None,
        }
    }

    /// The same command, carrying the client's answer.
    pub(crate) fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }
}

/// Attachment lifecycle notifications pushed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentStatus {
    /// The client is reachable and will accept an attach request.
    Available,
    /// An attachment is established.
    Attached,
    /// The client turned the attach request away.
    Refused,
    /// The client went away; commands cannot be delivered.
    NotAvailable,
}

/// Everything the client API dispatches to its subscriber.
#[derive(Debug, Clone)]
pub enum ApiSignal {
    /// Unsolicited state change pushed by the client.
    Notify { body: String },
    /// A submitted command was accepted onto the wire.
    CommandSent { command: Command },
    /// Terminal result for a previously submitted command.
    Reply { command: Command },
    /// Attachment lifecycle change.
    Attachment { status: AttachmentStatus },
}

/// Typed per-session callbacks (delegate integration).
pub trait ApiDelegate: Send + Sync {
    fn on_notification(&self, body: &str);
    fn on_command_echo(&self, command: &Command);
    fn on_reply(&self, command: &Command);
    fn on_attachment_status(&self, status: AttachmentStatus);
}

/// Observer tap: sees every signal the client dispatches, after the
/// transport's own bookkeeping has already run.
pub type SignalObserver = Box<dyn Fn(&ApiSignal) + Send + Sync>;

/// How signals leave the transport. Registered once, when the session is
/// constructed; a later registration replaces the earlier one.
pub enum SignalRoute {
    Observer(SignalObserver),
    Delegate(Arc<dyn ApiDelegate>),
}

impl SignalRoute {
    /// Single dispatch point so both integrations see identical signals.
    pub fn deliver(&self, signal: &ApiSignal) {
        match self {
            SignalRoute::Observer(tap) => tap(signal),
            SignalRoute::Delegate(delegate) => match signal {
                ApiSignal::Notify { body } => delegate.on_notification(body),
                ApiSignal::CommandSent { command } => delegate.on_command_echo(command),
                ApiSignal::Reply { command } => delegate.on_reply(command),
                ApiSignal::Attachment { status } => delegate.on_attachment_status(*status),
            },
        }
    }
}

/// Errors surfaced while establishing an attachment.
#[derive(Debug)]
pub enum AttachError {
    /// The client socket could not be reached.
    Unreachable(io::Error),
    /// The client answered the handshake but turned us away.
    Refused(String),
    /// The client answered with something that is not a protocol grant.
    ProtocolRejected(String),
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::Unreachable(err) => write!(f, "client unreachable: {err}"),
            AttachError::Refused(reason) => write!(f, "client refused attachment: {reason}"),
            AttachError::ProtocolRejected(answer) => {
                write!(f, "client rejected protocol negotiation: {answer}")
            }
        }
    }
}

impl std::error::Error for AttachError {}

/// Errors surfaced when a command cannot be handed to the client.
#[derive(Debug)]
pub enum SubmitError {
    /// No live attachment to write through.
    NotAttached,
    /// The write to the client failed mid-flight.
    Io(io::Error),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::NotAttached => write!(f, "no live attachment to the client"),
            SubmitError::Io(err) => write!(f, "command write failed: {err}"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// The client automation API capability set. Implementations own the wire
/// protocol and the threads that deliver signals.
pub trait ClientApi: Send + Sync {
    /// Negotiate an attachment at `protocol`, returning the granted version.
    /// Callable repeatedly; an existing attachment is replaced.
    fn attach(&self, protocol: u32) -> Result<u32, AttachError>;

    /// Hand one command to the client.
    fn send_command(&self, command: Command) -> Result<(), SubmitError>;

    /// Install the signal route.
    fn set_route(&self, route: SignalRoute);
}
