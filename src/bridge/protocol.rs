//! JSON event protocol emitted to the parent process.
//!
//! Every event is a single line, discriminated by the `type` field with the
//! body under `payload`. Echoes and replies for commands that carried a
//! caller id keep that id in a structured payload; commands submitted without
//! one relay bare text, exactly as the untagged bridge variant always did.

use crate::api::Command;
use serde::Serialize;

/// Events emitted to the parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum BridgeEvent {
    /// Unsolicited client state change.
    Notification(String),
    /// Echo of a command accepted by the client.
    Command(EchoPayload),
    /// Terminal result of a previously submitted command.
    Reply(ReplyPayload),
}

/// Command-echo payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EchoPayload {
    Bare(String),
    Tagged { id: u64, command: String },
}

/// Reply payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReplyPayload {
    Bare(String),
    Tagged {
        id: u64,
        command: String,
        reply: String,
    },
}

impl BridgeEvent {
    pub fn notification(body: impl Into<String>) -> Self {
        BridgeEvent::Notification(body.into())
    }

    /// Echo for a submitted command; the payload shape follows the presence
    /// of a caller id.
    pub fn command_echo(command: &Command) -> Self {
        match command.id {
            Some(id) => BridgeEvent::Command(EchoPayload::Tagged {
                id,
                command: command.text.clone(),
            }),
            None => BridgeEvent::Command(EchoPayload::Bare(command.text.clone())),
        }
    }

    /// Reply for a completed command.
    pub fn reply(command: &Command) -> Self {
        let reply = command.reply.clone().unwrap_or_default();
        match command.id {
            Some(id) => BridgeEvent::Reply(ReplyPayload::Tagged {
                id,
                command: command.text.clone(),
                reply,
            }),
            None => BridgeEvent::Reply(ReplyPayload::Bare(reply)),
        }
    }
}
