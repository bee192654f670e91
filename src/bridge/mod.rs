//! Stdio bridge between a parent process and the client automation API.
//!
//! Architecture:
//! - Stdin reader thread: hands command lines to the ingest loop via a channel
//! - Ingest loop (main thread): tags commands and submits them to the session
//! - Client API threads: deliver signals that the relay serializes to stdout
//!
//! Protocol: each stdout line is one JSON object
//! `{"type": <kind>, "payload": <payload>}`.

mod protocol;
mod relay;
mod session;


pub use protocol::{BridgeEvent, EchoPayload, ReplyPayload};
pub use relay::{observer_route, BridgeDelegate, EventSink};
pub use session::{run_bridge, AttachState, CommandSeq, Session};
