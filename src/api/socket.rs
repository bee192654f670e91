//! Local-socket transport for the client automation API.
//!
//! Wire grammar, as spoken by the client's control socket:
//! - attach handshake: `NAME <name>` -> `OK` or `REFUSED <reason>`, then
//!   `PROTOCOL <requested>` -> `PROTOCOL <granted>` (the client may grant a
//!   lower version than requested)
//! - `#<id> <command>` submits a command; the matching reply comes back as
//!   `#<id> <result>`
//! - any other line from the client is an unsolicited notification
//!
//! Commands without a caller id get a transport-internal wire id, so replies
//! can always be correlated. The two id sources share the wire namespace; a
//! single run uses exactly one of them.

use super::{
    ApiSignal, AttachError, AttachmentStatus, ClientApi, Command, SignalRoute, SubmitError,
};
use crate::config::AppConfig;
use crate::{lock_or_recover, log_debug, log_debug_content};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Connection state: the writer half plus the table of commands awaiting
/// replies, keyed by wire id. `generation` rises on every successful attach
/// so a reader for a replaced connection retires silently.
struct Conn {
    stream: Option<UnixStream>,
    pending: HashMap<u64, Command>,
    generation: u64,
}

struct Shared {
    path: PathBuf,
    client_name: String,
    probe_interval: Duration,
    conn: Mutex<Conn>,
    route: Mutex<Option<SignalRoute>>,
    wire_seq: AtomicU64,
    probing: AtomicBool,
}

impl Shared {
    fn deliver(&self, signal: &ApiSignal) {
        let route = lock_or_recover(&self.route, "signal route");
        if let Some(route) = route.as_ref() {
            route.deliver(signal);
        }
    }
}

/// Client API over the local control socket.
pub struct SocketApi {
    shared: Arc<Shared>,
}

impl SocketApi {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_options(
            config.socket.clone(),
            config.client_name.clone(),
            Duration::from_millis(config.reconnect_probe_ms),
        )
    }

    pub fn with_options(path: PathBuf, client_name: String, probe_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                path,
                client_name,
                probe_interval,
                conn: Mutex::new(Conn {
                    stream: None,
                    pending: HashMap::new(),
                    generation: 0,
                }),
                route: Mutex::new(None),
                wire_seq: AtomicU64::new(1),
                probing: AtomicBool::new(false),
            }),
        }
    }
}

impl ClientApi for SocketApi {
    fn attach(&self, protocol: u32) -> Result<u32, AttachError> {
        attach(&self.shared, protocol)
    }

    fn send_command(&self, command: Command) -> Result<(), SubmitError> {
        send_command(&self.shared, command)
    }

    fn set_route(&self, route: SignalRoute) {
        *lock_or_recover(&self.shared.route, "signal route") = Some(route);
    }
}

fn attach(shared: &Arc<Shared>, protocol: u32) -> Result<u32, AttachError> {
    let stream = match UnixStream::connect(&shared.path) {
        Ok(stream) => stream,
        Err(err) => {
            // Keep watching for the client so a later availability signal
            // can restart the attachment.
            spawn_probe(shared);
            return Err(AttachError::Unreachable(err));
        }
    };

    // The handshake runs on the calling thread; the reader starts afterwards
    // with whatever the handshake left buffered.
    let mut reader = BufReader::new(stream.try_clone().map_err(AttachError::Unreachable)?);
    let mut writer = stream;

    write_handshake_line(&mut writer, &format!("NAME {}", shared.client_name))?;
    let answer = read_handshake_line(&mut reader)?;
    if answer != "OK" {
        return Err(AttachError::Refused(answer));
    }

    write_handshake_line(&mut writer, &format!("PROTOCOL {protocol}"))?;
    let answer = read_handshake_line(&mut reader)?;
    let granted = answer
        .strip_prefix("PROTOCOL ")
        .and_then(|version| version.parse::<u32>().ok())
        .ok_or(AttachError::ProtocolRejected(answer))?;

    let generation = {
        let mut conn = lock_or_recover(&shared.conn, "socket conn");
        if let Some(old) = conn.stream.take() {
            let _ = old.shutdown(Shutdown::Both);
        }
        conn.pending.clear();
        conn.generation += 1;
        conn.stream = Some(writer);
        conn.generation
    };

    spawn_reader(shared, reader, generation);
    log_debug(&format!(
        "attached to {} at protocol {granted}",
        shared.path.display()
    ));
    shared.deliver(&ApiSignal::Attachment {
        status: AttachmentStatus::Attached,
    });
    Ok(granted)
}

fn send_command(shared: &Arc<Shared>, command: Command) -> Result<(), SubmitError> {
    let wire_id = command
        .id
        .unwrap_or_else(|| shared.wire_seq.fetch_add(1, Ordering::Relaxed));
    let wire_line = format!("#{wire_id} {}\n", command.text);

    let mut conn = lock_or_recover(&shared.conn, "socket conn");
    let mut stream = match conn.stream.as_ref() {
        Some(stream) => stream.try_clone().map_err(SubmitError::Io)?,
        None => return Err(SubmitError::NotAttached),
    };
    // Register before the write so a fast reply always finds its command.
    conn.pending.insert(wire_id, command.clone());
    if let Err(err) = stream
        .write_all(wire_line.as_bytes())
        .and_then(|_| stream.flush())
    {
        conn.pending.remove(&wire_id);
        return Err(SubmitError::Io(err));
    }
    log_debug_content(&format!("sent command: {}", command.text));

    // The echo must reach the route before the reply can. The reply needs the
    // conn lock held here, so dispatching the echo now settles the order.
    shared.deliver(&ApiSignal::CommandSent { command });
    Ok(())
}

fn spawn_reader(shared: &Arc<Shared>, reader: BufReader<UnixStream>, generation: u64) {
    let shared = Arc::clone(shared);
    thread::spawn(move || {
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            handle_line(&shared, line.trim_end());
        }
        handle_disconnect(&shared, generation);
    });
}

fn handle_line(shared: &Arc<Shared>, line: &str) {
    if let Some(rest) = line.strip_prefix('#') {
        let (id_part, body) = rest.split_once(' ').unwrap_or((rest, ""));
        if let Ok(wire_id) = id_part.parse::<u64>() {
            let command = {
                let mut conn = lock_or_recover(&shared.conn, "socket conn");
                conn.pending.remove(&wire_id)
            };
            match command {
                Some(command) => shared.deliver(&ApiSignal::Reply {
                    command: command.with_reply(body),
                }),
                // Never relay replies this process did not ask for.
                None => log_debug(&format!("dropping reply for unknown command id {wire_id}")),
            }
            return;
        }
    }
    if line.is_empty() {
        return;
    }
    shared.deliver(&ApiSignal::Notify {
        body: line.to_string(),
    });
}

fn handle_disconnect(shared: &Arc<Shared>, generation: u64) {
    {
        let mut conn = lock_or_recover(&shared.conn, "socket conn");
        if conn.generation != generation {
            // A newer attach replaced this connection.
            return;
        }
        conn.stream = None;
        conn.pending.clear();
    }
    log_debug("client connection lost");
    shared.deliver(&ApiSignal::Attachment {
        status: AttachmentStatus::NotAvailable,
    });
    spawn_probe(shared);
}

/// Watch for the client to come back, then announce availability once. The
/// attachment manager reacts by issuing a fresh attach.
fn spawn_probe(shared: &Arc<Shared>) {
    if shared.probing.swap(true, Ordering::SeqCst) {
        return;
    }
    let shared = Arc::clone(shared);
    thread::spawn(move || {
        loop {
            thread::sleep(shared.probe_interval);
            if UnixStream::connect(&shared.path).is_ok() {
                break;
            }
        }
        shared.probing.store(false, Ordering::SeqCst);
        log_debug("client reachable again");
        shared.deliver(&ApiSignal::Attachment {
            status: AttachmentStatus::Available,
        });
    });
}

fn write_handshake_line(stream: &mut UnixStream, line: &str) -> Result<(), AttachError> {
    stream
        .write_all(format!("{line}\n").as_bytes())
        .and_then(|_| stream.flush())
        .map_err(AttachError::Unreachable)
}

fn read_handshake_line(reader: &mut BufReader<UnixStream>) -> Result<String, AttachError> {
    let mut line = String::new();
    let read = reader.read_line(&mut line).map_err(AttachError::Unreachable)?;
    if read == 0 {
        return Err(AttachError::Unreachable(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "client closed the socket during handshake",
        )));
    }
    Ok(line.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::time::{Instant, SystemTime, UNIX_EPOCH};

    fn stub_socket_path(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("skybridge_stub_{tag}_{nanos}.sock"))
    }

    fn recording_route(signals: Arc<Mutex<Vec<ApiSignal>>>) -> SignalRoute {
        SignalRoute::Observer(Box::new(move |signal| {
            signals.lock().unwrap().push(signal.clone());
        }))
    }

    fn wait_for_signals(
        signals: &Arc<Mutex<Vec<ApiSignal>>>,
        at_least: usize,
        timeout: Duration,
    ) -> Vec<ApiSignal> {
        let start = Instant::now();
        loop {
            {
                let seen = signals.lock().unwrap();
                if seen.len() >= at_least {
                    return seen.clone();
                }
            }
            if start.elapsed() > timeout {
                return signals.lock().unwrap().clone();
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Accept one connection, answer the handshake, then run `session` on the
    /// established stream.
    fn spawn_stub_client<F>(
        listener: UnixListener,
        granted: u32,
        session: F,
    ) -> thread::JoinHandle<()>
    where
        F: FnOnce(BufReader<UnixStream>, UnixStream) + Send + 'static,
    {
        thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept bridge connection");
            let mut reader = BufReader::new(stream.try_clone().expect("clone stub stream"));
            let mut writer = stream;

            let mut line = String::new();
            reader.read_line(&mut line).expect("read NAME line");
            assert!(line.starts_with("NAME "), "unexpected handshake: {line}");
            writer.write_all(b"OK\n").expect("write OK");

            line.clear();
            reader.read_line(&mut line).expect("read PROTOCOL line");
            assert!(line.starts_with("PROTOCOL "), "unexpected handshake: {line}");
            writer
                .write_all(format!("PROTOCOL {granted}\n").as_bytes())
                .expect("write grant");

            session(reader, writer);
        })
    }

    fn test_api(path: &PathBuf) -> SocketApi {
        SocketApi::with_options(
            path.clone(),
            "skybridge-test".to_string(),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn attach_negotiates_protocol_version() {
        let path = stub_socket_path("attach");
        let listener = UnixListener::bind(&path).unwrap();
        let stub = spawn_stub_client(listener, 8, |_reader, _writer| {});

        let api = test_api(&path);
        let signals = Arc::new(Mutex::new(Vec::new()));
        api.set_route(recording_route(Arc::clone(&signals)));

        let granted = api.attach(8).expect("attach succeeds");
        assert_eq!(granted, 8);
        let seen = wait_for_signals(&signals, 1, Duration::from_secs(2));
        assert!(seen.iter().any(|signal| matches!(
            signal,
            ApiSignal::Attachment {
                status: AttachmentStatus::Attached
            }
        )));

        drop(api);
        stub.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn attach_accepts_lower_granted_version() {
        let path = stub_socket_path("downgrade");
        let listener = UnixListener::bind(&path).unwrap();
        let stub = spawn_stub_client(listener, 5, |_reader, _writer| {});

        let api = test_api(&path);
        assert_eq!(api.attach(8).expect("attach succeeds"), 5);

        stub.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn attach_fails_when_socket_missing() {
        let path = stub_socket_path("missing");
        let api = test_api(&path);
        match api.attach(8) {
            Err(AttachError::Unreachable(_)) => {}
            other => panic!("expected Unreachable, got {other:?}"),
        }
    }

    #[test]
    fn attach_surfaces_refusal() {
        let path = stub_socket_path("refused");
        let listener = UnixListener::bind(&path).unwrap();
        let stub = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            writer.write_all(b"REFUSED client busy\n").unwrap();
        });

        let api = test_api(&path);
        match api.attach(8) {
            Err(AttachError::Refused(reason)) => assert!(reason.contains("busy")),
            other => panic!("expected Refused, got {other:?}"),
        }

        stub.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn attach_rejects_malformed_protocol_grant() {
        let path = stub_socket_path("badgrant");
        let listener = UnixListener::bind(&path).unwrap();
        let stub = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            writer.write_all(b"OK\n").unwrap();
            line.clear();
            reader.read_line(&mut line).unwrap();
            writer.write_all(b"WHATEVER\n").unwrap();
        });

        let api = test_api(&path);
        assert!(matches!(
            api.attach(8),
            Err(AttachError::ProtocolRejected(_))
        ));

        stub.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn command_round_trip_echo_then_reply() {
        let path = stub_socket_path("roundtrip");
        let listener = UnixListener::bind(&path).unwrap();
        let stub = spawn_stub_client(listener, 8, |mut reader, mut writer| {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read command");
            assert_eq!(line.trim_end(), "#1 GET SKYPENAME");
            writer.write_all(b"#1 SKYPENAME testuser\n").unwrap();
        });

        let api = test_api(&path);
        let signals = Arc::new(Mutex::new(Vec::new()));
        api.set_route(recording_route(Arc::clone(&signals)));
        api.attach(8).expect("attach succeeds");

        api.send_command(Command::new("GET SKYPENAME", Some(1)))
            .expect("send succeeds");

        // Attached + echo + reply.
        let seen = wait_for_signals(&signals, 3, Duration::from_secs(2));
        let echo_at = seen
            .iter()
            .position(|signal| matches!(signal, ApiSignal::CommandSent { .. }))
            .expect("echo dispatched");
        let reply_at = seen
            .iter()
            .position(|signal| matches!(signal, ApiSignal::Reply { .. }))
            .expect("reply dispatched");
        assert!(echo_at < reply_at, "echo must precede the reply");
        match &seen[reply_at] {
            ApiSignal::Reply { command } => {
                assert_eq!(command.id, Some(1));
                assert_eq!(command.text, "GET SKYPENAME");
                assert_eq!(command.reply.as_deref(), Some("SKYPENAME testuser"));
            }
            _ => unreachable!(),
        }

        drop(api);
        stub.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn untagged_commands_get_internal_wire_ids() {
        let path = stub_socket_path("untagged");
        let listener = UnixListener::bind(&path).unwrap();
        let stub = spawn_stub_client(listener, 8, |mut reader, mut writer| {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read command");
            assert_eq!(line.trim_end(), "#1 PING");
            writer.write_all(b"#1 PONG\n").unwrap();
            line.clear();
            reader.read_line(&mut line).expect("read second command");
            assert_eq!(line.trim_end(), "#2 PING");
        });

        let api = test_api(&path);
        let signals = Arc::new(Mutex::new(Vec::new()));
        api.set_route(recording_route(Arc::clone(&signals)));
        api.attach(8).expect("attach succeeds");

        api.send_command(Command::new("PING", None)).unwrap();
        api.send_command(Command::new("PING", None)).unwrap();

        let seen = wait_for_signals(&signals, 4, Duration::from_secs(2));
        let reply = seen
            .iter()
            .find_map(|signal| match signal {
                ApiSignal::Reply { command } => Some(command.clone()),
                _ => None,
            })
            .expect("reply dispatched");
        // The wire id stays transport-internal; the command keeps no caller id.
        assert_eq!(reply.id, None);
        assert_eq!(reply.reply.as_deref(), Some("PONG"));

        drop(api);
        stub.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unknown_reply_ids_are_dropped() {
        let path = stub_socket_path("foreign");
        let listener = UnixListener::bind(&path).unwrap();
        let stub = spawn_stub_client(listener, 8, |_reader, mut writer| {
            writer.write_all(b"#99 SOMEONE ELSES REPLY\n").unwrap();
            writer.write_all(b"CALL 1 STATUS RINGING\n").unwrap();
        });

        let api = test_api(&path);
        let signals = Arc::new(Mutex::new(Vec::new()));
        api.set_route(recording_route(Arc::clone(&signals)));
        api.attach(8).expect("attach succeeds");

        // Wait until the notification arrives; the foreign reply came first
        // on the same stream, so by now it has been dropped or delivered.
        let seen = wait_for_signals(&signals, 2, Duration::from_secs(2));
        assert!(seen
            .iter()
            .any(|signal| matches!(signal, ApiSignal::Notify { body } if body == "CALL 1 STATUS RINGING")));
        assert!(!seen
            .iter()
            .any(|signal| matches!(signal, ApiSignal::Reply { .. })));

        drop(api);
        stub.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn disconnect_reports_not_available_then_available() {
        let path = stub_socket_path("reattach");
        // The listener outlives the stub thread so the reconnect probe finds
        // the client still bound after the connection drops.
        let listener = UnixListener::bind(&path).unwrap();
        let stub_listener = listener.try_clone().unwrap();
        let stub = spawn_stub_client(stub_listener, 8, |_reader, writer| {
            drop(writer);
        });

        let api = test_api(&path);
        let signals = Arc::new(Mutex::new(Vec::new()));
        api.set_route(recording_route(Arc::clone(&signals)));
        api.attach(8).expect("attach succeeds");
        stub.join().unwrap();

        let seen = wait_for_signals(&signals, 3, Duration::from_secs(2));
        let lost_at = seen
            .iter()
            .position(|signal| matches!(
                signal,
                ApiSignal::Attachment {
                    status: AttachmentStatus::NotAvailable
                }
            ))
            .expect("disconnect reported");
        let available_at = seen
            .iter()
            .position(|signal| matches!(
                signal,
                ApiSignal::Attachment {
                    status: AttachmentStatus::Available
                }
            ))
            .expect("availability reported");
        assert!(lost_at < available_at);

        drop(listener);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn send_without_attachment_fails() {
        let path = stub_socket_path("noattach");
        let api = test_api(&path);
        assert!(matches!(
            api.send_command(Command::new("PING", None)),
            Err(SubmitError::NotAttached)
        ));
    }
}
