use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use crate::inventory::manager::{OperationResult, SHARED_STASH_COUNT};
use crate::net::wire::{self, ContainerSnapshot, FrameDecode, MessageKind};
use crate::telemetry::logging;

pub use crate::net::wire::{MoveItemRequest, SplitStackRequest};

const LOGIN_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the server can push to a connected client, already parsed into
/// owned values. Raw frames never cross the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    PersonalSync(ContainerSnapshot),
    StashSync {
        index: u8,
        snapshot: ContainerSnapshot,
    },
    OperationOutcome {
        result: OperationResult,
        message: Option<String>,
    },
    HeartbeatReply,
    ServerShutdown,
    Disconnected,
}

/// Connection to a running server. `connect` blocks until the login reply
/// arrives; afterwards a reader thread turns incoming frames into
/// `ClientEvent`s on an unbounded channel.
#[derive(Debug)]
pub struct StashClient {
    identity: String,
    stream: TcpStream,
    events: Receiver<ClientEvent>,
    reader: Option<thread::JoinHandle<()>>,
}

impl StashClient {
    pub fn connect<A: ToSocketAddrs>(addr: A, identity: &str) -> Result<Self, String> {
        if !wire::identity_is_valid(identity) {
            return Err(format!(
                "identity must be 1 to {} bytes",
                wire::IDENTITY_MAX_LEN
            ));
        }

        let mut stream =
            TcpStream::connect(addr).map_err(|err| format!("connect failed: {}", err))?;
        stream
            .set_read_timeout(Some(LOGIN_REPLY_TIMEOUT))
            .map_err(|err| format!("set read timeout failed: {}", err))?;

        stream
            .write_all(&wire::encode_frame(
                MessageKind::LoginRequest,
                &wire::build_login_request(identity),
            ))
            .map_err(|err| format!("send login failed: {}", err))?;

        // The server may batch the login reply with the first snapshots, so
        // whatever trails the reply stays buffered for the reader thread.
        let mut leftover = Vec::new();
        let (kind, payload) = read_frame_blocking(&mut stream, &mut leftover)?;
        match MessageKind::from_u8(kind) {
            Some(MessageKind::LoginResponse) => {
                wire::parse_login_response(&payload)?;
            }
            Some(MessageKind::LoginRejected) => {
                let reason = wire::parse_login_rejected(&payload)?;
                return Err(format!("login rejected: {}", reason.describe()));
            }
            _ => return Err(format!("unexpected login reply of type {}", kind)),
        }

        stream
            .set_read_timeout(None)
            .map_err(|err| format!("clear read timeout failed: {}", err))?;
        let reader_stream = stream
            .try_clone()
            .map_err(|err| format!("clone stream failed: {}", err))?;

        logging::log_netload(&format!("logged in as {}", identity));

        let (event_tx, event_rx) = mpsc::channel();
        let reader = thread::spawn(move || run_reader(reader_stream, leftover, event_tx));

        Ok(Self {
            identity: identity.to_string(),
            stream,
            events: event_rx,
            reader: Some(reader),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn events(&self) -> &Receiver<ClientEvent> {
        &self.events
    }

    pub fn next_event(&self, timeout: Duration) -> Result<ClientEvent, String> {
        self.events
            .recv_timeout(timeout)
            .map_err(|err| format!("no event within {:?}: {}", timeout, err))
    }

    pub fn request_move(&mut self, request: MoveItemRequest) -> Result<(), String> {
        self.send_frame(
            MessageKind::MoveItemRequest,
            &wire::build_move_item(&request),
        )
    }

    pub fn request_split(&mut self, request: SplitStackRequest) -> Result<(), String> {
        self.send_frame(
            MessageKind::SplitStackRequest,
            &wire::build_split_stack(&request),
        )
    }

    pub fn send_heartbeat(&mut self) -> Result<(), String> {
        self.send_frame(MessageKind::Heartbeat, &[])
    }

    /// Announces the disconnect and closes the connection. Dropping the
    /// client without calling this closes the socket without the announce.
    pub fn disconnect(mut self) -> Result<(), String> {
        self.send_frame(MessageKind::Disconnect, &[])
    }

    fn send_frame(&mut self, kind: MessageKind, payload: &[u8]) -> Result<(), String> {
        self.stream
            .write_all(&wire::encode_frame(kind, payload))
            .map_err(|err| format!("send failed: {}", err))
    }
}

impl Drop for StashClient {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

/// Reads until a whole frame is buffered, returning it and leaving any extra
/// bytes in `buffer`.
fn read_frame_blocking(
    stream: &mut TcpStream,
    buffer: &mut Vec<u8>,
) -> Result<(u8, Vec<u8>), String> {
    let mut chunk = [0u8; 4096];
    loop {
        match wire::decode_frame(buffer, wire::MAX_FRAME_PAYLOAD) {
            Ok(FrameDecode::Frame {
                kind,
                payload,
                consumed,
            }) => {
                let payload = payload.to_vec();
                buffer.drain(..consumed);
                return Ok((kind, payload));
            }
            Ok(FrameDecode::Incomplete) => {}
            Err(err) => return Err(err.message),
        }
        match stream.read(&mut chunk) {
            Ok(0) => return Err("connection closed during login".to_string()),
            Ok(read) => buffer.extend_from_slice(&chunk[..read]),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(format!("read failed: {}", err)),
        }
    }
}

fn run_reader(mut stream: TcpStream, mut buffer: Vec<u8>, events: Sender<ClientEvent>) {
    let mut chunk = [0u8; 4096];
    loop {
        loop {
            match wire::decode_frame(&buffer, wire::MAX_FRAME_PAYLOAD) {
                Ok(FrameDecode::Frame {
                    kind,
                    payload,
                    consumed,
                }) => {
                    let event = event_for(kind, payload);
                    buffer.drain(..consumed);
                    if let Some(event) = event {
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                }
                Ok(FrameDecode::Incomplete) => break,
                Err(err) => {
                    logging::log_error(&format!("dropping connection: {}", err.message));
                    let _ = events.send(ClientEvent::Disconnected);
                    return;
                }
            }
        }
        match stream.read(&mut chunk) {
            Ok(0) => {
                let _ = events.send(ClientEvent::Disconnected);
                return;
            }
            Ok(read) => buffer.extend_from_slice(&chunk[..read]),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => {
                let _ = events.send(ClientEvent::Disconnected);
                return;
            }
        }
    }
}

fn event_for(kind: u8, payload: &[u8]) -> Option<ClientEvent> {
    let Some(kind) = MessageKind::from_u8(kind) else {
        logging::log_error(&format!("ignoring frame with unknown type {}", kind));
        return None;
    };
    match kind {
        MessageKind::InventoryFullSync => match wire::parse_snapshot(payload) {
            Ok(snapshot) => Some(ClientEvent::PersonalSync(snapshot)),
            Err(err) => {
                logging::log_error(&format!("bad inventory sync: {}", err.message));
                None
            }
        },
        MessageKind::SharedStashUpdate => match wire::parse_stash_update(payload) {
            Ok((index, snapshot)) if index < SHARED_STASH_COUNT => {
                Some(ClientEvent::StashSync { index, snapshot })
            }
            Ok((index, _)) => {
                logging::log_error(&format!("stash update for unknown stash {}", index));
                None
            }
            Err(err) => {
                logging::log_error(&format!("bad stash update: {}", err.message));
                None
            }
        },
        MessageKind::OperationResult => match wire::parse_operation_result(payload) {
            Ok((result, message)) => Some(ClientEvent::OperationOutcome { result, message }),
            Err(err) => {
                logging::log_error(&format!("bad operation result: {}", err.message));
                None
            }
        },
        MessageKind::Heartbeat => Some(ClientEvent::HeartbeatReply),
        MessageKind::ServerShutdown => Some(ClientEvent::ServerShutdown),
        other => {
            logging::log_error(&format!(
                "ignoring unexpected frame of type {}",
                other.value()
            ));
            None
        }
    }
}
