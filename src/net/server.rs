use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::entities::item::ItemDefId;
use crate::inventory::grid::GridPosition;
use crate::inventory::manager::{ContainerRef, InventoryManager, OperationResult, SHARED_STASH_COUNT};
use crate::net::wire::{self, ContainerSnapshot, FrameDecode, LoginReject, MessageKind};
use crate::telemetry::logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerSignal {
    Running = 0,
    Shutdown = 1,
}

#[derive(Debug)]
pub struct ServerControl {
    signal: AtomicU8,
}

impl ServerControl {
    pub fn new() -> Self {
        Self {
            signal: AtomicU8::new(ServerSignal::Running as u8),
        }
    }

    pub fn request_shutdown(&self) {
        self.signal
            .store(ServerSignal::Shutdown as u8, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.signal.load(Ordering::SeqCst) == ServerSignal::Running as u8
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Logged-in session cap, 0 for unlimited.
    pub max_clients: usize,
    pub max_frame_payload: u32,
    pub tick_sleep: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7777".to_string(),
            max_clients: 0,
            max_frame_payload: wire::MAX_FRAME_PAYLOAD,
            tick_sleep: Duration::from_millis(10),
            shutdown_grace: Duration::from_millis(100),
        }
    }
}

/// Console-side requests that must run on the server loop. Each carries its
/// own reply channel.
pub enum AdminRequest {
    GiveItem {
        identity: String,
        item_id: u32,
        count: u32,
        reply: Sender<Result<String, String>>,
    },
    ListPlayers {
        reply: Sender<Vec<String>>,
    },
}

/// Generation-checked handle into the session arena. A handle from before a
/// disconnect can never address the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId {
    index: usize,
    generation: u64,
}

struct Session {
    generation: u64,
    stream: TcpStream,
    peer: SocketAddr,
    identity: Option<String>,
    recv_buffer: Vec<u8>,
    // tracked per received frame, never enforced
    last_activity: Instant,
}

struct SessionArena {
    slots: Vec<Option<Session>>,
    generations: Vec<u64>,
    by_identity: BTreeMap<String, SessionId>,
}

impl SessionArena {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            by_identity: BTreeMap::new(),
        }
    }

    fn insert(&mut self, stream: TcpStream, peer: SocketAddr) -> SessionId {
        let index = match self.slots.iter().position(|slot| slot.is_none()) {
            Some(index) => index,
            None => {
                self.slots.push(None);
                self.generations.push(0);
                self.slots.len() - 1
            }
        };
        self.generations[index] += 1;
        let generation = self.generations[index];
        self.slots[index] = Some(Session {
            generation,
            stream,
            peer,
            identity: None,
            recv_buffer: Vec::new(),
            last_activity: Instant::now(),
        });
        SessionId { index, generation }
    }

    fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.slots
            .get_mut(id.index)?
            .as_mut()
            .filter(|session| session.generation == id.generation)
    }

    fn remove(&mut self, id: SessionId) -> Option<Session> {
        let slot = self.slots.get_mut(id.index)?;
        let matches = slot
            .as_ref()
            .map(|session| session.generation == id.generation)
            .unwrap_or(false);
        if !matches {
            return None;
        }
        let session = slot.take()?;
        if let Some(identity) = session.identity.as_ref() {
            self.by_identity.remove(identity);
        }
        Some(session)
    }

    fn bind_identity(&mut self, id: SessionId, identity: &str) {
        let Some(session) = self
            .slots
            .get_mut(id.index)
            .and_then(|slot| slot.as_mut())
        else {
            return;
        };
        if session.generation != id.generation {
            return;
        }
        session.identity = Some(identity.to_string());
        self.by_identity.insert(identity.to_string(), id);
    }

    fn identity_of(&self, id: SessionId) -> Option<String> {
        self.slots
            .get(id.index)?
            .as_ref()
            .filter(|session| session.generation == id.generation)?
            .identity
            .clone()
    }

    fn identity_connected(&self, identity: &str) -> bool {
        self.by_identity.contains_key(identity)
    }

    fn session_of(&self, identity: &str) -> Option<SessionId> {
        self.by_identity.get(identity).copied()
    }

    fn connected_count(&self) -> usize {
        self.by_identity.len()
    }

    fn identities(&self) -> Vec<String> {
        self.by_identity.keys().cloned().collect()
    }

    fn ids(&self) -> Vec<SessionId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref().map(|session| SessionId {
                    index,
                    generation: session.generation,
                })
            })
            .collect()
    }
}

pub fn run_server(
    config: ServerConfig,
    manager: InventoryManager,
    control: Arc<ServerControl>,
    admin: Receiver<AdminRequest>,
) -> Result<(), String> {
    let listener = TcpListener::bind(&config.bind_addr)
        .map_err(|err| format!("bind {} failed: {}", config.bind_addr, err))?;
    serve(listener, config, manager, control, admin)
}

pub(crate) fn serve(
    listener: TcpListener,
    config: ServerConfig,
    mut manager: InventoryManager,
    control: Arc<ServerControl>,
    admin: Receiver<AdminRequest>,
) -> Result<(), String> {
    listener
        .set_nonblocking(true)
        .map_err(|err| format!("listener nonblocking failed: {}", err))?;

    let bind_addr = listener
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| config.bind_addr.clone());
    logging::log_game(&format!("server listening on {}", bind_addr));
    println!("stashd: server listening on {}", bind_addr);

    let mut sessions = SessionArena::new();

    while control.is_running() {
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        logging::log_error(&format!("session nonblocking failed: {}", err));
                        eprintln!("stashd: session nonblocking failed: {}", err);
                        continue;
                    }
                    sessions.insert(stream, addr);
                    logging::log_netload(&format!("connection from {}", addr));
                    println!("stashd: connection from {}", addr);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    logging::log_error(&format!("accept error: {}", err));
                    eprintln!("stashd: accept error: {}", err);
                    break;
                }
            }
        }

        for id in sessions.ids() {
            if let Err(reason) = service_session(&mut sessions, id, &mut manager, &config) {
                drop_session(&mut sessions, id, &reason);
            }
        }

        while let Ok(request) = admin.try_recv() {
            match request {
                AdminRequest::GiveItem {
                    identity,
                    item_id,
                    count,
                    reply,
                } => {
                    let outcome =
                        handle_give(&mut sessions, &mut manager, &identity, item_id, count);
                    let _ = reply.send(outcome);
                }
                AdminRequest::ListPlayers { reply } => {
                    let _ = reply.send(sessions.identities());
                }
            }
        }

        thread::sleep(config.tick_sleep);
    }

    logging::log_game("server shutting down");
    println!("stashd: shutting down");
    let shutdown_frame = wire::encode_frame(MessageKind::ServerShutdown, &[]);
    for id in sessions.ids() {
        if let Some(session) = sessions.get_mut(id) {
            let _ = write_frame(&mut session.stream, &shutdown_frame);
        }
    }
    thread::sleep(config.shutdown_grace);
    Ok(())
}

/// Reads whatever the socket has buffered, then dispatches every complete
/// frame in arrival order. An `Err` means the connection must go away.
fn service_session(
    sessions: &mut SessionArena,
    id: SessionId,
    manager: &mut InventoryManager,
    config: &ServerConfig,
) -> Result<(), String> {
    let (frames, eof) = {
        let Some(session) = sessions.get_mut(id) else {
            return Ok(());
        };
        let mut eof = false;
        let mut chunk = [0u8; 4096];
        loop {
            match session.stream.read(&mut chunk) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(read) => session.recv_buffer.extend_from_slice(&chunk[..read]),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(format!("read failed: {}", err)),
            }
        }

        let mut frames = Vec::new();
        loop {
            match wire::decode_frame(&session.recv_buffer, config.max_frame_payload) {
                Ok(FrameDecode::Incomplete) => break,
                Ok(FrameDecode::Frame {
                    kind,
                    payload,
                    consumed,
                }) => {
                    frames.push((kind, payload.to_vec()));
                    session.recv_buffer.drain(..consumed);
                    session.last_activity = Instant::now();
                }
                Err(err) => return Err(err.message),
            }
        }
        (frames, eof)
    };

    for (kind, payload) in frames {
        dispatch_frame(sessions, id, manager, config, kind, &payload)?;
    }

    if eof {
        return Err("connection closed".to_string());
    }
    Ok(())
}

fn dispatch_frame(
    sessions: &mut SessionArena,
    id: SessionId,
    manager: &mut InventoryManager,
    config: &ServerConfig,
    kind: u8,
    payload: &[u8],
) -> Result<(), String> {
    let Some(kind) = MessageKind::from_u8(kind) else {
        logging::log_error(&format!("dropping frame with unknown type {}", kind));
        return Ok(());
    };
    match kind {
        MessageKind::LoginRequest => handle_login(sessions, id, manager, config, payload),
        MessageKind::Disconnect => {
            drop_session(sessions, id, "disconnect requested");
            Ok(())
        }
        MessageKind::Heartbeat => send_to(sessions, id, MessageKind::Heartbeat, &[]),
        MessageKind::MoveItemRequest => handle_move(sessions, id, manager, payload),
        MessageKind::SplitStackRequest => handle_split(sessions, id, manager, payload),
        other => {
            logging::log_error(&format!(
                "dropping server-bound frame of type {}",
                other.value()
            ));
            Ok(())
        }
    }
}

fn handle_login(
    sessions: &mut SessionArena,
    id: SessionId,
    manager: &mut InventoryManager,
    config: &ServerConfig,
    payload: &[u8],
) -> Result<(), String> {
    let identity = wire::parse_login_request(payload);
    println!("stashd: login request for '{}'", identity);

    let reject = if !wire::identity_is_valid(&identity) {
        Some(LoginReject::InvalidIdentity)
    } else if sessions.identity_connected(&identity) {
        Some(LoginReject::AlreadyConnected)
    } else if config.max_clients > 0 && sessions.connected_count() >= config.max_clients {
        Some(LoginReject::ServerFull)
    } else {
        None
    };

    if let Some(reason) = reject {
        send_to(
            sessions,
            id,
            MessageKind::LoginRejected,
            &wire::build_login_rejected(reason),
        )?;
        return Err(format!("login rejected: {}", reason.describe()));
    }

    sessions.bind_identity(id, &identity);
    manager.personal_or_create(&identity);

    logging::log_game(&format!("login accepted for {}", identity));
    println!("stashd: login accepted for {}", identity);

    send_to(
        sessions,
        id,
        MessageKind::LoginResponse,
        &wire::build_login_response(),
    )?;
    push_personal_sync(sessions, id, manager, &identity)?;
    for index in 0..SHARED_STASH_COUNT {
        push_stash_sync(sessions, id, manager, index)?;
    }
    Ok(())
}

fn handle_move(
    sessions: &mut SessionArena,
    id: SessionId,
    manager: &mut InventoryManager,
    payload: &[u8],
) -> Result<(), String> {
    let Some(identity) = sessions.identity_of(id) else {
        return Ok(());
    };
    let request = match wire::parse_move_item(payload) {
        Ok(request) => request,
        Err(err) => {
            logging::log_error(&format!("bad move request from {}: {}", identity, err.message));
            eprintln!("stashd: bad move request from {}: {}", identity, err.message);
            return Ok(());
        }
    };

    let result = manager.move_item(
        &identity,
        request.source_container,
        GridPosition::new(i32::from(request.source_x), i32::from(request.source_y)),
        request.dest_container,
        GridPosition::new(i32::from(request.dest_x), i32::from(request.dest_y)),
    );
    logging::log_game(&format!(
        "{} move {}:{},{} -> {}:{},{}: {}",
        identity,
        request.source_container,
        request.source_x,
        request.source_y,
        request.dest_container,
        request.dest_x,
        request.dest_y,
        result.describe()
    ));

    send_to(
        sessions,
        id,
        MessageKind::OperationResult,
        &wire::build_operation_result(result),
    )?;

    if result == OperationResult::Success {
        if request.source_container == 0 || request.dest_container == 0 {
            push_personal_sync(sessions, id, manager, &identity)?;
        }
        if let Some(index) = stash_index_of_code(request.source_container) {
            broadcast_stash(sessions, manager, index);
        }
        if request.dest_container != request.source_container {
            if let Some(index) = stash_index_of_code(request.dest_container) {
                broadcast_stash(sessions, manager, index);
            }
        }
    }
    Ok(())
}

fn handle_split(
    sessions: &mut SessionArena,
    id: SessionId,
    manager: &mut InventoryManager,
    payload: &[u8],
) -> Result<(), String> {
    let Some(identity) = sessions.identity_of(id) else {
        return Ok(());
    };
    let request = match wire::parse_split_stack(payload) {
        Ok(request) => request,
        Err(err) => {
            logging::log_error(&format!(
                "bad split request from {}: {}",
                identity, err.message
            ));
            eprintln!("stashd: bad split request from {}: {}", identity, err.message);
            return Ok(());
        }
    };

    let result = manager.split_stack(
        &identity,
        request.container,
        GridPosition::new(i32::from(request.x), i32::from(request.y)),
        request.amount,
        GridPosition::new(i32::from(request.dest_x), i32::from(request.dest_y)),
    );
    logging::log_game(&format!(
        "{} split {}:{},{} amount {} -> {},{}: {}",
        identity,
        request.container,
        request.x,
        request.y,
        request.amount,
        request.dest_x,
        request.dest_y,
        result.describe()
    ));

    send_to(
        sessions,
        id,
        MessageKind::OperationResult,
        &wire::build_operation_result(result),
    )?;

    if result == OperationResult::Success {
        if request.container == 0 {
            push_personal_sync(sessions, id, manager, &identity)?;
        } else if let Some(index) = stash_index_of_code(request.container) {
            broadcast_stash(sessions, manager, index);
        }
    }
    Ok(())
}

fn handle_give(
    sessions: &mut SessionArena,
    manager: &mut InventoryManager,
    identity: &str,
    item_id: u32,
    count: u32,
) -> Result<String, String> {
    let pos = manager.give_item(identity, item_id, count)?;
    let name = manager
        .catalog()
        .find(ItemDefId(item_id))
        .map(|item| item.name.clone())
        .unwrap_or_else(|| format!("item {}", item_id));
    let summary = format!("gave {} x {} to {} at {},{}", count, name, identity, pos.x, pos.y);
    logging::log_game(&summary);

    if let Some(id) = sessions.session_of(identity) {
        if let Err(err) = push_personal_sync(sessions, id, manager, identity) {
            drop_session(sessions, id, &err);
        }
    }
    Ok(summary)
}

fn stash_index_of_code(code: u8) -> Option<u8> {
    ContainerRef::from_code(code).and_then(|container| container.stash_index())
}

fn push_personal_sync(
    sessions: &mut SessionArena,
    id: SessionId,
    manager: &InventoryManager,
    identity: &str,
) -> Result<(), String> {
    let Some(store) = manager.personal(identity) else {
        return Ok(());
    };
    let payload = wire::build_snapshot(&ContainerSnapshot::from_store(store));
    send_to(sessions, id, MessageKind::InventoryFullSync, &payload)
}

fn push_stash_sync(
    sessions: &mut SessionArena,
    id: SessionId,
    manager: &InventoryManager,
    index: u8,
) -> Result<(), String> {
    let Some(store) = manager.stash(index) else {
        return Ok(());
    };
    let payload = wire::build_stash_update(index, &ContainerSnapshot::from_store(store));
    send_to(sessions, id, MessageKind::SharedStashUpdate, &payload)
}

/// Shared grids are visible to everyone, so updates go to every connected
/// session, logged in or not, not just the requester.
fn broadcast_stash(sessions: &mut SessionArena, manager: &InventoryManager, index: u8) {
    let Some(store) = manager.stash(index) else {
        return;
    };
    let frame = wire::encode_frame(
        MessageKind::SharedStashUpdate,
        &wire::build_stash_update(index, &ContainerSnapshot::from_store(store)),
    );
    for id in sessions.ids() {
        let outcome = match sessions.get_mut(id) {
            Some(session) => write_frame(&mut session.stream, &frame),
            None => continue,
        };
        if let Err(err) = outcome {
            drop_session(sessions, id, &err);
        }
    }
}

fn send_to(
    sessions: &mut SessionArena,
    id: SessionId,
    kind: MessageKind,
    payload: &[u8],
) -> Result<(), String> {
    let frame = wire::encode_frame(kind, payload);
    let Some(session) = sessions.get_mut(id) else {
        return Ok(());
    };
    write_frame(&mut session.stream, &frame)
}

/// One non-blocking write per frame. A full send buffer or a short write is
/// a failed send; the caller tears the connection down.
fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> Result<(), String> {
    loop {
        match stream.write(frame) {
            Ok(sent) if sent == frame.len() => return Ok(()),
            Ok(sent) => {
                return Err(format!("short write: {} of {} bytes", sent, frame.len()));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err("send buffer full".to_string());
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(format!("write failed: {}", err)),
        }
    }
}

fn drop_session(sessions: &mut SessionArena, id: SessionId, reason: &str) {
    let Some(session) = sessions.remove(id) else {
        return;
    };
    match session.identity.as_deref() {
        Some(identity) => {
            logging::log_game(&format!(
                "{} disconnected: {} (idle {:?})",
                identity,
                reason,
                session.last_activity.elapsed()
            ));
            println!("stashd: {} disconnected ({})", identity, reason);
        }
        None => {
            logging::log_netload(&format!(
                "{} disconnected before login: {}",
                session.peer, reason
            ));
            println!(
                "stashd: {} disconnected before login ({})",
                session.peer, reason
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::catalog::ItemCatalog;
    use std::sync::mpsc;

    fn start_server(
        max_clients: usize,
    ) -> (
        SocketAddr,
        Arc<ServerControl>,
        thread::JoinHandle<Result<(), String>>,
        mpsc::Sender<AdminRequest>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let control = Arc::new(ServerControl::new());
        let (admin_tx, admin_rx) = mpsc::channel();
        let manager = InventoryManager::new(Arc::new(ItemCatalog::builtin()));
        let config = ServerConfig {
            bind_addr: addr.to_string(),
            max_clients,
            tick_sleep: Duration::from_millis(2),
            shutdown_grace: Duration::from_millis(20),
            ..ServerConfig::default()
        };
        let server_control = Arc::clone(&control);
        let handle = thread::spawn(move || serve(listener, config, manager, server_control, admin_rx));
        (addr, control, handle, admin_tx)
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set read timeout");
        stream
    }

    fn send_frame(stream: &mut TcpStream, kind: MessageKind, payload: &[u8]) {
        stream
            .write_all(&wire::encode_frame(kind, payload))
            .expect("send frame");
    }

    fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
        let mut header = [0u8; 5];
        stream.read_exact(&mut header).expect("frame header");
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).expect("frame payload");
        (header[0], payload)
    }

    fn expect_eof(stream: &mut TcpStream) {
        let mut buf = [0u8; 1];
        match stream.read(&mut buf) {
            Ok(0) => {}
            Ok(_) => panic!("expected the server to close the connection"),
            Err(err) => panic!("expected clean close, got {}", err),
        }
    }

    fn login(addr: SocketAddr, identity: &str) -> TcpStream {
        let mut stream = connect(addr);
        send_frame(
            &mut stream,
            MessageKind::LoginRequest,
            &wire::build_login_request(identity),
        );

        let (kind, payload) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::LoginResponse.value());
        assert_eq!(payload, vec![wire::LOGIN_ACCEPTED]);

        let (kind, _) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::InventoryFullSync.value());

        for expected in 0..3u8 {
            let (kind, payload) = read_frame(&mut stream);
            assert_eq!(kind, MessageKind::SharedStashUpdate.value());
            assert_eq!(payload[0], expected);
        }
        stream
    }

    fn give(admin: &mpsc::Sender<AdminRequest>, identity: &str, item_id: u32, count: u32) {
        let (reply_tx, reply_rx) = mpsc::channel();
        admin
            .send(AdminRequest::GiveItem {
                identity: identity.to_string(),
                item_id,
                count,
                reply: reply_tx,
            })
            .expect("send admin request");
        reply_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("admin reply")
            .expect("give succeeds");
    }

    fn shut_down(
        control: Arc<ServerControl>,
        handle: thread::JoinHandle<Result<(), String>>,
    ) {
        control.request_shutdown();
        handle.join().expect("server thread").expect("server exit");
    }

    #[test]
    fn login_burst_sends_response_and_all_snapshots() {
        let (addr, control, handle, _admin) = start_server(0);
        let mut stream = login(addr, "alice");

        control.request_shutdown();
        let (kind, payload) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::ServerShutdown.value());
        assert!(payload.is_empty());

        handle.join().expect("server thread").expect("server exit");
    }

    #[test]
    fn duplicate_identity_is_rejected_and_dropped() {
        let (addr, control, handle, _admin) = start_server(0);
        let _first = login(addr, "bob");

        let mut second = connect(addr);
        send_frame(
            &mut second,
            MessageKind::LoginRequest,
            &wire::build_login_request("bob"),
        );
        let (kind, payload) = read_frame(&mut second);
        assert_eq!(kind, MessageKind::LoginRejected.value());
        assert_eq!(
            wire::parse_login_rejected(&payload).expect("reject"),
            LoginReject::AlreadyConnected
        );
        expect_eof(&mut second);

        shut_down(control, handle);
    }

    #[test]
    fn invalid_identity_is_rejected() {
        let (addr, control, handle, _admin) = start_server(0);

        let mut stream = connect(addr);
        send_frame(&mut stream, MessageKind::LoginRequest, &[]);
        let (kind, payload) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::LoginRejected.value());
        assert_eq!(
            wire::parse_login_rejected(&payload).expect("reject"),
            LoginReject::InvalidIdentity
        );
        expect_eof(&mut stream);

        let long_identity = "x".repeat(33);
        let mut stream = connect(addr);
        send_frame(
            &mut stream,
            MessageKind::LoginRequest,
            &wire::build_login_request(&long_identity),
        );
        let (_, payload) = read_frame(&mut stream);
        assert_eq!(
            wire::parse_login_rejected(&payload).expect("reject"),
            LoginReject::InvalidIdentity
        );

        shut_down(control, handle);
    }

    #[test]
    fn capacity_limit_rejects_with_server_full() {
        let (addr, control, handle, _admin) = start_server(1);
        let _alice = login(addr, "alice");

        let mut bob = connect(addr);
        send_frame(
            &mut bob,
            MessageKind::LoginRequest,
            &wire::build_login_request("bob"),
        );
        let (kind, payload) = read_frame(&mut bob);
        assert_eq!(kind, MessageKind::LoginRejected.value());
        assert_eq!(
            wire::parse_login_rejected(&payload).expect("reject"),
            LoginReject::ServerFull
        );

        shut_down(control, handle);
    }

    #[test]
    fn move_request_updates_personal_grid() {
        let (addr, control, handle, admin) = start_server(0);
        let mut stream = login(addr, "carol");

        give(&admin, "carol", 1, 5);
        let (kind, _) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::InventoryFullSync.value());

        send_frame(
            &mut stream,
            MessageKind::MoveItemRequest,
            &wire::build_move_item(&wire::MoveItemRequest {
                source_container: 0,
                source_x: 0,
                source_y: 0,
                dest_container: 0,
                dest_x: 4,
                dest_y: 2,
            }),
        );

        let (kind, payload) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::OperationResult.value());
        let (result, _) = wire::parse_operation_result(&payload).expect("result");
        assert_eq!(result, OperationResult::Success);

        let (kind, payload) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::InventoryFullSync.value());
        let snapshot = wire::parse_snapshot(&payload).expect("snapshot");
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!((snapshot.records[0].x, snapshot.records[0].y), (4, 2));
        assert_eq!(snapshot.records[0].count, 5);

        shut_down(control, handle);
    }

    #[test]
    fn stash_move_broadcasts_to_every_connected_session() {
        let (addr, control, handle, admin) = start_server(0);
        let mut alice = login(addr, "alice");
        let mut bob = login(addr, "bob");
        // connected but never logs in; shared updates reach it all the same
        let mut watcher = connect(addr);

        give(&admin, "alice", 2, 7);
        let (kind, _) = read_frame(&mut alice);
        assert_eq!(kind, MessageKind::InventoryFullSync.value());

        // personal (0,0) into stash 0 at (5,5)
        send_frame(
            &mut alice,
            MessageKind::MoveItemRequest,
            &wire::build_move_item(&wire::MoveItemRequest {
                source_container: 0,
                source_x: 0,
                source_y: 0,
                dest_container: 1,
                dest_x: 5,
                dest_y: 5,
            }),
        );

        let (kind, payload) = read_frame(&mut alice);
        assert_eq!(kind, MessageKind::OperationResult.value());
        assert_eq!(payload, vec![0]);
        let (kind, _) = read_frame(&mut alice);
        assert_eq!(kind, MessageKind::InventoryFullSync.value());
        let (kind, payload) = read_frame(&mut alice);
        assert_eq!(kind, MessageKind::SharedStashUpdate.value());
        let (index, snapshot) = wire::parse_stash_update(&payload).expect("stash update");
        assert_eq!(index, 0);
        assert_eq!(snapshot.records.len(), 1);

        // the other client and the pre-login socket see the same broadcast
        // without having asked
        for stream in [&mut bob, &mut watcher] {
            let (kind, payload) = read_frame(stream);
            assert_eq!(kind, MessageKind::SharedStashUpdate.value());
            let (index, snapshot) = wire::parse_stash_update(&payload).expect("stash update");
            assert_eq!(index, 0);
            assert_eq!(snapshot.records.len(), 1);
            assert_eq!((snapshot.records[0].x, snapshot.records[0].y), (5, 5));
            assert_eq!(snapshot.records[0].item_id, 2);
        }

        shut_down(control, handle);
    }

    #[test]
    fn failed_move_sends_result_and_no_sync() {
        let (addr, control, handle, _admin) = start_server(0);
        let mut stream = login(addr, "dave");

        send_frame(
            &mut stream,
            MessageKind::MoveItemRequest,
            &wire::build_move_item(&wire::MoveItemRequest {
                source_container: 0,
                source_x: 3,
                source_y: 3,
                dest_container: 0,
                dest_x: 0,
                dest_y: 0,
            }),
        );
        let (kind, payload) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::OperationResult.value());
        let (result, _) = wire::parse_operation_result(&payload).expect("result");
        assert_eq!(result, OperationResult::ItemNotFound);

        // next frame is the heartbeat echo, proving no sync was queued
        send_frame(&mut stream, MessageKind::Heartbeat, &[]);
        let (kind, _) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::Heartbeat.value());

        shut_down(control, handle);
    }

    #[test]
    fn split_request_inside_personal_grid() {
        let (addr, control, handle, admin) = start_server(0);
        let mut stream = login(addr, "erin");

        give(&admin, "erin", 5, 30);
        let (kind, _) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::InventoryFullSync.value());

        send_frame(
            &mut stream,
            MessageKind::SplitStackRequest,
            &wire::build_split_stack(&wire::SplitStackRequest {
                container: 0,
                x: 0,
                y: 0,
                amount: 12,
                dest_x: 6,
                dest_y: 1,
            }),
        );

        let (kind, payload) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::OperationResult.value());
        assert_eq!(payload, vec![0]);

        let (kind, payload) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::InventoryFullSync.value());
        let snapshot = wire::parse_snapshot(&payload).expect("snapshot");
        assert_eq!(snapshot.records.len(), 2);
        let counts: Vec<u32> = snapshot.records.iter().map(|record| record.count).collect();
        assert!(counts.contains(&18) && counts.contains(&12));

        shut_down(control, handle);
    }

    #[test]
    fn frame_split_across_writes_still_dispatches() {
        let (addr, control, handle, _admin) = start_server(0);

        let mut stream = connect(addr);
        let frame = wire::encode_frame(
            MessageKind::LoginRequest,
            &wire::build_login_request("frank"),
        );
        stream.write_all(&frame[..3]).expect("first half");
        stream.flush().expect("flush");
        thread::sleep(Duration::from_millis(20));
        stream.write_all(&frame[3..]).expect("second half");

        let (kind, payload) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::LoginResponse.value());
        assert_eq!(payload, vec![wire::LOGIN_ACCEPTED]);

        shut_down(control, handle);
    }

    #[test]
    fn two_frames_in_one_write_both_dispatch() {
        let (addr, control, handle, _admin) = start_server(0);

        let mut stream = connect(addr);
        let mut bytes = wire::encode_frame(
            MessageKind::LoginRequest,
            &wire::build_login_request("grace"),
        );
        bytes.extend_from_slice(&wire::encode_frame(MessageKind::Heartbeat, &[]));
        stream.write_all(&bytes).expect("both frames");

        let (kind, _) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::LoginResponse.value());
        let (kind, _) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::InventoryFullSync.value());
        for _ in 0..3 {
            let (kind, _) = read_frame(&mut stream);
            assert_eq!(kind, MessageKind::SharedStashUpdate.value());
        }
        let (kind, _) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::Heartbeat.value());

        shut_down(control, handle);
    }

    #[test]
    fn oversized_declared_payload_drops_the_connection() {
        let (addr, control, handle, _admin) = start_server(0);

        let mut stream = connect(addr);
        let mut forged = vec![MessageKind::LoginRequest.value()];
        forged.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        stream.write_all(&forged).expect("forged header");
        expect_eof(&mut stream);

        shut_down(control, handle);
    }

    #[test]
    fn unknown_frame_type_is_ignored() {
        let (addr, control, handle, _admin) = start_server(0);
        let mut stream = login(addr, "henry");

        stream
            .write_all(&[99, 0, 0, 0, 2, 0xaa, 0xbb])
            .expect("unknown frame");
        send_frame(&mut stream, MessageKind::Heartbeat, &[]);
        let (kind, _) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::Heartbeat.value());

        shut_down(control, handle);
    }

    #[test]
    fn disconnect_frame_frees_the_identity() {
        let (addr, control, handle, _admin) = start_server(0);
        let mut stream = login(addr, "iris");

        send_frame(&mut stream, MessageKind::Disconnect, &[]);
        expect_eof(&mut stream);

        // the identity can log in again on a fresh connection
        let _second = login(addr, "iris");

        shut_down(control, handle);
    }

    #[test]
    fn give_to_offline_identity_lands_in_their_grid() {
        let (addr, control, handle, admin) = start_server(0);

        give(&admin, "judy", 3, 4);

        let mut stream = connect(addr);
        send_frame(
            &mut stream,
            MessageKind::LoginRequest,
            &wire::build_login_request("judy"),
        );
        let (kind, _) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::LoginResponse.value());
        let (kind, payload) = read_frame(&mut stream);
        assert_eq!(kind, MessageKind::InventoryFullSync.value());
        let snapshot = wire::parse_snapshot(&payload).expect("snapshot");
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].item_id, 3);
        assert_eq!(snapshot.records[0].count, 4);

        shut_down(control, handle);
    }

    #[test]
    fn list_players_reports_logged_in_identities() {
        let (addr, control, handle, admin) = start_server(0);
        let _alice = login(addr, "alice");
        let _bob = login(addr, "bob");

        let (reply_tx, reply_rx) = mpsc::channel();
        admin
            .send(AdminRequest::ListPlayers { reply: reply_tx })
            .expect("send admin request");
        let players = reply_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("admin reply");
        assert_eq!(players, vec!["alice".to_string(), "bob".to_string()]);

        shut_down(control, handle);
    }

    #[test]
    fn stale_session_handles_miss_slot_successors() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");

        let _client_a = TcpStream::connect(addr).expect("connect a");
        let (stream_a, peer_a) = listener.accept().expect("accept a");
        let _client_b = TcpStream::connect(addr).expect("connect b");
        let (stream_b, peer_b) = listener.accept().expect("accept b");

        let mut arena = SessionArena::new();
        let first = arena.insert(stream_a, peer_a);
        arena.bind_identity(first, "alice");
        assert!(arena.identity_connected("alice"));

        arena.remove(first).expect("remove");
        assert!(!arena.identity_connected("alice"));

        let second = arena.insert(stream_b, peer_b);
        assert_eq!(second.index, first.index);
        assert_ne!(second.generation, first.generation);
        assert!(arena.get_mut(first).is_none());
        assert!(arena.get_mut(second).is_some());
        assert!(arena.remove(first).is_none());
    }

    #[test]
    fn received_frames_refresh_session_activity() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let mut client = TcpStream::connect(addr).expect("connect");
        let (stream, peer) = listener.accept().expect("accept");
        stream.set_nonblocking(true).expect("nonblocking");

        let mut sessions = SessionArena::new();
        let id = sessions.insert(stream, peer);
        let before = sessions.get_mut(id).expect("session").last_activity;

        let mut manager = InventoryManager::new(Arc::new(ItemCatalog::builtin()));
        let config = ServerConfig::default();
        send_frame(&mut client, MessageKind::Heartbeat, &[]);

        let mut refreshed = false;
        for _ in 0..200 {
            thread::sleep(Duration::from_millis(5));
            service_session(&mut sessions, id, &mut manager, &config).expect("service");
            if sessions.get_mut(id).expect("session").last_activity > before {
                refreshed = true;
                break;
            }
        }
        assert!(refreshed, "heartbeat never refreshed the activity stamp");
    }

    #[test]
    fn write_into_a_full_send_buffer_fails_fast() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let mut writer = TcpStream::connect(addr).expect("connect");
        let (_idle_peer, _) = listener.accept().expect("accept");
        writer.set_nonblocking(true).expect("nonblocking");

        // the peer never reads, so the kernel buffers fill after a while
        let frame = vec![7u8; 32 * 1024];
        let mut failure = None;
        for _ in 0..100_000 {
            if let Err(err) = write_frame(&mut writer, &frame) {
                failure = Some(err);
                break;
            }
        }
        let failure = failure.expect("send buffer never filled");
        assert!(
            failure.contains("send buffer full") || failure.contains("short write"),
            "unexpected failure: {}",
            failure
        );
    }
}
