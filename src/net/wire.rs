use crate::inventory::grid::GridStore;
use crate::inventory::manager::OperationResult;
use crate::net::packet::{PacketReader, PacketWriter};

/// Frame layout on the socket: `[type:1][payloadLength:4 BE][payload]`.
pub const FRAME_HEADER_LEN: usize = 5;

/// Largest payload length a peer may declare. The biggest legitimate frame
/// is a full 12x12 snapshot of named items, well under this.
pub const MAX_FRAME_PAYLOAD: u32 = 64 * 1024;

/// Identities longer than this are rejected at login.
pub const IDENTITY_MAX_LEN: usize = 32;

pub const LOGIN_ACCEPTED: u8 = 0;

#[derive(Debug)]
pub struct WireError {
    pub message: String,
}

impl From<WireError> for String {
    fn from(err: WireError) -> Self {
        err.message
    }
}

fn short_payload(context: &'static str) -> WireError {
    WireError {
        message: format!("{} payload truncated", context),
    }
}

/// Message type bytes. The values are the wire contract and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    LoginRequest,
    Disconnect,
    MoveItemRequest,
    SplitStackRequest,
    LoginResponse,
    LoginRejected,
    InventoryFullSync,
    SharedStashUpdate,
    OperationResult,
    ServerShutdown,
    Heartbeat,
}

impl MessageKind {
    pub fn value(self) -> u8 {
        match self {
            MessageKind::LoginRequest => 1,
            MessageKind::Disconnect => 2,
            MessageKind::MoveItemRequest => 10,
            MessageKind::SplitStackRequest => 11,
            MessageKind::LoginResponse => 50,
            MessageKind::LoginRejected => 51,
            MessageKind::InventoryFullSync => 52,
            MessageKind::SharedStashUpdate => 54,
            MessageKind::OperationResult => 55,
            MessageKind::ServerShutdown => 56,
            MessageKind::Heartbeat => 100,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageKind::LoginRequest),
            2 => Some(MessageKind::Disconnect),
            10 => Some(MessageKind::MoveItemRequest),
            11 => Some(MessageKind::SplitStackRequest),
            50 => Some(MessageKind::LoginResponse),
            51 => Some(MessageKind::LoginRejected),
            52 => Some(MessageKind::InventoryFullSync),
            54 => Some(MessageKind::SharedStashUpdate),
            55 => Some(MessageKind::OperationResult),
            56 => Some(MessageKind::ServerShutdown),
            100 => Some(MessageKind::Heartbeat),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FrameDecode<'a> {
    /// Not enough buffered bytes for a header or the declared payload.
    Incomplete,
    Frame {
        kind: u8,
        payload: &'a [u8],
        consumed: usize,
    },
}

pub fn encode_frame(kind: MessageKind, payload: &[u8]) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(FRAME_HEADER_LEN + payload.len());
    writer.write_u8(kind.value());
    writer.write_u32_be(payload.len() as u32);
    writer.write_bytes(payload);
    writer.into_vec()
}

/// Pulls the first complete frame off the front of a receive buffer. A
/// declared length over `max_payload` is unrecoverable for the connection
/// since the stream cannot be resynchronized past it.
pub fn decode_frame(buffer: &[u8], max_payload: u32) -> Result<FrameDecode<'_>, WireError> {
    if buffer.len() < FRAME_HEADER_LEN {
        return Ok(FrameDecode::Incomplete);
    }
    let kind = buffer[0];
    let declared = (u32::from(buffer[1]) << 24)
        | (u32::from(buffer[2]) << 16)
        | (u32::from(buffer[3]) << 8)
        | u32::from(buffer[4]);
    if declared > max_payload {
        return Err(WireError {
            message: format!(
                "declared payload length {} exceeds the {} byte limit",
                declared, max_payload
            ),
        });
    }
    let total = FRAME_HEADER_LEN + declared as usize;
    if buffer.len() < total {
        return Ok(FrameDecode::Incomplete);
    }
    Ok(FrameDecode::Frame {
        kind,
        payload: &buffer[FRAME_HEADER_LEN..total],
        consumed: total,
    })
}

pub fn identity_is_valid(identity: &str) -> bool {
    !identity.is_empty() && identity.len() <= IDENTITY_MAX_LEN
}

/// The login payload is the identity itself, no length prefix.
pub fn build_login_request(identity: &str) -> Vec<u8> {
    identity.as_bytes().to_vec()
}

pub fn parse_login_request(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginReject {
    AlreadyConnected,
    InvalidIdentity,
    ServerFull,
}

impl LoginReject {
    pub fn code(self) -> u8 {
        match self {
            LoginReject::AlreadyConnected => 1,
            LoginReject::InvalidIdentity => 2,
            LoginReject::ServerFull => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(LoginReject::AlreadyConnected),
            2 => Some(LoginReject::InvalidIdentity),
            3 => Some(LoginReject::ServerFull),
            _ => None,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            LoginReject::AlreadyConnected => "identity already connected",
            LoginReject::InvalidIdentity => "invalid identity",
            LoginReject::ServerFull => "server full",
        }
    }
}

pub fn build_login_response() -> Vec<u8> {
    vec![LOGIN_ACCEPTED]
}

pub fn parse_login_response(payload: &[u8]) -> Result<(), WireError> {
    let code = payload
        .first()
        .copied()
        .ok_or_else(|| short_payload("login response"))?;
    if code != LOGIN_ACCEPTED {
        return Err(WireError {
            message: format!("login response carried unexpected code {}", code),
        });
    }
    Ok(())
}

pub fn build_login_rejected(reason: LoginReject) -> Vec<u8> {
    vec![reason.code()]
}

pub fn parse_login_rejected(payload: &[u8]) -> Result<LoginReject, WireError> {
    let code = payload
        .first()
        .copied()
        .ok_or_else(|| short_payload("login rejection"))?;
    LoginReject::from_code(code).ok_or_else(|| WireError {
        message: format!("unknown login rejection code {}", code),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveItemRequest {
    pub source_container: u8,
    pub source_x: u8,
    pub source_y: u8,
    pub dest_container: u8,
    pub dest_x: u8,
    pub dest_y: u8,
}

pub fn build_move_item(request: &MoveItemRequest) -> Vec<u8> {
    vec![
        request.source_container,
        request.source_x,
        request.source_y,
        request.dest_container,
        request.dest_x,
        request.dest_y,
    ]
}

pub fn parse_move_item(payload: &[u8]) -> Result<MoveItemRequest, WireError> {
    if payload.len() < 6 {
        return Err(short_payload("move request"));
    }
    Ok(MoveItemRequest {
        source_container: payload[0],
        source_x: payload[1],
        source_y: payload[2],
        dest_container: payload[3],
        dest_x: payload[4],
        dest_y: payload[5],
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitStackRequest {
    pub container: u8,
    pub x: u8,
    pub y: u8,
    pub amount: u32,
    pub dest_x: u8,
    pub dest_y: u8,
}

pub fn build_split_stack(request: &SplitStackRequest) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(9);
    writer.write_u8(request.container);
    writer.write_u8(request.x);
    writer.write_u8(request.y);
    writer.write_u32_be(request.amount);
    writer.write_u8(request.dest_x);
    writer.write_u8(request.dest_y);
    writer.into_vec()
}

pub fn parse_split_stack(payload: &[u8]) -> Result<SplitStackRequest, WireError> {
    if payload.len() < 9 {
        return Err(short_payload("split request"));
    }
    let amount = (u32::from(payload[3]) << 24)
        | (u32::from(payload[4]) << 16)
        | (u32::from(payload[5]) << 8)
        | u32::from(payload[6]);
    Ok(SplitStackRequest {
        container: payload[0],
        x: payload[1],
        y: payload[2],
        amount,
        dest_x: payload[7],
        dest_y: payload[8],
    })
}

pub fn build_operation_result(result: OperationResult) -> Vec<u8> {
    vec![result.code()]
}

pub fn build_operation_result_message(result: OperationResult, message: &str) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(2 + message.len());
    writer.write_u8(result.code());
    writer.write_name(message);
    writer.into_vec()
}

/// Accepts both reply forms, `[code]` and `[code][messageLength:1][message]`.
pub fn parse_operation_result(payload: &[u8]) -> Result<(OperationResult, Option<String>), WireError> {
    let mut reader = PacketReader::new(payload);
    let code = reader
        .read_u8()
        .ok_or_else(|| short_payload("operation result"))?;
    let result = OperationResult::from_code(code).ok_or_else(|| WireError {
        message: format!("unknown operation result code {}", code),
    })?;
    Ok((result, reader.read_name()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub x: u8,
    pub y: u8,
    pub item_id: u32,
    pub count: u32,
    pub name: String,
    pub width: u8,
    pub height: u8,
    pub stack_max: u32,
}

/// Anchor-only view of one grid. Covered cells are implied by each record's
/// footprint and never serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSnapshot {
    pub width: u8,
    pub height: u8,
    pub records: Vec<SnapshotRecord>,
}

impl ContainerSnapshot {
    pub fn from_store(store: &GridStore) -> Self {
        let records = store
            .all_anchors()
            .into_iter()
            .filter_map(|slot| {
                let item = slot.item?;
                Some(SnapshotRecord {
                    x: slot.position.x as u8,
                    y: slot.position.y as u8,
                    item_id: item.id.0,
                    count: slot.count,
                    name: item.name.clone(),
                    width: item.footprint.width,
                    height: item.footprint.height,
                    stack_max: item.stack_max,
                })
            })
            .collect();
        Self {
            width: store.width() as u8,
            height: store.height() as u8,
            records,
        }
    }
}

pub fn build_snapshot(snapshot: &ContainerSnapshot) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(4 + snapshot.records.len() * 32);
    writer.write_u8(snapshot.width);
    writer.write_u8(snapshot.height);
    writer.write_u16_be(snapshot.records.len() as u16);
    for record in &snapshot.records {
        writer.write_u8(record.x);
        writer.write_u8(record.y);
        writer.write_u32_be(record.item_id);
        writer.write_u32_be(record.count);
        writer.write_name(&record.name);
        writer.write_u8(record.width);
        writer.write_u8(record.height);
        writer.write_u32_be(record.stack_max);
    }
    writer.into_vec()
}

pub fn parse_snapshot(payload: &[u8]) -> Result<ContainerSnapshot, WireError> {
    let mut reader = PacketReader::new(payload);
    let width = reader.read_u8().ok_or_else(|| short_payload("snapshot"))?;
    let height = reader.read_u8().ok_or_else(|| short_payload("snapshot"))?;
    let count = reader
        .read_u16_be()
        .ok_or_else(|| short_payload("snapshot"))?;
    let mut records = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let x = reader.read_u8().ok_or_else(|| short_payload("snapshot record"))?;
        let y = reader.read_u8().ok_or_else(|| short_payload("snapshot record"))?;
        let item_id = reader
            .read_u32_be()
            .ok_or_else(|| short_payload("snapshot record"))?;
        let stack_count = reader
            .read_u32_be()
            .ok_or_else(|| short_payload("snapshot record"))?;
        let name = reader
            .read_name()
            .ok_or_else(|| short_payload("snapshot record name"))?;
        let item_width = reader
            .read_u8()
            .ok_or_else(|| short_payload("snapshot record"))?;
        let item_height = reader
            .read_u8()
            .ok_or_else(|| short_payload("snapshot record"))?;
        let stack_max = reader
            .read_u32_be()
            .ok_or_else(|| short_payload("snapshot record"))?;
        records.push(SnapshotRecord {
            x,
            y,
            item_id,
            count: stack_count,
            name,
            width: item_width,
            height: item_height,
            stack_max,
        });
    }
    Ok(ContainerSnapshot {
        width,
        height,
        records,
    })
}

pub fn build_stash_update(stash_index: u8, snapshot: &ContainerSnapshot) -> Vec<u8> {
    let body = build_snapshot(snapshot);
    let mut payload = Vec::with_capacity(1 + body.len());
    payload.push(stash_index);
    payload.extend_from_slice(&body);
    payload
}

pub fn parse_stash_update(payload: &[u8]) -> Result<(u8, ContainerSnapshot), WireError> {
    let (index, rest) = payload
        .split_first()
        .ok_or_else(|| short_payload("stash update"))?;
    let snapshot = parse_snapshot(rest)?;
    Ok((*index, snapshot))
}
