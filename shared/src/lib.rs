//! Wire-level vocabulary shared by both peers of a versus session.
//!
//! Everything that crosses the TCP link lives here: the packet model, the
//! value types carried inside packets and the framing codec in [`codec`].

pub mod codec;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub use codec::{decode_frame_body, encode_frame, frame_len, FRAME_HEADER_LEN};

/// TCP port both peers agree on for direct-IP play.
pub const DEFAULT_PORT: u16 = 15555;
/// Version byte written in front of every frame body.
pub const PROTOCOL_VERSION: u8 = 1;
/// Upper bound for a single frame (version byte + body).
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// 32-bit ARGB color. `0` is the "no cell" sentinel.
pub type Argb = u32;
/// One encoded penalty row, one ARGB value per column.
pub type AttackRow = Vec<Argb>;

/// Failures while turning packets into bytes or back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("failed to encode packet: {0}")]
    Encode(String),

    #[error("failed to decode packet: {0}")]
    Decode(String),

    #[error("empty frame")]
    EmptyFrame,

    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid player id {0}")]
    InvalidRole(u8),

    #[error("unknown block tag {0:?}")]
    UnknownBlock(String),

    #[error("unknown battle mode {0:?}")]
    UnknownMode(String),

    #[error("invalid cell code {0}")]
    InvalidCell(u8),
}

/// Milliseconds since the unix epoch, saturating to zero on clock skew.
pub fn timestamp_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    millis.min(u64::MAX as u128) as u64
}

/// Which end of the link a peer is. Doubles as the player id (1 or 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Player id on the wire: 1 for the Server, 2 for the Client.
    pub fn id(self) -> u8 {
        match self {
            Role::Server => 1,
            Role::Client => 2,
        }
    }

    /// The opposite end of the link.
    pub fn other(self) -> Role {
        match self {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        }
    }
}

impl From<Role> for u8 {
    fn from(role: Role) -> u8 {
        role.id()
    }
}

impl TryFrom<u8> for Role {
    type Error = ProtocolError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(Role::Server),
            2 => Ok(Role::Client),
            other => Err(ProtocolError::InvalidRole(other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Rule set announced by the Server, sent as `NORMAL`, `ITEM` or `TIMELIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
pub enum BattleMode {
    Normal,
    Item,
    TimeLimit,
}

impl BattleMode {
    /// Wire tag.
    pub fn tag(self) -> &'static str {
        match self {
            BattleMode::Normal => "NORMAL",
            BattleMode::Item => "ITEM",
            BattleMode::TimeLimit => "TIMELIMIT",
        }
    }
}

impl FromStr for BattleMode {
    type Err = ProtocolError;

    /// Accepts the wire tags case-insensitively, plus the dashed spellings
    /// people type on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(BattleMode::Normal),
            "item" => Ok(BattleMode::Item),
            "timelimit" | "time-limit" | "time_limit" => Ok(BattleMode::TimeLimit),
            _ => Err(ProtocolError::UnknownMode(s.to_string())),
        }
    }
}

impl From<BattleMode> for &'static str {
    fn from(mode: BattleMode) -> &'static str {
        mode.tag()
    }
}

impl TryFrom<String> for BattleMode {
    type Error = ProtocolError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        tag.parse()
    }
}

/// Tetromino (plus item piece) identifiers, sent as their short tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
pub enum BlockType {
    I,
    O,
    T,
    S,
    Z,
    L,
    J,
    W,
    Dot,
}

impl BlockType {
    pub const ALL: [BlockType; 9] = [
        BlockType::I,
        BlockType::O,
        BlockType::T,
        BlockType::S,
        BlockType::Z,
        BlockType::L,
        BlockType::J,
        BlockType::W,
        BlockType::Dot,
    ];

    /// Short wire tag, `DOT` for the single-cell item piece.
    pub fn tag(self) -> &'static str {
        match self {
            BlockType::I => "I",
            BlockType::O => "O",
            BlockType::T => "T",
            BlockType::S => "S",
            BlockType::Z => "Z",
            BlockType::L => "L",
            BlockType::J => "J",
            BlockType::W => "W",
            BlockType::Dot => "DOT",
        }
    }
}

impl FromStr for BlockType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlockType::ALL
            .iter()
            .copied()
            .find(|block| block.tag() == s)
            .ok_or_else(|| ProtocolError::UnknownBlock(s.to_string()))
    }
}

impl From<BlockType> for &'static str {
    fn from(block: BlockType) -> &'static str {
        block.tag()
    }
}

impl TryFrom<String> for BlockType {
    type Error = ProtocolError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        tag.parse()
    }
}

/// Board cell occupancy, sent as its one-byte code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Cell {
    #[default]
    Empty,
    Fixed,
    Falling,
}

impl Cell {
    /// 0 empty, 1 fixed, 2 falling.
    pub fn code(self) -> u8 {
        match self {
            Cell::Empty => 0,
            Cell::Fixed => 1,
            Cell::Falling => 2,
        }
    }
}

impl From<Cell> for u8 {
    fn from(cell: Cell) -> u8 {
        cell.code()
    }
}

impl TryFrom<u8> for Cell {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Cell::Empty),
            1 => Ok(Cell::Fixed),
            2 => Ok(Cell::Falling),
            other => Err(ProtocolError::InvalidCell(other)),
        }
    }
}

/// Full visible state of one player's board, as pushed every sync tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub board: Vec<Vec<Cell>>,
    pub colors: Vec<Vec<Argb>>,
    pub block_x: i32,
    pub block_y: i32,
    pub current: Option<BlockType>,
    pub next: Option<BlockType>,
    pub score: u64,
    pub level: u32,
    pub lines_cleared: u32,
    pub elapsed_ms: u64,
    pub time_stop_charge: bool,
}

impl GameSnapshot {
    /// A `width` x `height` board with no cells and no active piece.
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            board: vec![vec![Cell::Empty; width]; height],
            colors: vec![vec![0; width]; height],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    ConnectionRequest,
    ConnectionAccepted,
    GameModeSelect,
    Ready,
    GameStart,
    GameState,
    AttackBlocks,
    GameOver,
    Disconnect,
    Ping,
    Pong,
    ChatMessage,
}

/// Per-kind payload. Each variant carries exactly the fields its kind uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    ConnectionRequest { message: String },
    ConnectionAccepted { message: String },
    GameModeSelect { mode: BattleMode, random_seed: u64 },
    Ready { message: String },
    GameStart,
    GameState(GameSnapshot),
    AttackBlocks { rows: Vec<AttackRow> },
    GameOver { winner: Role },
    Disconnect,
    Ping,
    Pong,
    ChatMessage { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub created_at: u64,
    pub payload: Payload,
}

impl Packet {
    pub fn new(payload: Payload) -> Self {
        Self {
            created_at: timestamp_ms(),
            payload,
        }
    }

    pub fn kind(&self) -> PacketKind {
        match &self.payload {
            Payload::ConnectionRequest { .. } => PacketKind::ConnectionRequest,
            Payload::ConnectionAccepted { .. } => PacketKind::ConnectionAccepted,
            Payload::GameModeSelect { .. } => PacketKind::GameModeSelect,
            Payload::Ready { .. } => PacketKind::Ready,
            Payload::GameStart => PacketKind::GameStart,
            Payload::GameState(_) => PacketKind::GameState,
            Payload::AttackBlocks { .. } => PacketKind::AttackBlocks,
            Payload::GameOver { .. } => PacketKind::GameOver,
            Payload::Disconnect => PacketKind::Disconnect,
            Payload::Ping => PacketKind::Ping,
            Payload::Pong => PacketKind::Pong,
            Payload::ChatMessage { .. } => PacketKind::ChatMessage,
        }
    }

    pub fn connection_request(message: impl Into<String>) -> Self {
        Self::new(Payload::ConnectionRequest {
            message: message.into(),
        })
    }

    pub fn connection_accepted(message: impl Into<String>) -> Self {
        Self::new(Payload::ConnectionAccepted {
            message: message.into(),
        })
    }

    pub fn mode_select(mode: BattleMode, random_seed: u64) -> Self {
        Self::new(Payload::GameModeSelect { mode, random_seed })
    }

    pub fn ready() -> Self {
        Self::new(Payload::Ready {
            message: "ready".to_string(),
        })
    }

    pub fn game_state(snapshot: GameSnapshot) -> Self {
        Self::new(Payload::GameState(snapshot))
    }

    pub fn attack(rows: Vec<AttackRow>) -> Self {
        Self::new(Payload::AttackBlocks { rows })
    }

    pub fn game_over(winner: Role) -> Self {
        Self::new(Payload::GameOver { winner })
    }
}
