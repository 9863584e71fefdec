use serde::{Deserialize, Serialize};

pub mod connection;
pub mod protocol;

pub use connection::{Connection, ConnectionReader, ConnectionWriter, TransportError};
pub use protocol::{CodecError, Handshake, Message};

pub const DEFAULT_PORT: u16 = 53000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const SPAWN_X: f32 = 100.0;
pub const SPAWN_Y: f32 = 100.0;
/// Largest frame either side will accept, length prefix excluded.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
/// Chat text is clipped to this many bytes before it leaves a peer.
pub const MAX_CHAT_LEN: usize = 512;

/// Server-assigned identity of a connected peer. Travels as an `int32`.
pub type Identity = i32;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn spawn() -> Self {
        Self::new(SPAWN_X, SPAWN_Y)
    }
}

impl From<(f32, f32)> for Position {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// Last known position of one identity, as held by the host's registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerRecord {
    pub identity: Identity,
    pub position: Position,
}

impl PlayerRecord {
    pub fn new(identity: Identity, position: Position) -> Self {
        Self { identity, position }
    }

    /// The position update that announces this record to peers.
    pub fn to_message(&self) -> Message {
        Message::Position {
            identity: self.identity,
            x: self.position.x,
            y: self.position.y,
        }
    }
}

/// Clips chat text to `MAX_CHAT_LEN` bytes without splitting a character.
pub fn clip_chat_text(text: &str) -> &str {
    if text.len() <= MAX_CHAT_LEN {
        return text;
    }

    let mut end = MAX_CHAT_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
