//! Wire codec for relay messages
//!
//! Payloads are serde types encoded with bincode using fixed-width, big-endian
//! integers. Under that configuration an enum's variant index is written as a
//! `u32`, which gives every `Message` its leading discriminator for free:
//!
//! - `0` position: `identity: i32, x: f32, y: f32`
//! - `1` chat: `sender: i32, text: u64 length + UTF-8 bytes`
//!
//! The handshake is a bare `i32` with no discriminator. Framing is handled by
//! [`crate::connection`]; this module only sees complete payloads.

use crate::{Identity, MAX_FRAME_SIZE};
use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const POSITION_DISCRIMINATOR: u32 = 0;
pub const CHAT_DISCRIMINATOR: u32 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    Decode(String),
    #[error("unexpected message discriminator {0}")]
    UnknownDiscriminator(u32),
    #[error("failed to encode message: {0}")]
    Encode(String),
}

impl CodecError {
    /// True for errors caused by the remote side's bytes rather than our own.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            CodecError::Decode(_) | CodecError::UnknownDiscriminator(_)
        )
    }
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .with_limit(MAX_FRAME_SIZE as u64)
}

/// Steady-state traffic between host and peers
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Message {
    Position { identity: Identity, x: f32, y: f32 },
    Chat { sender: Identity, text: String },
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        wire_options()
            .serialize(self)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decodes one complete payload.
    ///
    /// Truncated input, trailing bytes and invalid UTF-8 all come back as
    /// `CodecError::Decode`; an unknown leading discriminator as
    /// `CodecError::UnknownDiscriminator`. Callers drop the message and keep
    /// the connection.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let Some(head) = bytes.get(..4) else {
            return Err(CodecError::Decode(format!(
                "payload of {} bytes has no discriminator",
                bytes.len()
            )));
        };

        let discriminator = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        if discriminator != POSITION_DISCRIMINATOR && discriminator != CHAT_DISCRIMINATOR {
            return Err(CodecError::UnknownDiscriminator(discriminator));
        }

        wire_options()
            .deserialize(bytes)
            .map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// Leading `u32` this message is encoded with
    pub fn discriminator(&self) -> u32 {
        match self {
            Message::Position { .. } => POSITION_DISCRIMINATOR,
            Message::Chat { .. } => CHAT_DISCRIMINATOR,
        }
    }

    /// Identity the message claims to come from.
    pub fn identity(&self) -> Identity {
        match self {
            Message::Position { identity, .. } => *identity,
            Message::Chat { sender, .. } => *sender,
        }
    }
}

/// First and only frame the host sends before steady-state traffic.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub identity: Identity,
}

impl Handshake {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        wire_options()
            .serialize(self)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        wire_options()
            .deserialize(bytes)
            .map_err(|e| CodecError::Decode(e.to_string()))
    }
}
