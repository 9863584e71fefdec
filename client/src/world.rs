use log::debug;
use shared::{Identity, Message, Position};
use std::collections::HashMap;

/// What a peer has learned from the host's broadcasts
///
/// Positions are overwritten per identity. Chat lines accumulate per sender
/// until the consuming application clears them after display.
#[derive(Debug, Clone, Default)]
pub struct RemoteWorld {
    positions: HashMap<Identity, Position>,
    chat_by_sender: HashMap<Identity, Vec<String>>,
}

impl RemoteWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one message from the host into the caches
    ///
    /// Positions overwrite the previous entry for that identity; chat lines
    /// are appended per sender in arrival order.
    pub fn apply(&mut self, message: Message) {
        match message {
            Message::Position { identity, x, y } => {
                self.positions.insert(identity, Position::new(x, y));
            }
            Message::Chat { sender, text } => {
                debug!("Chat from player {}: {}", sender, text);
                self.chat_by_sender.entry(sender).or_default().push(text);
            }
        }
    }

    /// Latest position per identity
    pub fn positions(&self) -> &HashMap<Identity, Position> {
        &self.positions
    }

    pub fn position(&self, identity: Identity) -> Option<Position> {
        self.positions.get(&identity).copied()
    }

    /// Chat lines per sender, oldest first
    pub fn chat_messages(&self) -> &HashMap<Identity, Vec<String>> {
        &self.chat_by_sender
    }

    pub fn clear_chat(&mut self) {
        self.chat_by_sender.clear();
    }

    /// Drops everything, used when a new session starts under a new identity.
    pub fn reset(&mut self) {
        self.positions.clear();
        self.chat_by_sender.clear();
    }
}
