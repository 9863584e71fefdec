//! Time-windowed chat feed for display
//!
//! The relay keeps no chat history. A consuming application moves lines out
//! of the peer's per-sender cache into a [`ChatFeed`] and shows whatever has
//! not yet aged out of the display window.

use shared::Identity;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub const CHAT_DISPLAY_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub sender: Identity,
    pub text: String,
    pub received_at: Instant,
}

impl ChatMessage {
    /// `You: text` for our own lines, `Player N: text` for everyone else.
    pub fn format(&self, local: Option<Identity>) -> String {
        if Some(self.sender) == local {
            format!("You: {}", self.text)
        } else {
            format!("Player {}: {}", self.sender, self.text)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatFeed {
    lines: VecDeque<ChatMessage>,
    window: Duration,
}

impl Default for ChatFeed {
    fn default() -> Self {
        Self::new(CHAT_DISPLAY_WINDOW)
    }
}

impl ChatFeed {
    /// Creates an empty feed that shows lines for `window`
    pub fn new(window: Duration) -> Self {
        Self {
            lines: VecDeque::new(),
            window,
        }
    }

    /// Adds one line received at `received_at`
    pub fn push_at(&mut self, sender: Identity, text: impl Into<String>, received_at: Instant) {
        self.lines.push_back(ChatMessage {
            sender,
            text: text.into(),
            received_at,
        });
    }

    /// Moves a drained per-sender cache into the feed, stamped with `now`.
    ///
    /// Senders are taken in ascending identity order since the cache does not
    /// record arrival order across senders.
    pub fn ingest(&mut self, by_sender: HashMap<Identity, Vec<String>>, now: Instant) -> usize {
        let mut senders: Vec<_> = by_sender.into_iter().collect();
        senders.sort_by_key(|(sender, _)| *sender);

        let mut added = 0;
        for (sender, texts) in senders {
            for text in texts {
                self.push_at(sender, text, now);
                added += 1;
            }
        }
        added
    }

    /// Drops lines older than the display window.
    pub fn expire(&mut self, now: Instant) {
        while let Some(front) = self.lines.front() {
            if now.saturating_duration_since(front.received_at) > self.window {
                self.lines.pop_front();
            } else {
                break;
            }
        }
    }

    /// Formatted lines still inside the window, oldest first.
    pub fn visible(&mut self, now: Instant, local: Option<Identity>) -> Vec<String> {
        self.expire(now);
        self.lines.iter().map(|line| line.format(local)).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_local_and_remote() {
        let line = ChatMessage {
            sender: 3,
            text: "hey".to_string(),
            received_at: Instant::now(),
        };

        assert_eq!(line.format(Some(3)), "You: hey");
        assert_eq!(line.format(Some(1)), "Player 3: hey");
        assert_eq!(line.format(None), "Player 3: hey");
    }

    #[test]
    fn test_lines_expire_after_window() {
        let start = Instant::now();
        let mut feed = ChatFeed::default();

        feed.push_at(1, "old", start);
        feed.push_at(2, "new", start + Duration::from_secs(4));

        let visible = feed.visible(start + Duration::from_secs(6), None);
        assert_eq!(visible, vec!["Player 2: new"]);

        let visible = feed.visible(start + Duration::from_secs(10), None);
        assert!(visible.is_empty());
    }

    #[test]
    fn test_ingest_orders_by_sender() {
        let now = Instant::now();
        let mut feed = ChatFeed::default();

        let mut cache = HashMap::new();
        cache.insert(2, vec!["b1".to_string(), "b2".to_string()]);
        cache.insert(1, vec!["a".to_string()]);

        assert_eq!(feed.ingest(cache, now), 3);
        assert_eq!(
            feed.visible(now, Some(1)),
            vec!["You: a", "Player 2: b1", "Player 2: b2"]
        );
    }
}
