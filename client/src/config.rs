use rand::Rng;
use shared::{Position, DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

/// What a peer does after losing its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Stay disconnected
    #[default]
    Never,
    /// Retry with exponential backoff, doubling from `initial` up to `max`
    Backoff {
        initial: Duration,
        max: Duration,
        /// None retries forever
        max_attempts: Option<u32>,
    },
}

impl ReconnectPolicy {
    /// Backoff from 250ms up to 8s, retrying forever
    pub fn backoff() -> Self {
        ReconnectPolicy::Backoff {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(8),
            max_attempts: None,
        }
    }

    /// Base delay before retry number `attempt` (0-based), or None when the
    /// policy has given up.
    pub fn base_delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::Backoff {
                initial,
                max,
                max_attempts,
            } => {
                if max_attempts.is_some_and(|limit| attempt >= limit) {
                    return None;
                }
                let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
                Some(initial.saturating_mul(factor).min(max))
            }
        }
    }

    /// `base_delay` plus up to 25% random jitter
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        let base = self.base_delay(attempt)?;
        let jitter_ms = (base.as_millis() / 4) as u64;
        if jitter_ms == 0 {
            return Some(base);
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        Some(base + Duration::from_millis(jitter))
    }
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub server_addr: String,
    /// Interval between unconditional position sends
    pub send_interval: Duration,
    /// Bounds both the TCP connect and the wait for the handshake
    pub connect_timeout: Duration,
    /// Chat messages waiting for the sender task
    pub chat_queue: usize,
    pub start_position: Position,
    pub reconnect: ReconnectPolicy,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            send_interval: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
            chat_queue: 32,
            start_position: Position::spawn(),
            reconnect: ReconnectPolicy::Never,
        }
    }
}

impl PeerConfig {
    /// Sets the `host:port` to connect to
    pub fn with_server_addr(mut self, server_addr: impl Into<String>) -> Self {
        self.server_addr = server_addr.into();
        self
    }

    /// Sets how often the position is sent
    pub fn with_send_interval(mut self, send_interval: Duration) -> Self {
        self.send_interval = send_interval;
        self
    }

    /// Sets what the peer does after losing its connection
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}
