use shared::{Position, DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

/// What happens to a player's record when its connection closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GhostPolicy {
    /// Keep the record; peers keep seeing the last known position
    #[default]
    Retain,
    /// Delete the record together with the connection
    Remove,
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub bind_addr: String,
    pub max_connections: usize,
    /// Frames buffered per connection before broadcasts start dropping
    pub outbound_queue: usize,
    /// Upper bound on a single write, handshake included
    pub send_timeout: Duration,
    pub spawn_position: Position,
    pub ghost_policy: GhostPolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            max_connections: 64,
            outbound_queue: 256,
            send_timeout: Duration::from_secs(2),
            spawn_position: Position::spawn(),
            ghost_policy: GhostPolicy::Retain,
        }
    }
}

impl HostConfig {
    /// Sets the listen address, e.g. `127.0.0.1:0` for an ephemeral port
    pub fn with_bind_addr(mut self, bind_addr: impl Into<String>) -> Self {
        self.bind_addr = bind_addr.into();
        self
    }

    /// Sets what happens to a record when its connection closes
    pub fn with_ghost_policy(mut self, ghost_policy: GhostPolicy) -> Self {
        self.ghost_policy = ghost_policy;
        self
    }

    /// Sets the cap on simultaneously active connections
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:53000");
        assert_eq!(config.ghost_policy, GhostPolicy::Retain);
        assert_eq!(config.spawn_position, Position::new(100.0, 100.0));
    }

    #[test]
    fn test_builders() {
        let config = HostConfig::default()
            .with_bind_addr("0.0.0.0:0")
            .with_ghost_policy(GhostPolicy::Remove)
            .with_max_connections(3);

        assert_eq!(config.bind_addr, "0.0.0.0:0");
        assert_eq!(config.ghost_policy, GhostPolicy::Remove);
        assert_eq!(config.max_connections, 3);
    }
}
