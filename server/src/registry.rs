//! Authoritative identity → position mapping held by the host
//!
//! The registry itself is a plain map; the host shares it as
//! `Arc<RwLock<PlayerRegistry>>` so every mutation goes through the write lock
//! and broadcasts work from a [`PlayerRegistry::snapshot`] taken under the read
//! lock. Updates are last-write-wins with no sequencing.

use log::{debug, info};
use shared::{Identity, PlayerRecord, Position};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedRegistry = Arc<RwLock<PlayerRegistry>>;

#[derive(Debug, Clone, Default)]
pub struct PlayerRegistry {
    players: HashMap<Identity, PlayerRecord>,
}

impl PlayerRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self {
            players: HashMap::new(),
        }
    }

    /// Creates an empty registry ready to share between handlers
    ///
    /// Writers hold the lock only for a single mutation; broadcasters copy a
    /// `snapshot` under the read lock and send from the copy.
    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Creates the record for a freshly accepted identity.
    pub fn insert_spawn(&mut self, identity: Identity, spawn: Position) {
        info!("Added player {} at ({}, {})", identity, spawn.x, spawn.y);
        self.players.insert(identity, PlayerRecord::new(identity, spawn));
    }

    /// Inserts or overwrites the record for `identity`.
    ///
    /// Returns true when the stored position changed.
    pub fn upsert(&mut self, identity: Identity, position: Position) -> bool {
        let previous = self.players.insert(identity, PlayerRecord::new(identity, position));
        let changed = previous.map_or(true, |record| record.position != position);

        if changed {
            debug!("Player {} moved to ({}, {})", identity, position.x, position.y);
        }
        changed
    }

    /// Record for `identity`, if it ever connected
    ///
    /// Returns a copy. Ghost records of closed connections are still found
    /// here under `GhostPolicy::Retain`.
    pub fn get(&self, identity: Identity) -> Option<PlayerRecord> {
        self.players.get(&identity).copied()
    }

    /// Deletes the record for `identity`
    ///
    /// Returns the removed record, or None if there was none.
    pub fn remove(&mut self, identity: Identity) -> Option<PlayerRecord> {
        let removed = self.players.remove(&identity);
        if removed.is_some() {
            info!("Removed player {}", identity);
        }
        removed
    }

    /// Copy of every record, ordered by identity.
    pub fn snapshot(&self) -> Vec<PlayerRecord> {
        let mut records: Vec<PlayerRecord> = self.players.values().copied().collect();
        records.sort_by_key(|record| record.identity);
        records
    }

    /// Number of records, ghosts included
    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_insert_spawn() {
        let mut registry = PlayerRegistry::new();
        registry.insert_spawn(1, Position::spawn());

        let record = registry.get(1).unwrap();
        assert_eq!(record.identity, 1);
        assert_approx_eq!(record.position.x, 100.0);
        assert_approx_eq!(record.position.y, 100.0);
    }

    #[test]
    fn test_upsert_inserts_unknown_identity() {
        let mut registry = PlayerRegistry::new();

        assert!(registry.upsert(3, Position::new(1.0, 2.0)));
        assert_eq!(registry.get(3).unwrap().position, Position::new(1.0, 2.0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_upsert_last_write_wins() {
        let mut registry = PlayerRegistry::new();
        registry.insert_spawn(1, Position::spawn());

        registry.upsert(1, Position::new(50.0, 60.0));
        registry.upsert(1, Position::new(10.0, 20.0));

        assert_eq!(registry.get(1).unwrap().position, Position::new(10.0, 20.0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_repeated_upsert_is_idempotent() {
        let mut registry = PlayerRegistry::new();
        let position = Position::new(42.0, 24.0);

        assert!(registry.upsert(1, position));
        let before = registry.get(1).unwrap();

        for _ in 0..10 {
            assert!(!registry.upsert(1, position));
        }

        assert_eq!(registry.get(1).unwrap(), before);
    }

    #[test]
    fn test_remove() {
        let mut registry = PlayerRegistry::new();
        registry.insert_spawn(1, Position::spawn());

        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_ordered_copy() {
        let mut registry = PlayerRegistry::new();
        for identity in [5, 2, 9, 1] {
            registry.insert_spawn(identity, Position::spawn());
        }

        let snapshot = registry.snapshot();
        registry.upsert(2, Position::new(0.0, 0.0));

        let identities: Vec<Identity> = snapshot.iter().map(|r| r.identity).collect();
        assert_eq!(identities, vec![1, 2, 5, 9]);
        assert_eq!(snapshot[1].position, Position::spawn());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_are_not_lost() {
        let registry = PlayerRegistry::shared();

        let mut tasks = Vec::new();
        for identity in [1, 2] {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                for step in 0..500 {
                    let position = Position::new(identity as f32, step as f32);
                    registry.write().await.upsert(identity, position);
                    tokio::task::yield_now().await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        let registry = registry.read().await;
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).unwrap().position, Position::new(1.0, 499.0));
        assert_eq!(registry.get(2).unwrap().position, Position::new(2.0, 499.0));
    }
}
