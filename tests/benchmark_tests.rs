//! Performance benchmarks for the relay's hot paths

use server::client_manager::ClientManager;
use server::registry::PlayerRegistry;
use shared::{Message, Position};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Benchmarks position message encode/decode
#[test]
fn benchmark_position_codec() {
    let message = Message::Position {
        identity: 17,
        x: 321.5,
        y: 654.25,
    };

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = message.encode().unwrap();
        let _decoded = Message::decode(&bytes).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Position codec: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks chat message encode/decode with a long line
#[test]
fn benchmark_chat_codec() {
    let message = Message::Chat {
        sender: 3,
        text: "x".repeat(shared::MAX_CHAT_LEN),
    };

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = message.encode().unwrap();
        let _decoded = Message::decode(&bytes).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Chat codec: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks registry upserts followed by a snapshot, as one broadcast does
#[test]
fn benchmark_registry_snapshot() {
    let mut registry = PlayerRegistry::new();
    for identity in 1..=100 {
        registry.insert_spawn(identity, Position::spawn());
    }

    let iterations = 1_000;
    let start = Instant::now();

    for i in 0..iterations {
        let identity = (i % 100) + 1;
        registry.upsert(identity, Position::new(i as f32, i as f32));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 100);
    }

    let duration = start.elapsed();
    println!(
        "Registry snapshot: {} upsert+snapshot cycles over {} players in {:?}",
        iterations,
        registry.len(),
        duration
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Stress tests broadcast target collection with many connections
#[test]
fn stress_test_outbound_targets() {
    let mut manager = ClientManager::new(500);
    let mut receivers = Vec::new();

    for i in 0..500u16 {
        let identity = manager.next_identity().unwrap();
        let (tx, rx) = mpsc::channel(4);
        let addr = format!("127.0.0.1:{}", 20000 + i).parse().unwrap();
        assert!(manager.register(identity, addr, tx, CancellationToken::new()));
        receivers.push(rx);
    }

    let iterations = 1_000;
    let start = Instant::now();

    for i in 0..iterations {
        let targets = manager.outbound_targets(Some((i % 500) + 1));
        assert_eq!(targets.len(), 499);
    }

    let duration = start.elapsed();
    println!(
        "Outbound targets: {} collections over {} connections in {:?}",
        iterations,
        manager.len(),
        duration
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}
