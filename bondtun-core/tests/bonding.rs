//! End-to-end bonding over localhost UDP, no TUN device required.
//!
//! Two channel pools play the two tunnel endpoints; packets are pushed into
//! one side's outbound queue and collected from the other side's inbound
//! queue, exactly as the forwarding engine would.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use bondtun_core::{ChannelPool, TunnelConfig};

fn test_base_port(salt: u16) -> u16 {
    55_000
        + salt
        + (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos() as u16
            % 2_000)
}

fn passive_cfg(base_port: u16, channels: usize) -> TunnelConfig {
    TunnelConfig {
        base_port,
        channels,
        queue_capacity: 256,
        ..Default::default()
    }
}

fn active_cfg(base_port: u16, channels: usize) -> TunnelConfig {
    TunnelConfig {
        peer: Some("127.0.0.1".parse().unwrap()),
        base_port,
        channels,
        queue_capacity: 256,
        ..Default::default()
    }
}

/// Poll until every passive channel has learned its peer from the probe.
async fn wait_all_learned(pool: &ChannelPool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if pool.channels().iter().all(|c| c.remote().is_some()) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "passive channels never learned their peers"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A 64-byte IPv4-shaped test packet with a distinguishing tag.
fn test_packet(tag: u8) -> Vec<u8> {
    let mut pkt = vec![0u8; 64];
    pkt[0] = 0x45;
    pkt[2..4].copy_from_slice(&64u16.to_be_bytes());
    pkt[8] = 64; // TTL
    pkt[63] = tag;
    pkt
}

#[tokio::test]
async fn test_three_channel_bond_forwards_exactly_once() {
    let base_port = test_base_port(0);
    let shutdown = CancellationToken::new();

    let passive = ChannelPool::allocate(&passive_cfg(base_port, 3), shutdown.clone())
        .await
        .expect("passive pool");
    let active = ChannelPool::allocate(&active_cfg(base_port, 3), shutdown.clone())
        .await
        .expect("active pool");

    // The peer's three probes make every passive channel Active; the probe
    // payloads themselves must never be forwarded.
    wait_all_learned(&passive).await;
    assert!(passive.inbound().is_empty());

    let outbound = active.outbound();
    for tag in 0..60u8 {
        outbound.push(test_packet(tag)).await.unwrap();
    }

    // Every packet arrives byte-identical on some channel, exactly once.
    let inbound = passive.inbound();
    let mut seen: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
    for _ in 0..60 {
        let pkt = tokio::time::timeout(Duration::from_secs(5), inbound.pop())
            .await
            .expect("bond dropped a packet")
            .unwrap();
        let tag = pkt[63];
        assert!(seen.insert(tag, pkt).is_none(), "duplicate packet {tag}");
    }
    for (tag, pkt) in &seen {
        assert_eq!(pkt, &test_packet(*tag));
    }

    // Nothing extra trickles in afterwards.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(inbound.is_empty());

    shutdown.cancel();
    active.join().await;
    passive.join().await;
}

#[tokio::test]
async fn test_round_trip_both_directions() {
    let base_port = test_base_port(2_500);
    let shutdown = CancellationToken::new();

    let passive = ChannelPool::allocate(&passive_cfg(base_port, 2), shutdown.clone())
        .await
        .unwrap();
    let active = ChannelPool::allocate(&active_cfg(base_port, 2), shutdown.clone())
        .await
        .unwrap();
    wait_all_learned(&passive).await;

    // Active -> passive.
    active.outbound().push(test_packet(0xaa)).await.unwrap();
    let got = tokio::time::timeout(Duration::from_secs(5), passive.inbound().pop())
        .await
        .expect("forward direction stalled")
        .unwrap();
    assert_eq!(got, test_packet(0xaa));

    // Passive -> active, over the learned endpoints.
    passive.outbound().push(test_packet(0xbb)).await.unwrap();
    let got = tokio::time::timeout(Duration::from_secs(5), active.inbound().pop())
        .await
        .expect("return direction stalled")
        .unwrap();
    assert_eq!(got, test_packet(0xbb));

    shutdown.cancel();
    active.join().await;
    passive.join().await;
}

#[tokio::test]
async fn test_bond_degrades_to_active_subset() {
    let base_port = test_base_port(5_000);
    let shutdown = CancellationToken::new();

    // Passive side expects a width of 3, but the peer only brings up the
    // first two channels; the third stays in the learning state forever.
    let passive = ChannelPool::allocate(&passive_cfg(base_port, 3), shutdown.clone())
        .await
        .unwrap();
    let active = ChannelPool::allocate(&active_cfg(base_port, 2), shutdown.clone())
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while passive
        .channels()
        .iter()
        .take(2)
        .any(|c| c.remote().is_none())
    {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(passive.channels()[2].remote().is_none());

    // Traffic still flows over the remaining channels.
    let outbound = active.outbound();
    for tag in 0..20u8 {
        outbound.push(test_packet(tag)).await.unwrap();
    }
    let inbound = passive.inbound();
    let mut tags = Vec::new();
    for _ in 0..20 {
        let pkt = tokio::time::timeout(Duration::from_secs(5), inbound.pop())
            .await
            .expect("degraded bond dropped a packet")
            .unwrap();
        tags.push(pkt[63]);
    }
    tags.sort_unstable();
    assert_eq!(tags, (0..20u8).collect::<Vec<_>>());

    shutdown.cancel();
    active.join().await;
    passive.join().await;
}
