//! One bonded UDP path.
//!
//! A channel owns a UDP socket and runs three loops for the process
//! lifetime: a receiver feeding the shared inbound queue, a sender draining
//! the shared outbound queue, and a periodic traffic reporter.
//!
//! The remote endpoint starts unset in the passive role and is learned from
//! the first inbound datagram; that datagram is the peer's announce probe
//! and its payload is never forwarded. The endpoint cell is written once by
//! the channel's own receive loop and read by its own send loop, so a
//! single-assignment cell is all the synchronization it needs.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::EPHEMERAL_PORT_RANGE;
use crate::queue::{PacketReceiver, PacketSender};

/// Largest datagram a channel will accept. Payload packets are bounded by
/// the tunnel MTU, but the socket buffer does not rely on that.
const RECV_BUF_SIZE: usize = 64 * 1024;

/// Body of the announce probe an active channel sends at startup. The
/// passive side consumes it to learn the peer endpoint and discards it.
const PROBE: [u8; 10] = [0u8; 10];

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("udp send wrote {sent} of {len} bytes")]
    ShortWrite { sent: usize, len: usize },
}

/// Packet/byte counters, reset on every report. Relaxed atomics: this is a
/// lossy observability sample, not flow control.
#[derive(Debug, Default)]
pub struct ChannelStats {
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl ChannelStats {
    fn record(&self, bytes: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Current counters, zeroing both.
    pub fn take(&self) -> (u64, u64) {
        (
            self.packets.swap(0, Ordering::Relaxed),
            self.bytes.swap(0, Ordering::Relaxed),
        )
    }
}

/// One UDP channel of the bond.
pub struct UdpChannel {
    socket: UdpSocket,
    local_port: u16,
    remote: OnceLock<SocketAddr>,
    stats: ChannelStats,
}

impl UdpChannel {
    /// Passive (server) role: bind the given local port and wait for the
    /// peer's probe to learn the remote endpoint.
    pub async fn bind(port: u16) -> Result<Arc<Self>, ChannelError> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        let local_port = socket.local_addr()?.port();
        tracing::info!(port = local_port, "udp channel listening");
        Ok(Arc::new(Self {
            socket,
            local_port,
            remote: OnceLock::new(),
            stats: ChannelStats::default(),
        }))
    }

    /// Active (client) role: bind a random unused local port, record the
    /// remote endpoint, and announce ourselves with a probe datagram so the
    /// passive side can learn our address.
    pub async fn connect(remote: SocketAddr) -> Result<Arc<Self>, ChannelError> {
        let socket = bind_ephemeral().await?;
        let local_port = socket.local_addr()?.port();

        let channel = Arc::new(Self {
            socket,
            local_port,
            remote: OnceLock::new(),
            stats: ChannelStats::default(),
        });
        let _ = channel.remote.set(remote);

        channel.socket.send_to(&PROBE, remote).await?;
        tracing::info!(port = local_port, peer = %remote, "udp channel connected");
        Ok(channel)
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Remote endpoint, once pre-supplied or learned.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote.get().copied()
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Receive datagrams and feed the shared inbound queue.
    ///
    /// A socket-level receive error terminates only this channel's receive
    /// path; the rest of the bond keeps forwarding.
    pub async fn recv_loop(
        self: Arc<Self>,
        inbound: PacketSender,
        shutdown: CancellationToken,
    ) {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                recv = self.socket.recv_from(&mut buf) => {
                    let (n, addr) = match recv {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::error!(
                                port = self.local_port,
                                error = %e,
                                "udp receive failed, channel receive path down"
                            );
                            break;
                        }
                    };

                    if self.remote.get().is_none() {
                        // First datagram is the peer's probe: learn the
                        // endpoint, never forward the payload.
                        let _ = self.remote.set(addr);
                        tracing::info!(port = self.local_port, peer = %addr, "peer learned");
                        continue;
                    }

                    if inbound.push(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                    self.stats.record(n);
                }
            }
        }
    }

    /// Drain the shared outbound queue and send toward the remote.
    ///
    /// While no remote is known yet the popped packet is discarded rather
    /// than blocking the queue for the other channels.
    pub async fn send_loop(
        self: Arc<Self>,
        outbound: PacketReceiver,
        shutdown: CancellationToken,
    ) {
        loop {
            let packet = tokio::select! {
                _ = shutdown.cancelled() => break,
                popped = outbound.pop() => match popped {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let Some(remote) = self.remote.get() else {
                tracing::trace!(port = self.local_port, "no peer yet, discarding packet");
                continue;
            };

            match self.socket.send_to(&packet, remote).await {
                Ok(n) if n == packet.len() => self.stats.record(n),
                Ok(n) => {
                    let e = ChannelError::ShortWrite {
                        sent: n,
                        len: packet.len(),
                    };
                    tracing::warn!(port = self.local_port, error = %e, "udp send failed");
                }
                Err(e) => {
                    tracing::warn!(
                        port = self.local_port,
                        len = packet.len(),
                        error = %e,
                        "udp send failed"
                    );
                }
            }
        }
    }

    /// Emit per-channel traffic counters every `interval` and reset them.
    pub async fn report_loop(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so every report covers
        // a full interval.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    let (packets, bytes) = self.stats.take();
                    tracing::info!(
                        port = self.local_port,
                        packets,
                        megabytes = bytes / (1024 * 1024),
                        "channel traffic"
                    );
                }
            }
        }
    }
}

/// Bind a random unused UDP port, retrying on collisions. Concurrent
/// processes may race for ports, so candidates are probed until one binds.
async fn bind_ephemeral() -> io::Result<UdpSocket> {
    loop {
        let port = fastrand::u16(EPHEMERAL_PORT_RANGE);
        match UdpSocket::bind(("0.0.0.0", port)).await {
            Ok(socket) => return Ok(socket),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(e),
        }
    }
}
