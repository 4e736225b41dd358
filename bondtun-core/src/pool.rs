//! The bonding fabric: N channels around two shared queues.
//!
//! Every channel drains the same outbound queue and feeds the same inbound
//! queue, which is what makes the bond a bond: any channel may carry any
//! packet. Distribution across channels is whatever task scheduling makes
//! of it (unspecified policy, order not preserved across channels), which
//! is acceptable because the tunnel tolerates reordering.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelError, UdpChannel};
use crate::config::{ChannelRole, TunnelConfig};
use crate::queue::{packet_queue, PacketReceiver, PacketSender};

/// The set of active channels plus the TUN-facing ends of the two queues.
///
/// Channels are created once at startup and live until shutdown; there is
/// no dynamic add or remove.
pub struct ChannelPool {
    channels: Vec<Arc<UdpChannel>>,
    outbound: PacketSender,
    inbound: PacketReceiver,
    tasks: JoinSet<()>,
}

impl ChannelPool {
    /// Create the bond: one channel per requested width, three loops each.
    ///
    /// Passive role: channel `i` binds `base_port + i`. Active role:
    /// channel `i` binds a random unused local port and targets
    /// `peer:(base_port + i)`, announcing itself with a probe datagram.
    pub async fn allocate(
        cfg: &TunnelConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, ChannelError> {
        let (outbound_tx, outbound_rx) = packet_queue(cfg.queue_capacity);
        let (inbound_tx, inbound_rx) = packet_queue(cfg.queue_capacity);

        let role = cfg.role();
        let mut channels = Vec::with_capacity(cfg.channels);
        for i in 0..cfg.channels {
            let port = cfg.base_port + i as u16;
            let channel = match role {
                ChannelRole::Passive => UdpChannel::bind(port).await?,
                ChannelRole::Active { peer } => {
                    UdpChannel::connect(SocketAddr::new(peer, port)).await?
                }
            };
            channels.push(channel);
        }

        let mut tasks = JoinSet::new();
        for channel in &channels {
            tasks.spawn(
                channel
                    .clone()
                    .recv_loop(inbound_tx.clone(), shutdown.clone()),
            );
            tasks.spawn(
                channel
                    .clone()
                    .send_loop(outbound_rx.clone(), shutdown.clone()),
            );
            tasks.spawn(
                channel
                    .clone()
                    .report_loop(cfg.report_interval, shutdown.clone()),
            );
        }

        Ok(Self {
            channels,
            outbound: outbound_tx,
            inbound: inbound_rx,
            tasks,
        })
    }

    /// Producer end of the outbound queue, for the TUN reader.
    pub fn outbound(&self) -> PacketSender {
        self.outbound.clone()
    }

    /// Consumer end of the inbound queue, for the TUN writer.
    pub fn inbound(&self) -> PacketReceiver {
        self.inbound.clone()
    }

    pub fn channels(&self) -> &[Arc<UdpChannel>] {
        &self.channels
    }

    /// Wait for every channel task to finish. Meaningful only after the
    /// shutdown token passed to `allocate` has been cancelled.
    pub async fn join(mut self) {
        drop(self.outbound);
        drop(self.inbound);
        while self.tasks.join_next().await.is_some() {}
    }
}
