//! Core library for the bondtun multi-path tunnel.
//!
//! bondtun forwards IP packets between a TUN interface and a bonded set of
//! UDP channels. Every channel drains the same outbound queue and feeds the
//! same inbound queue, so any channel may carry any packet; load distribution
//! falls out of task scheduling fairness rather than explicit round-robin,
//! and packet order across channels is not preserved.
//!
//! Modules:
//!
//! - `config`: tunnel configuration and role selection
//! - `queue`: bounded MPMC packet queues connecting TUN and channels
//! - `channel`: one UDP channel (socket, peer discovery, traffic counters)
//! - `pool`: the set of channels plus the shared queues
//! - `engine`: wiring between the TUN device and the channel pool
//! - `packet`: small pure IP packet helpers (version sniff, TTL rewrite)
//! - `tun`: TUN device contract and the Linux implementation

pub mod channel;
pub mod config;
pub mod engine;
pub mod packet;
pub mod pool;
pub mod queue;
pub mod tun;

pub use config::{ChannelRole, TunnelConfig};
pub use pool::ChannelPool;
pub use queue::{packet_queue, PacketReceiver, PacketSender};
