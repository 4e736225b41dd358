//! Tunnel configuration and role selection.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Local UDP port range probed when the active side picks ephemeral ports.
pub const EPHEMERAL_PORT_RANGE: std::ops::Range<u16> = 10_000..50_000;

fn default_ipnet() -> IpNet {
    "172.16.1.1/16".parse().unwrap()
}

fn default_phys_iface() -> String {
    "eth0".to_string()
}

fn default_base_port() -> u16 {
    8000
}

fn default_channels() -> usize {
    10
}

fn default_tun_queues() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_report_interval() -> Duration {
    Duration::from_secs(2)
}

/// Configuration for one tunnel endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Local tunnel address plus the network routed via the TUN interface,
    /// e.g. "172.16.1.1/16". The address is assigned as a /32 on the
    /// interface; the network gets a route through it.
    #[serde(default = "default_ipnet")]
    pub ipnet: IpNet,

    /// Physical interface whose MTU bounds the tunnel MTU.
    #[serde(default = "default_phys_iface")]
    pub phys_iface: String,

    /// Remote peer host. Absent means passive (server) role: channels bind
    /// `base_port + i` and learn their peers from the first datagram.
    /// Present means active (client) role: channel `i` targets
    /// `peer:(base_port + i)` from a random local port.
    #[serde(default)]
    pub peer: Option<IpAddr>,

    /// First UDP port of the bond.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Bond width: number of UDP channels.
    #[serde(default = "default_channels")]
    pub channels: usize,

    /// Number of multi-queue TUN handles to open (1 = plain TUN).
    #[serde(default = "default_tun_queues")]
    pub tun_queues: usize,

    /// Capacity of each shared packet queue. Producers block when full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Interval between per-channel traffic reports.
    #[serde(default = "default_report_interval", with = "humantime_serde")]
    pub report_interval: Duration,

    /// Optional TTL decrement applied to IPv4 packets read from the TUN
    /// interface (loop avoidance). Packets whose TTL would not survive the
    /// decrement are dropped. Off by default.
    #[serde(default)]
    pub ttl_decrement: Option<u8>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            ipnet: default_ipnet(),
            phys_iface: default_phys_iface(),
            peer: None,
            base_port: default_base_port(),
            channels: default_channels(),
            tun_queues: default_tun_queues(),
            queue_capacity: default_queue_capacity(),
            report_interval: default_report_interval(),
            ttl_decrement: None,
        }
    }
}

/// Which side of the tunnel this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Bind `base_port + i` and wait for the peer's probe.
    Passive,
    /// Connect to `peer:(base_port + i)` from a random local port.
    Active { peer: IpAddr },
}

/// Configuration validation errors. All fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("bond width must be at least 1 channel")]
    NoChannels,

    #[error("base_port {base_port} + {channels} channels exceeds port 65535")]
    PortRangeOverflow { base_port: u16, channels: usize },

    #[error("queue_capacity must be at least 1")]
    ZeroQueueCapacity,

    #[error("tun_queues must be at least 1")]
    NoTunQueues,
}

impl TunnelConfig {
    /// Role implied by the presence of a peer address.
    pub fn role(&self) -> ChannelRole {
        match self.peer {
            Some(peer) => ChannelRole::Active { peer },
            None => ChannelRole::Passive,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels == 0 {
            return Err(ConfigError::NoChannels);
        }
        if self
            .base_port
            .checked_add(u16::try_from(self.channels - 1).unwrap_or(u16::MAX))
            .is_none()
        {
            return Err(ConfigError::PortRangeOverflow {
                base_port: self.base_port,
                channels: self.channels,
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.tun_queues == 0 {
            return Err(ConfigError::NoTunQueues);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = TunnelConfig::default();
        assert_eq!(cfg.base_port, 8000);
        assert_eq!(cfg.channels, 10);
        assert_eq!(cfg.report_interval, Duration::from_secs(2));
        assert!(cfg.peer.is_none());
        assert!(cfg.ttl_decrement.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_role_from_peer() {
        let mut cfg = TunnelConfig::default();
        assert_eq!(cfg.role(), ChannelRole::Passive);

        let peer: IpAddr = "192.0.2.7".parse().unwrap();
        cfg.peer = Some(peer);
        assert_eq!(cfg.role(), ChannelRole::Active { peer });
    }

    #[test]
    fn test_validate_rejects_zero_channels() {
        let cfg = TunnelConfig {
            channels: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::NoChannels)));
    }

    #[test]
    fn test_validate_rejects_port_overflow() {
        let cfg = TunnelConfig {
            base_port: 65_530,
            channels: 10,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::PortRangeOverflow { .. })
        ));
    }

    #[test]
    fn test_toml_round_trip_with_defaults() {
        // A minimal file relies on serde defaults for everything else.
        let cfg: TunnelConfig = toml::from_str(
            r#"
            ipnet = "10.9.0.1/24"
            peer = "203.0.113.4"
            channels = 3
            report_interval = "5s"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.channels, 3);
        assert_eq!(cfg.report_interval, Duration::from_secs(5));
        assert_eq!(cfg.ipnet.to_string(), "10.9.0.1/24");
        assert!(matches!(cfg.role(), ChannelRole::Active { .. }));

        let raw = toml::to_string_pretty(&cfg).unwrap();
        let back: TunnelConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.base_port, cfg.base_port);
        assert_eq!(back.peer, cfg.peer);
    }
}
