//! TUN device contract and MTU negotiation.
//!
//! The tunnel MTU is the physical interface MTU minus the encapsulation
//! overhead of the outer transport headers. The platform-specific device
//! handling lives in the `linux` submodule; requires CAP_NET_ADMIN.

use std::io;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::{LinuxTun, TunQueue};

/// Outer 20-byte IP header plus 8-byte UDP header per tunnelled packet.
pub const ENCAP_OVERHEAD: usize = 28;

#[derive(Debug, thiserror::Error)]
pub enum TunError {
    #[error("error looking up interface {name}: {source}")]
    InterfaceLookup { name: String, source: io::Error },

    #[error("failed to determine MTU for {name} interface")]
    MtuUnknown { name: String },

    #[error("interface mtu {mtu} is too small for {ENCAP_OVERHEAD} bytes of encapsulation overhead")]
    MtuTooSmall { mtu: usize },

    #[error("failed to create tun device: {0}")]
    Create(String),

    #[error("failed to configure tun device ({step}): {detail}")]
    Configure { step: &'static str, detail: String },

    #[error("tun write accepted {sent} of {len} bytes")]
    ShortWrite { sent: usize, len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Usable tunnel MTU for a physical link MTU.
///
/// Fails when the physical MTU leaves no room for a payload after the
/// encapsulation overhead; opening the tunnel on such an interface is a
/// configuration error caught before any channel is created.
pub fn tunnel_mtu(phys_mtu: usize) -> Result<u16, TunError> {
    if phys_mtu <= ENCAP_OVERHEAD {
        return Err(TunError::MtuTooSmall { mtu: phys_mtu });
    }
    u16::try_from(phys_mtu - ENCAP_OVERHEAD)
        .map_err(|_| TunError::MtuTooSmall { mtu: phys_mtu })
}
