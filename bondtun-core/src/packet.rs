//! Small pure helpers over raw IP packets.
//!
//! Nothing here touches sockets or queues. The TTL rewrite is an optional
//! loop-avoidance transform applied at the TUN-read boundary when
//! `ttl_decrement` is configured; it is not part of the bonding machinery.

const IPV4_HEADER_LEN: usize = 20;
const TTL_OFFSET: usize = 8;
const CHECKSUM_OFFSET: usize = 10;

/// IP version from the first header nibble, if it looks like IP at all.
pub fn ip_version(packet: &[u8]) -> Option<u8> {
    match packet.first()? >> 4 {
        v @ (4 | 6) => Some(v),
        _ => None,
    }
}

/// Decrement the TTL of an IPv4 packet and fix up the header checksum.
///
/// Returns the rewritten packet, or `None` when the packet is not IPv4 or
/// the TTL would not survive the decrement; the caller drops such packets.
pub fn decrement_ttl(packet: &[u8], step: u8) -> Option<Vec<u8>> {
    if ip_version(packet) != Some(4) || packet.len() < IPV4_HEADER_LEN {
        return None;
    }

    let ttl = packet[TTL_OFFSET];
    if ttl <= step {
        return None;
    }

    let mut out = packet.to_vec();
    out[TTL_OFFSET] = ttl - step;

    let ihl = usize::from(out[0] & 0x0f) * 4;
    if ihl < IPV4_HEADER_LEN || out.len() < ihl {
        return None;
    }
    let checksum = ipv4_header_checksum(&out[..ihl]);
    out[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());

    Some(out)
}

/// IPv4 header checksum over `header`, with the checksum field treated as 0.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for i in (0..header.len()).step_by(2) {
        if i == CHECKSUM_OFFSET {
            continue;
        }
        let word = if i + 1 < header.len() {
            u16::from_be_bytes([header[i], header[i + 1]])
        } else {
            u16::from_be_bytes([header[i], 0])
        };
        sum = sum.wrapping_add(u32::from(word));
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
