//! Linux TUN device.
//!
//! Opens `queue_count` handles on one interface (multi-queue TUN when more
//! than one), assigns the tunnel address as a /32 host-scoped address,
//! negotiates the MTU from the physical interface, brings the link up and
//! installs the tunnel network route. Interface configuration goes through
//! the `ip` command.

use std::net::IpAddr;
use std::process::Command;
use std::sync::Arc;

use ipnet::IpNet;
use tun_rs::{AsyncDevice, DeviceBuilder};

use super::{tunnel_mtu, TunError};

/// One TUN file handle. Clones share the same handle; with multi-queue
/// enabled each handle carries an independent slice of the interface's
/// traffic.
#[derive(Clone)]
pub struct TunQueue {
    device: Arc<AsyncDevice>,
    mtu: u16,
}

impl TunQueue {
    /// Read one whole IP packet. Blocks until a packet is available; never
    /// returns a partial packet.
    pub async fn read_packet(&self) -> Result<Vec<u8>, TunError> {
        let mut buf = vec![0u8; usize::from(self.mtu) + 4];
        let n = self.device.recv(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Write exactly one packet. A partial write is a hard error, not
    /// retried.
    pub async fn write_packet(&self, packet: &[u8]) -> Result<(), TunError> {
        let n = self.device.send(packet).await?;
        if n != packet.len() {
            return Err(TunError::ShortWrite {
                sent: n,
                len: packet.len(),
            });
        }
        Ok(())
    }
}

/// The opened TUN interface: name, negotiated MTU and its queue handles.
/// Handles close when the last clone drops.
pub struct LinuxTun {
    name: String,
    mtu: u16,
    queues: Vec<TunQueue>,
}

impl LinuxTun {
    /// Create and configure the tunnel interface.
    ///
    /// `phys_iface` bounds the tunnel MTU; `ipnet` carries the local
    /// tunnel address and the network routed via the interface.
    pub async fn open(
        phys_iface: &str,
        ipnet: IpNet,
        queue_count: usize,
    ) -> Result<Self, TunError> {
        let phys_mtu = phys_iface_mtu(phys_iface)?;
        let mtu = tunnel_mtu(phys_mtu)?;

        let mut queues = Vec::with_capacity(queue_count);
        let mut name: Option<String> = None;
        for _ in 0..queue_count.max(1) {
            let mut builder = DeviceBuilder::new().mtu(mtu);
            if let Some(ifname) = &name {
                builder = builder.name(ifname.as_str());
            }
            if queue_count > 1 {
                builder = builder.multi_queue(true);
            }
            let device = builder
                .build_async()
                .map_err(|e| TunError::Create(e.to_string()))?;

            if name.is_none() {
                name = Some(device.name().map_err(|e| TunError::Create(e.to_string()))?);
            }
            queues.push(TunQueue {
                device: Arc::new(device),
                mtu,
            });
        }
        let name = name.expect("at least one queue opened");

        configure_iface(&name, ipnet, mtu)?;
        tracing::info!(ifname = %name, mtu, queues = queues.len(), "tun init success");

        Ok(Self { name, mtu, queues })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn queues(&self) -> &[TunQueue] {
        &self.queues
    }
}

/// MTU of a physical interface, from sysfs.
pub fn phys_iface_mtu(name: &str) -> Result<usize, TunError> {
    let raw = std::fs::read_to_string(format!("/sys/class/net/{name}/mtu")).map_err(|e| {
        TunError::InterfaceLookup {
            name: name.to_string(),
            source: e,
        }
    })?;
    let mtu: usize = raw
        .trim()
        .parse()
        .map_err(|_| TunError::MtuUnknown {
            name: name.to_string(),
        })?;
    if mtu == 0 {
        return Err(TunError::MtuUnknown {
            name: name.to_string(),
        });
    }
    Ok(mtu)
}

fn ip(step: &'static str, args: &[&str]) -> Result<(), TunError> {
    let out = Command::new("ip")
        .args(args)
        .output()
        .map_err(|e| TunError::Configure {
            step,
            detail: format!("failed to spawn ip: {e}"),
        })?;

    if !out.status.success() {
        let stdout = String::from_utf8_lossy(&out.stdout);
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(TunError::Configure {
            step,
            detail: format!("ip {} failed ({}): {stdout}{stderr}", args.join(" "), out.status),
        });
    }
    Ok(())
}

/// Assign the /32 host address, sync the MTU, bring the link up and route
/// the tunnel network through the interface. `replace` keeps a pre-existing
/// identical address or route from counting as an error.
fn configure_iface(ifname: &str, ipnet: IpNet, mtu: u16) -> Result<(), TunError> {
    let local: IpAddr = ipnet.addr();

    // /32 host address so no broadcast route is created; the network is
    // routed explicitly below.
    ip(
        "addr",
        &["addr", "replace", &format!("{local}/32"), "dev", ifname],
    )?;
    ip(
        "mtu",
        &["link", "set", "dev", ifname, "mtu", &mtu.to_string()],
    )?;
    ip("up", &["link", "set", "dev", ifname, "up"])?;
    ip(
        "route",
        &[
            "route",
            "replace",
            &ipnet.trunc().to_string(),
            "dev",
            ifname,
        ],
    )?;

    tracing::info!(ifname, %local, network = %ipnet.trunc(), "tun interface configured");
    Ok(())
}
