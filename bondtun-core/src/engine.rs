//! Wiring between the TUN device and the channel pool.
//!
//! One reader/writer task pair per TUN queue handle, plus the pool's three
//! tasks per channel. All tasks run for the process lifetime; the
//! cancellation token is the only way out.

use tokio_util::sync::CancellationToken;

use crate::channel::ChannelError;
use crate::config::{ConfigError, TunnelConfig};
use crate::tun::TunError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tun(#[from] TunError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("tun forwarding is only supported on linux")]
    Unsupported,
}

/// Bring the tunnel up and forward until `shutdown` fires.
///
/// Configuration failures (interface lookup, MTU negotiation, address or
/// route setup, channel binding) abort before any forwarding task starts.
/// After startup, per-channel failures degrade the bond width but never
/// stop the process.
pub async fn run(cfg: TunnelConfig, shutdown: CancellationToken) -> Result<(), EngineError> {
    cfg.validate()?;

    #[cfg(target_os = "linux")]
    {
        run_linux(cfg, shutdown).await
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = shutdown;
        Err(EngineError::Unsupported)
    }
}

#[cfg(target_os = "linux")]
async fn run_linux(cfg: TunnelConfig, shutdown: CancellationToken) -> Result<(), EngineError> {
    use crate::pool::ChannelPool;
    use crate::tun::LinuxTun;
    use tokio::task::JoinSet;

    let tun = LinuxTun::open(&cfg.phys_iface, cfg.ipnet, cfg.tun_queues).await?;
    let pool = ChannelPool::allocate(&cfg, shutdown.clone()).await?;
    tracing::info!(
        ifname = tun.name(),
        mtu = tun.mtu(),
        channels = pool.channels().len(),
        role = if cfg.peer.is_some() { "active" } else { "passive" },
        "tunnel up"
    );

    let mut tasks = JoinSet::new();
    for queue in tun.queues() {
        tasks.spawn(tun_reader(
            queue.clone(),
            cfg.ttl_decrement,
            pool.outbound(),
            shutdown.clone(),
        ));
        tasks.spawn(tun_writer(queue.clone(), pool.inbound(), shutdown.clone()));
    }

    // The process body has no natural termination condition; block until
    // cancelled, then unwind every task.
    shutdown.cancelled().await;
    while tasks.join_next().await.is_some() {}
    pool.join().await;
    tracing::info!("tunnel down");
    Ok(())
}

/// TUN -> outbound queue. Read errors are transient device hiccups: logged
/// and retried.
#[cfg(target_os = "linux")]
async fn tun_reader(
    tun: crate::tun::TunQueue,
    ttl_decrement: Option<u8>,
    outbound: crate::queue::PacketSender,
    shutdown: CancellationToken,
) {
    loop {
        let packet = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = tun.read_packet() => match read {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "tun read failed");
                    continue;
                }
            },
        };

        let packet = match ttl_decrement {
            Some(step) => match crate::packet::decrement_ttl(&packet, step) {
                Some(p) => p,
                // Transform declined the packet (non-IPv4 or expiring TTL).
                None => continue,
            },
            None => packet,
        };

        if outbound.push(packet).await.is_err() {
            break;
        }
    }
}

/// Inbound queue -> TUN. Write errors are logged and skipped, best-effort.
#[cfg(target_os = "linux")]
async fn tun_writer(
    tun: crate::tun::TunQueue,
    inbound: crate::queue::PacketReceiver,
    shutdown: CancellationToken,
) {
    loop {
        let packet = tokio::select! {
            _ = shutdown.cancelled() => break,
            popped = inbound.pop() => match popped {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        if let Err(e) = tun.write_packet(&packet).await {
            tracing::warn!(len = packet.len(), error = %e, "tun write failed");
        }
    }
}
