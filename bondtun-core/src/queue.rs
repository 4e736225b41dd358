//! Bounded MPMC queues of raw packet buffers.
//!
//! Two of these connect the TUN device to the channel pool: the outbound
//! queue (TUN reader -> any channel sender) and the inbound queue (any
//! channel receiver -> TUN writer). Capacity is the sole throttle: a push
//! on a full queue suspends the producer instead of dropping, which is how
//! backpressure reaches the TUN reader when every channel is slow.
//!
//! The queue is split into directional halves. Once every handle on one
//! side is gone the other side observes [`QueueClosed`], so blocked tasks
//! unwind cleanly during shutdown instead of hanging forever.

/// Returned by push/pop once the opposite side of the queue is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("packet queue closed")]
pub struct QueueClosed;

/// Producer half of a packet queue. Clones feed the same queue.
#[derive(Clone)]
pub struct PacketSender(flume::Sender<Vec<u8>>);

/// Consumer half of a packet queue. Clones drain the same queue
/// competitively; each packet is delivered to exactly one consumer.
#[derive(Clone)]
pub struct PacketReceiver(flume::Receiver<Vec<u8>>);

/// Create a bounded packet queue.
///
/// Order is preserved per producer; no ordering guarantee exists across
/// producers or across consumers.
pub fn packet_queue(capacity: usize) -> (PacketSender, PacketReceiver) {
    let (tx, rx) = flume::bounded(capacity);
    (PacketSender(tx), PacketReceiver(rx))
}

impl PacketSender {
    /// Enqueue one packet, suspending while the queue is full.
    pub async fn push(&self, packet: Vec<u8>) -> Result<(), QueueClosed> {
        self.0.send_async(packet).await.map_err(|_| QueueClosed)
    }
}

impl PacketReceiver {
    /// Dequeue one packet, suspending while the queue is empty.
    pub async fn pop(&self) -> Result<Vec<u8>, QueueClosed> {
        self.0.recv_async().await.map_err(|_| QueueClosed)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
