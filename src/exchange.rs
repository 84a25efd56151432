//! The buffer pool shared between acquisition and the processing loop.
//!
//! Two bounded queues of the same capacity move [`SamplePacket`]s around by
//! value: `input` carries filled packets to the loop, `return` carries spent
//! packets back to acquisition for refilling. The pool is allocated once, up
//! front, and then cycles without allocating.

use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use tracing::warn;

use crate::packet::SamplePacket;

/// Result of waiting on the input queue
#[derive(Debug)]
pub enum Poll {
    Packet(SamplePacket),
    /// Nothing arrived within the timeout
    Timeout,
    /// Someone asked the waiting loop to stop
    Interrupted,
    /// Every acquisition handle was dropped
    Disconnected,
}

/// Build a pool of `capacity` packets of `fft_size` samples each.
///
/// All packets start out empty in the return queue, ready for acquisition.
/// A capacity of zero is raised to one: zero-capacity channels are rendezvous
/// channels and could never hold a pooled buffer.
pub fn buffer_pool(capacity: usize, fft_size: usize) -> (Acquisition, Exchange) {
    if capacity == 0 {
        warn!("Buffer pool capacity must be at least 1, using 1");
    }
    let capacity = capacity.max(1);
    let (input_tx, input_rx) = bounded(capacity);
    let (return_tx, return_rx) = bounded(capacity);
    for _ in 0..capacity {
        // Can't fail, the queue holds exactly `capacity` (>= 1) packets
        let _ = return_tx.try_send(SamplePacket::with_size(fft_size));
    }
    let (interrupt_tx, interrupt_rx) = bounded(1);
    (
        Acquisition {
            input: input_tx,
            returned: return_rx,
        },
        Exchange {
            input: input_rx,
            returned: return_tx,
            interrupt_tx,
            interrupt_rx,
            capacity,
        },
    )
}

/// Producer side of the pool
#[derive(Clone)]
pub struct Acquisition {
    input: Sender<SamplePacket>,
    returned: Receiver<SamplePacket>,
}

impl Acquisition {
    /// Wait up to `timeout` for a spent packet to refill
    pub fn take_empty(&self, timeout: Duration) -> Option<SamplePacket> {
        self.returned.recv_timeout(timeout).ok()
    }

    pub fn try_take_empty(&self) -> Option<SamplePacket> {
        self.returned.try_recv().ok()
    }

    /// Hand a filled packet to the loop without blocking. A full (or closed)
    /// input queue gives the packet back so it can be reused.
    pub fn submit(&self, packet: SamplePacket) -> Result<(), SamplePacket> {
        self.input.try_send(packet).map_err(|e| e.into_inner())
    }

    /// Packets currently waiting for the loop
    pub fn pending(&self) -> usize {
        self.input.len()
    }

    /// Spent packets waiting to be refilled
    pub fn available(&self) -> usize {
        self.returned.len()
    }
}

/// Consumer side of the pool, owned by the processing loop
pub struct Exchange {
    input: Receiver<SamplePacket>,
    returned: Sender<SamplePacket>,
    interrupt_tx: Sender<()>,
    interrupt_rx: Receiver<()>,
    capacity: usize,
}

impl Exchange {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block for at most `timeout` waiting on the next filled packet.
    ///
    /// This is the only place the loop waits for data. An [`Interrupter`]
    /// wakes it early.
    pub fn poll_input(&self, timeout: Duration) -> Poll {
        select! {
            recv(self.input) -> msg => match msg {
                Ok(packet) => Poll::Packet(packet),
                Err(_) => Poll::Disconnected,
            },
            recv(self.interrupt_rx) -> _ => Poll::Interrupted,
            default(timeout) => Poll::Timeout,
        }
    }

    /// Give a packet back to acquisition without blocking. If the return queue
    /// is full (or acquisition is gone) the packet is dropped and `false` is
    /// returned; the shrinking pool is acquisition's backpressure signal.
    pub fn offer_return(&self, packet: SamplePacket) -> bool {
        match self.returned.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// A handle that can wake a blocked [`Exchange::poll_input`] from any thread
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            tx: self.interrupt_tx.clone(),
        }
    }

    /// Throw away interrupts nobody waited for
    pub fn clear_interrupts(&self) {
        while self.interrupt_rx.try_recv().is_ok() {}
    }
}

#[derive(Clone)]
pub struct Interrupter {
    tx: Sender<()>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        // One pending token is enough to wake the poller
        let _ = self.tx.try_send(());
    }
}
