//! Receive queue between a UART interrupt (or RX task) and blocking readers.
//!
//! The producer side, [`RxQueue::write_one`], never waits and may run in
//! interrupt context. When the queue is full the incoming byte is dropped
//! and counted; bytes already queued are never overwritten. The consumer
//! suspends on the queue until its bytes arrive or its deadline passes.

use core::cell::Cell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, with_deadline};
use embedded_io_async::{Error as _, Read};
use log::{trace, warn};

/// Default capacity of the receive queue, matching the response buffer.
pub const RX_QUEUE_SIZE: usize = 256;

/// A read ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadTimeout {
    /// Bytes stored in the buffer before the deadline.
    pub read: usize,
}

impl fmt::Display for ReadTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read timed out after {} bytes", self.read)
    }
}

/// Single-producer, single-consumer byte queue fed from UART receive.
pub struct RxQueue<const N: usize = RX_QUEUE_SIZE> {
    channel: Channel<CriticalSectionRawMutex, u8, N>,
    dropped: Mutex<CriticalSectionRawMutex, Cell<usize>>,
}

impl<const N: usize> RxQueue<N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: Mutex::new(Cell::new(0)),
        }
    }

    /// Queue one received byte. Returns `false` if the queue was full and
    /// the byte was dropped.
    pub fn write_one(&self, byte: u8) -> bool {
        if self.channel.try_send(byte).is_ok() {
            return true;
        }
        self.dropped.lock(|d| d.set(d.get().wrapping_add(1)));
        false
    }

    /// Fill `buf` completely, suspending until enough bytes arrive or
    /// `timeout` elapses.
    ///
    /// On timeout the bytes already received stay in `buf`; the count is
    /// reported in the error.
    pub async fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, ReadTimeout> {
        let deadline = Instant::now() + timeout;
        for (read, slot) in buf.iter_mut().enumerate() {
            match self.read_byte(deadline).await {
                Some(byte) => *slot = byte,
                None => return Err(ReadTimeout { read }),
            }
        }
        Ok(buf.len())
    }

    /// Next byte, or `None` once `deadline` has passed.
    pub async fn read_byte(&self, deadline: Instant) -> Option<u8> {
        let byte = with_deadline(deadline, self.channel.receive()).await.ok()?;
        trace!("rx {:?}", byte as char);
        Some(byte)
    }

    /// Discard everything queued. Returns the number of bytes dropped.
    pub fn clear(&self) -> usize {
        let mut count = 0;
        while self.channel.try_receive().is_ok() {
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Bytes lost to a full queue since creation.
    pub fn dropped(&self) -> usize {
        self.dropped.lock(|d| d.get())
    }
}

impl<const N: usize> Default for RxQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed `queue` from an async UART receiver. Never returns.
///
/// For HALs that hand out the RX half as an [`embedded_io_async::Read`]
/// instead of a per-byte interrupt callback.
pub async fn pump<R: Read, const N: usize>(mut uart: R, queue: &RxQueue<N>) {
    let mut chunk = [0u8; 32];
    loop {
        match uart.read(&mut chunk).await {
            Ok(len) => {
                for byte in &chunk[..len] {
                    if !queue.write_one(*byte) {
                        warn!("rx queue full, byte dropped");
                    }
                }
            }
            Err(e) => warn!("UART RX error: {:?}", e.kind()),
        }
    }
}
