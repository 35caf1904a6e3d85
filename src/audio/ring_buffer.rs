//! Bounded ring buffer for PCM bytes
//!
//! This is the hand-off primitive between a producer context and the
//! context that drains audio toward the hardware sink. It is split into a
//! producer half and a consumer half at creation, so each side can move to
//! its own thread and the one-writer/one-reader contract holds by
//! construction.
//!
//! Both operations block for a bounded time, never indefinitely:
//!
//! - `write` waits up to its timeout for enough free space to take the
//!   whole input, then writes as many bytes as fit and returns the count.
//!   Buffered data is never overwritten; backpressure, not data loss, is
//!   the overflow response.
//! - `read` waits up to its timeout for at least one byte and returns 0 on
//!   a bare timeout, signaling starvation rather than an error.
//!
//! `reset` exists only on the consumer half. The writer side cannot
//! observe the buffer moving out from under it mid-write, because only the
//! reading owner can discard content, and it does so during state
//! transitions where the writer is idle.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct RingState {
    data: Box<[u8]>,
    /// Index of the oldest unread byte
    head: usize,
    /// Number of unread bytes; always <= capacity
    len: usize,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.len
    }

    fn push(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.free());
        let capacity = self.capacity();
        let tail = (self.head + self.len) % capacity;
        let first = n.min(capacity - tail);
        self.data[tail..tail + first].copy_from_slice(&bytes[..first]);
        if first < n {
            self.data[..n - first].copy_from_slice(&bytes[first..n]);
        }
        self.len += n;
        n
    }

    fn pop(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        let capacity = self.capacity();
        let first = n.min(capacity - self.head);
        out[..first].copy_from_slice(&self.data[self.head..self.head + first]);
        if first < n {
            out[first..n].copy_from_slice(&self.data[..n - first]);
        }
        self.head = (self.head + n) % capacity;
        self.len -= n;
        n
    }
}

struct RingInner {
    state: Mutex<RingState>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

/// Bounded byte ring buffer, split into producer and consumer halves
pub struct PcmRingBuffer;

impl PcmRingBuffer {
    /// Allocate a ring of `capacity` bytes and split it
    ///
    /// Capacity is chosen by the caller to trade memory for underrun
    /// resilience.
    pub fn with_capacity(capacity: usize) -> (RingProducer, RingConsumer) {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        let inner = Arc::new(RingInner {
            state: Mutex::new(RingState {
                data: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                len: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        });
        (
            RingProducer {
                inner: Arc::clone(&inner),
            },
            RingConsumer { inner },
        )
    }
}

/// Writer half; exactly one logical writer exists per ring
pub struct RingProducer {
    inner: Arc<RingInner>,
}

impl RingProducer {
    /// Write without replacement
    ///
    /// Blocks up to `timeout` for enough free space to take all of `bytes`,
    /// then writes as many whole bytes as fit and returns the count
    /// (possibly 0). Never discards previously buffered data.
    pub fn write(&mut self, bytes: &[u8], timeout: Duration) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.free() < bytes.len() {
            if self
                .inner
                .writable
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        let written = state.push(bytes);
        drop(state);
        if written > 0 {
            self.inner.readable.notify_one();
        }
        written
    }

    /// Unread bytes currently buffered
    pub fn available(&self) -> usize {
        self.inner.state.lock().len
    }

    /// Free space currently available
    pub fn free_space(&self) -> usize {
        let state = self.inner.state.lock();
        state.free()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// Reader half; exactly one logical reader exists per ring
pub struct RingConsumer {
    inner: Arc<RingInner>,
}

impl RingConsumer {
    /// Read at least one byte, or time out
    ///
    /// Blocks up to `timeout` waiting for data, then copies up to
    /// `out.len()` bytes. Returns 0 on a bare timeout: the stream is
    /// starved, not broken.
    pub fn read(&mut self, out: &mut [u8], timeout: Duration) -> usize {
        if out.is_empty() {
            return 0;
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.len == 0 {
            if self
                .inner
                .readable
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return 0;
            }
        }
        let read = state.pop(out);
        drop(state);
        self.inner.writable.notify_one();
        read
    }

    /// Discard all buffered content
    ///
    /// Only the reading owner may reset, and only while the writer side is
    /// idle; the split API keeps this method off the producer half
    /// entirely.
    pub fn reset(&mut self) {
        let mut state = self.inner.state.lock();
        state.head = 0;
        state.len = 0;
        drop(state);
        self.inner.writable.notify_one();
    }

    /// Unread bytes currently buffered
    pub fn available(&self) -> usize {
        self.inner.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const T: Duration = Duration::from_millis(50);

    #[test]
    fn fifo_order_is_preserved() {
        let (mut prod, mut cons) = PcmRingBuffer::with_capacity(64);

        assert_eq!(prod.write(b"hello ", T), 6);
        assert_eq!(prod.write(b"world", T), 5);

        let mut out = [0u8; 64];
        let n = cons.read(&mut out, T);
        assert_eq!(&out[..n], b"hello world");
    }

    #[test]
    fn wrap_around_keeps_byte_order() {
        let (mut prod, mut cons) = PcmRingBuffer::with_capacity(8);
        let mut out = [0u8; 8];

        assert_eq!(prod.write(b"abcdef", T), 6);
        assert_eq!(cons.read(&mut out[..4], T), 4);
        assert_eq!(&out[..4], b"abcd");

        // Tail wraps past the end of the backing storage here
        assert_eq!(prod.write(b"ghijkl", T), 6);
        let n = cons.read(&mut out, T);
        assert_eq!(&out[..n], b"efghijkl");
    }

    #[test]
    fn short_write_when_full_never_discards() {
        let (mut prod, mut cons) = PcmRingBuffer::with_capacity(1024);

        let first: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(prod.write(&first, T), 1000);

        // Only 24 bytes of space remain; the write returns a short count
        let second = [0xAB; 100];
        assert_eq!(prod.write(&second, T), 24);

        let mut out = vec![0u8; 1124];
        let n = cons.read(&mut out, T);
        assert_eq!(n, 1024);
        assert_eq!(&out[..1000], &first[..]);
        assert!(out[1000..1024].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn read_returns_zero_on_timeout() {
        let (_prod, mut cons) = PcmRingBuffer::with_capacity(16);
        let mut out = [0u8; 16];
        let started = Instant::now();
        assert_eq!(cons.read(&mut out, Duration::from_millis(20)), 0);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn write_unblocks_when_reader_frees_space() {
        let (mut prod, mut cons) = PcmRingBuffer::with_capacity(8);
        assert_eq!(prod.write(&[1u8; 8], T), 8);

        let reader = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let mut out = [0u8; 8];
            assert_eq!(cons.read(&mut out, T), 8);
            cons
        });

        // Blocks until the reader drains, then the whole write fits
        assert_eq!(prod.write(&[2u8; 8], Duration::from_millis(500)), 8);
        let mut cons = reader.join().unwrap();

        let mut out = [0u8; 8];
        assert_eq!(cons.read(&mut out, T), 8);
        assert_eq!(out, [2u8; 8]);
    }

    #[test]
    fn reset_discards_buffered_content() {
        let (mut prod, mut cons) = PcmRingBuffer::with_capacity(16);
        assert_eq!(prod.write(&[9u8; 10], T), 10);
        cons.reset();
        assert!(cons.is_empty());
        assert_eq!(prod.free_space(), 16);

        let mut out = [0u8; 16];
        assert_eq!(cons.read(&mut out, Duration::from_millis(10)), 0);
    }

    #[test]
    fn cross_thread_streaming_is_lossless() {
        let (mut prod, mut cons) = PcmRingBuffer::with_capacity(256);
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
        let expected = payload.clone();

        let writer = thread::spawn(move || {
            let mut sent = 0;
            while sent < payload.len() {
                sent += prod.write(&payload[sent..], Duration::from_millis(100));
            }
        });

        let mut received = Vec::new();
        let mut chunk = [0u8; 64];
        while received.len() < expected.len() {
            let n = cons.read(&mut chunk, Duration::from_millis(100));
            received.extend_from_slice(&chunk[..n]);
        }

        writer.join().unwrap();
        assert_eq!(received, expected);
    }
}
