//! Bounded byte ring buffer between the hot path and the sink thread.
//!
//! This decouples event production (application threads encoding frames)
//! from event consumption (the sink thread writing to the agent socket).
//! The hot path only copies encoded bytes in; a dedicated flusher thread
//! drains frames out asynchronously.
//!
//! # Design
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ APPLICATION THREAD (Hot Path)                          │
//! │   on_call_begin() → encode() → ring_buffer.push()      │
//! └────────────────────────────────────────────────────────┘
//!                          │
//!                          │ bounded byte ring
//!                          ▼
//! ┌────────────────────────────────────────────────────────┐
//! │ FLUSHER THREAD (Cold Path)                             │
//! │   loop {                                               │
//! │     len = peek 2-byte prefix; frame = shift(len);      │
//! │     socket.send(frame);                                │
//! │   }                                                    │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes are all-or-nothing: a frame either fits in the remaining
//! capacity and is copied whole, or the push fails and the caller drops
//! the frame. Partial frames never land in the buffer, so the reader can
//! always trust the length prefix at the read cursor. Backpressure drops
//! events rather than ever blocking the monitored program.

use std::sync::Mutex;

/// Fixed-capacity circular byte buffer. All-or-nothing writes, exact-size
/// reads. Safe to share between producer threads and one or more readers.
pub struct RingBuffer {
    inner: Mutex<Inner>,
}

struct Inner {
    buf: Vec<u8>,
    /// Next byte to read.
    read: usize,
    /// Next byte to write.
    write: usize,
    /// Bytes currently buffered. Disambiguates full from empty when
    /// read == write.
    used: usize,
}

impl RingBuffer {
    /// Create a buffer holding at most `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be > 0");
        Self {
            inner: Mutex::new(Inner {
                buf: vec![0; capacity],
                read: 0,
                write: 0,
                used: 0,
            }),
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.buf.len(),
            Err(poisoned) => poisoned.into_inner().buf.len(),
        }
    }

    /// Bytes currently buffered.
    pub fn used(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.used,
            Err(poisoned) => poisoned.into_inner().used,
        }
    }

    /// Free space in bytes.
    pub fn available(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.buf.len() - inner.used,
            Err(poisoned) => {
                let inner = poisoned.into_inner();
                inner.buf.len() - inner.used
            }
        }
    }

    /// Copy `data` in whole. Returns `false` without writing anything when
    /// the free space is smaller than `data`.
    pub fn push(&self, data: &[u8]) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let capacity = inner.buf.len();
        if data.len() > capacity - inner.used {
            return false;
        }
        let first = (capacity - inner.write).min(data.len());
        let write = inner.write;
        inner.buf[write..write + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            let rest = data.len() - first;
            inner.buf[..rest].copy_from_slice(&data[first..]);
        }
        inner.write = (inner.write + data.len()) % capacity;
        inner.used += data.len();
        true
    }

    /// Remove and return exactly `n` bytes, or `None` without consuming
    /// anything when fewer than `n` bytes are buffered.
    pub fn shift(&self, n: usize) -> Option<Vec<u8>> {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if n > inner.used {
            return None;
        }
        let capacity = inner.buf.len();
        let mut out = Vec::with_capacity(n);
        let first = (capacity - inner.read).min(n);
        out.extend_from_slice(&inner.buf[inner.read..inner.read + first]);
        if first < n {
            out.extend_from_slice(&inner.buf[..n - first]);
        }
        inner.read = (inner.read + n) % capacity;
        inner.used -= n;
        Some(out)
    }
}
