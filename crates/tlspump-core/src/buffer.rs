//! Growable byte buffer with explicit pending/free regions.
//!
//! # Layout
//!
//! ```text
//! 0        start            end                 capacity
//! ├─────────┼────────────────┼────────────────────┤
//! │ consumed│    pending     │        free        │
//! └─────────┴────────────────┴────────────────────┘
//! ```
//!
//! Bytes are appended into the free region and committed with
//! [`GrowableBuffer::commit`]; they are read from the pending region and
//! released with [`GrowableBuffer::consume`]. [`GrowableBuffer::compact`]
//! moves pending bytes to the front so the whole tail is free again.
//!
//! Capacity is fixed between explicit growth calls. Growth only ever doubles
//! and is bounded by a ceiling of four times the engine's recommended size for
//! the buffer's role. Hitting the ceiling is fatal for the connection.

use std::fmt;

use crate::error::PumpError;

/// Multiple of the engine's recommended size a buffer may grow to.
pub const GROWTH_CEILING_FACTOR: usize = 4;

/// Which engine size hint bounds a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    /// Raw ciphertext exchanged with the transport
    Network,
    /// Plaintext exchanged with the payload collaborators
    Application,
}

impl fmt::Display for BufferRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => f.write_str("network"),
            Self::Application => f.write_str("application"),
        }
    }
}

/// Byte buffer with a pending region and a free region.
///
/// The default value is an empty buffer with zero capacity. Pumps leave that
/// placeholder behind while the real buffer is lent to the transport.
#[derive(Default)]
pub struct GrowableBuffer {
    storage: Vec<u8>,
    start: usize,
    end: usize,
}

impl GrowableBuffer {
    /// Create an empty buffer with a fixed capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { storage: vec![0; capacity], start: 0, end: 0 }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of pending bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if no bytes are pending.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Pending bytes, oldest first.
    pub fn pending(&self) -> &[u8] {
        &self.storage[self.start..self.end]
    }

    /// Free region after the pending bytes.
    pub fn free_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.end..]
    }

    /// Number of bytes that can be appended without compacting.
    pub fn free_len(&self) -> usize {
        self.capacity() - self.end
    }

    /// Mark `n` bytes of the free region as pending.
    ///
    /// Clamped to the free region so an engine or transport reporting more
    /// than it was given cannot corrupt the cursors.
    pub fn commit(&mut self, n: usize) {
        self.end = (self.end + n).min(self.capacity());
    }

    /// Release `n` pending bytes.
    pub fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.end);
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Move pending bytes to the front of the storage.
    pub fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.storage.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }

    /// Drop all pending bytes.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Returns true if pending bytes occupy more than half the capacity.
    ///
    /// An underflow with this much already buffered means the buffer is too
    /// small for the record, not merely empty.
    pub fn is_over_half_full(&self) -> bool {
        self.len() > self.capacity() / 2
    }

    /// Reallocate to `new_capacity`, preserving pending content.
    ///
    /// Never shrinks below the pending length.
    pub fn grow_to(&mut self, new_capacity: usize) {
        let new_capacity = new_capacity.max(self.len());
        let mut storage = vec![0; new_capacity];
        let len = self.len();
        storage[..len].copy_from_slice(self.pending());
        self.storage = storage;
        self.start = 0;
        self.end = len;
    }

    /// Double the capacity, refusing if the result would exceed `ceiling`.
    ///
    /// Returns the new capacity.
    pub fn double(&mut self, role: BufferRole, ceiling: usize) -> Result<usize, PumpError> {
        let requested = self.capacity().max(1) * 2;
        if requested > ceiling {
            return Err(PumpError::CapacityExceeded { role, requested, ceiling });
        }
        self.grow_to(requested);
        Ok(requested)
    }
}

impl fmt::Debug for GrowableBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrowableBuffer")
            .field("capacity", &self.capacity())
            .field("pending", &self.len())
            .field("start", &self.start)
            .finish()
    }
}

/// Append-only view of an outbound application buffer.
///
/// Handed to the payload producer. Whatever the producer appends is exactly
/// what the next wrap sees.
pub struct SendWindow<'a> {
    buffer: &'a mut GrowableBuffer,
}

impl<'a> SendWindow<'a> {
    pub(crate) fn new(buffer: &'a mut GrowableBuffer) -> Self {
        Self { buffer }
    }

    /// Bytes that can still be appended.
    pub fn remaining(&self) -> usize {
        self.buffer.free_len()
    }

    /// Returns true if nothing more can be appended.
    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Append as much of `bytes` as fits. Returns the number appended.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.buffer.free_mut()[..n].copy_from_slice(&bytes[..n]);
        self.buffer.commit(n);
        n
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn commit_and_consume_track_pending() {
        let mut buf = GrowableBuffer::with_capacity(8);
        buf.free_mut()[..3].copy_from_slice(b"abc");
        buf.commit(3);
        assert_eq!(buf.pending(), b"abc");

        buf.consume(1);
        assert_eq!(buf.pending(), b"bc");
        assert_eq!(buf.free_len(), 5);

        buf.compact();
        assert_eq!(buf.pending(), b"bc");
        assert_eq!(buf.free_len(), 6);

        buf.consume(2);
        assert!(buf.is_empty());
        assert_eq!(buf.free_len(), 8);
    }

    #[test]
    fn grow_preserves_pending_bytes() {
        let mut buf = GrowableBuffer::with_capacity(4);
        buf.free_mut().copy_from_slice(b"wxyz");
        buf.commit(4);
        buf.consume(1);

        buf.grow_to(16);
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.pending(), b"xyz");
        assert_eq!(buf.free_len(), 13);
    }

    #[test]
    fn half_full_is_strict() {
        let mut buf = GrowableBuffer::with_capacity(8);
        buf.commit(4);
        assert!(!buf.is_over_half_full());
        buf.commit(1);
        assert!(buf.is_over_half_full());
    }

    #[test]
    fn double_refuses_past_ceiling() {
        let mut buf = GrowableBuffer::with_capacity(256);
        assert_eq!(buf.double(BufferRole::Network, 1024).unwrap(), 512);
        assert_eq!(buf.double(BufferRole::Network, 1024).unwrap(), 1024);

        let err = buf.double(BufferRole::Network, 1024).unwrap_err();
        assert!(matches!(
            err,
            PumpError::CapacityExceeded { role: BufferRole::Network, requested: 2048, ceiling: 1024 }
        ));
        assert_eq!(buf.capacity(), 1024);
    }

    #[test]
    fn send_window_appends_what_fits() {
        let mut buf = GrowableBuffer::with_capacity(4);
        let mut window = SendWindow::new(&mut buf);
        assert_eq!(window.append(b"hello"), 4);
        assert!(window.is_full());
        assert_eq!(buf.pending(), b"hell");
    }

    #[test]
    fn growth_is_monotonic_and_stops_at_ceiling() {
        proptest!(|(initial in 1usize..4096, hint in 1usize..8192, attempts in 1usize..16)| {
            let ceiling = hint * GROWTH_CEILING_FACTOR;
            let mut buf = GrowableBuffer::with_capacity(initial);
            let mut previous = buf.capacity();

            for _ in 0..attempts {
                match buf.double(BufferRole::Application, ceiling) {
                    Ok(capacity) => {
                        prop_assert_eq!(capacity, previous * 2);
                        prop_assert!(capacity <= ceiling);
                        previous = capacity;
                    },
                    Err(_) => {
                        prop_assert!(previous * 2 > ceiling);
                        prop_assert_eq!(buf.capacity(), previous);
                    },
                }
            }
        });
    }
}
