//! Transport abstraction.
//!
//! The pumps never block on I/O. They lend a buffer to the transport together
//! with a completion callback and return. The transport hands the buffer back
//! through the callback once the operation finished, failed or timed out.
//!
//! Production uses [`TokioTransport`](crate::TokioTransport) over any tokio
//! stream; tests use an in-memory pair that completes operations on the
//! calling thread.
//!
//! # Buffer ownership
//!
//! The buffer moves into `read`/`write` by value and comes back in the
//! completion, so neither pump nor transport can touch it while the other owns
//! it. A read appends into the free region and commits what it wrote; a write
//! sends from the pending region and consumes what it sent.

use std::time::Duration;

use crate::{buffer::GrowableBuffer, error::TransportError};

/// Successful outcome of a transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEvent {
    /// This many bytes were appended (read) or sent (write)
    Transferred(usize),
    /// Peer closed the stream
    EndOfStream,
}

/// Callback receiving the lent buffer and the operation outcome.
///
/// May be invoked on the calling thread before `read`/`write` returns, or
/// later from any thread.
pub type IoCompletion = Box<dyn FnOnce(GrowableBuffer, Result<IoEvent, TransportError>) + Send>;

/// Asynchronous byte-stream transport.
pub trait Transport: Send + Sync + 'static {
    /// Read into the free region of `buffer`.
    ///
    /// Completes with `Transferred(n)` once at least one byte arrived, or with
    /// `EndOfStream` when the peer closed.
    fn read(&self, buffer: GrowableBuffer, timeout: Duration, on_complete: IoCompletion);

    /// Write from the pending region of `buffer`.
    ///
    /// Completes with `Transferred(n)` for `n >= 1` bytes sent, or with
    /// `EndOfStream` when the peer no longer accepts data.
    fn write(&self, buffer: GrowableBuffer, timeout: Duration, on_complete: IoCompletion);

    /// Release the transport. Pending operations complete with
    /// [`TransportError::Closed`]; later ones fail immediately. Idempotent.
    fn close(&self);
}
