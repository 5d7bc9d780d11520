//! Engine adapter contract.
//!
//! The engine is the TLS handshake and record component. It is opaque to the
//! pumps: they only hand it byte slices and react to the result codes it
//! returns. Cryptography, certificate validation and session state all live
//! behind this trait.
//!
//! # Result codes
//!
//! Each `wrap`/`unwrap` reports two independent codes:
//!
//! - [`Status`]: what happened to the buffers on this call
//! - [`HandshakeStatus`]: what the engine needs next to make progress
//!
//! The pumps branch on the handshake status first and on the buffer status
//! second.

use crate::error::EngineError;

/// Unit of engine-internal work the driver must run off the I/O path.
pub type DelegatedTask = Box<dyn FnOnce() + Send>;

/// Outcome of a single wrap or unwrap on the buffers involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Call completed normally
    Ok,
    /// Destination too small for the next record
    BufferOverflow,
    /// Source does not hold a complete record
    BufferUnderflow,
    /// This direction of the engine is closed
    Closed,
}

/// What the engine needs next to advance the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// No handshake in progress
    NotHandshaking,
    /// Engine has handshake bytes to send
    NeedWrap,
    /// Engine needs handshake bytes from the peer
    NeedUnwrap,
    /// Engine must unwrap again before reading more from the peer
    NeedUnwrapAgain,
    /// Engine has delegated tasks that must run first
    NeedTask,
    /// Handshake completed on this call
    Finished,
}

impl HandshakeStatus {
    /// Returns true if the engine is mid-handshake.
    pub fn is_handshaking(self) -> bool {
        !matches!(self, Self::NotHandshaking | Self::Finished)
    }

    /// Returns true if the engine waits for bytes from the peer.
    pub fn needs_unwrap(self) -> bool {
        matches!(self, Self::NeedUnwrap | Self::NeedUnwrapAgain)
    }
}

/// Result of one wrap or unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    /// Buffer outcome
    pub status: Status,
    /// Handshake progress
    pub handshake_status: HandshakeStatus,
    /// Bytes read from the source slice
    pub bytes_consumed: usize,
    /// Bytes written into the destination slice
    pub bytes_produced: usize,
}

impl EngineResult {
    /// Result that touched neither buffer.
    pub fn idle(status: Status, handshake_status: HandshakeStatus) -> Self {
        Self { status, handshake_status, bytes_consumed: 0, bytes_produced: 0 }
    }

    /// Returns true if the call consumed or produced anything.
    pub fn made_progress(&self) -> bool {
        self.bytes_consumed > 0 || self.bytes_produced > 0
    }
}

/// TLS engine driven by the pumps.
///
/// Implementations never see the transport. `wrap` turns plaintext into
/// ciphertext records; `unwrap` turns ciphertext records into plaintext. Both
/// may consume or produce only part of what is offered.
///
/// The endpoint serializes all calls through a mutex, so implementations need
/// `Send` but not `Sync`.
pub trait Engine: Send + 'static {
    /// Encrypt plaintext from `src` into ciphertext in `dst`.
    ///
    /// Also produces handshake and close records when the engine needs to send
    /// them, in which case `src` may be left untouched.
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// Decrypt ciphertext from `src` into plaintext in `dst`.
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// Take the next delegated task, if any.
    fn next_delegated_task(&mut self) -> Option<DelegatedTask>;

    /// Signal that no more ciphertext will arrive.
    fn close_inbound(&mut self) -> Result<(), EngineError>;

    /// Signal that no more plaintext will be sent. The next wrap produces the
    /// close notification.
    fn close_outbound(&mut self);

    /// Plaintext size the engine expects an application buffer to hold.
    fn recommended_plaintext_buffer_size(&self) -> usize;

    /// Ciphertext size the engine expects a network buffer to hold.
    fn recommended_ciphertext_buffer_size(&self) -> usize;
}
