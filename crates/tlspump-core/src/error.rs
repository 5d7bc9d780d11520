//! Error types for the record-layer driver.
//!
//! Every error the pumps encounter is handled locally by moving the pump to
//! `Close`. Nothing is retried. The types exist so the close can be logged with
//! a precise reason and so collaborators (engine adapters, transports) have a
//! typed way to report failure.

use std::io;

use thiserror::Error;

use crate::buffer::BufferRole;

/// Failure reported by an engine adapter.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine could not be constructed (bad context, no usable protocol or
    /// cipher suite). Raised before any pump runs.
    #[error("engine construction failed: {0}")]
    Construction(String),

    /// Engine rejected the record stream during wrap or unwrap.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Engine refused a close signal (e.g. inbound closed without the
    /// peer's close notification).
    #[error("close refused: {0}")]
    Close(String),
}

impl EngineError {
    /// Build a [`EngineError::Protocol`] from anything displayable.
    pub fn protocol(reason: impl std::fmt::Display) -> Self {
        Self::Protocol(reason.to_string())
    }
}

/// Failure reported by a transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation did not complete within its timeout.
    #[error("operation timed out")]
    TimedOut,

    /// Transport was closed locally while the operation was pending, or
    /// before it was issued.
    #[error("transport closed")]
    Closed,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Reason a pump moved to `Close`.
#[derive(Debug, Error)]
pub enum PumpError {
    /// Engine-raised fault during wrap or unwrap.
    #[error("protocol error: {0}")]
    Protocol(#[from] EngineError),

    /// Buffer growth would exceed four times the engine's recommended size.
    #[error("{role} buffer growth to {requested} bytes exceeds ceiling of {ceiling} bytes")]
    CapacityExceeded {
        /// Which buffer was asked to grow
        role: BufferRole,
        /// Capacity the doubling asked for
        requested: usize,
        /// Largest capacity the buffer may have
        ceiling: usize,
    },

    /// Read or write failed or timed out.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Peer closed the stream without a close notification.
    #[error("end of stream")]
    EndOfStream,

    /// An engine call was attempted after the endpoint reached `Closed`.
    #[error("endpoint closed")]
    Closed,
}

impl PumpError {
    /// Returns true if this close reflects a fault rather than a normal end of
    /// the connection.
    ///
    /// End-of-stream and closes requested locally are part of the normal
    /// lifecycle and are not reported to the application as errors.
    pub fn is_fault(&self) -> bool {
        !matches!(self, Self::EndOfStream | Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_stream_is_not_a_fault() {
        assert!(!PumpError::EndOfStream.is_fault());
        assert!(!PumpError::Closed.is_fault());
        assert!(PumpError::Transport(TransportError::TimedOut).is_fault());
        assert!(PumpError::from(EngineError::protocol("bad record")).is_fault());
    }

    #[test]
    fn capacity_error_names_the_buffer() {
        let err = PumpError::CapacityExceeded {
            role: BufferRole::Application,
            requested: 2048,
            ceiling: 1024,
        };
        assert_eq!(
            err.to_string(),
            "application buffer growth to 2048 bytes exceeds ceiling of 1024 bytes"
        );
    }
}
