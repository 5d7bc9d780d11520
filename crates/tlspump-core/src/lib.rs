//! Non-blocking TLS record-layer driver.
//!
//! Sits between an asynchronous byte-stream transport and a TLS engine that
//! only knows synchronous, buffer-oriented `wrap`/`unwrap`. Two pumps, one per
//! direction, turn those primitives into callback-driven progress that can
//! suspend on I/O, grow buffers on demand and hand the handshake back and
//! forth without deadlocking or recursing the call stack.
//!
//! # Architecture
//!
//! Each pump is a tagged-variant state machine driven by a flat loop. Every
//! entry into a pump (external wake, I/O completion, delegated-task
//! completion, sibling hand-off) is queued on a per-thread trampoline, so a
//! transport that completes operations in line never grows the stack.
//!
//! A pump runs at most one pass at a time. Wakes arriving mid-pass are
//! coalesced into one more pass. During the handshake, a pump that needs the
//! other direction idles itself before waking its sibling, so handshake steps
//! strictly alternate as the engine demands.
//!
//! # Components
//!
//! - [`buffer`]: Growable buffer with bounded doubling
//! - [`engine`]: Engine adapter contract and result codes
//! - [`transport`]: Transport contract; [`TokioTransport`] implementation
//! - [`executor`]: Delegated-task execution
//! - [`payload`]: Application consumer and producer contracts
//! - [`phase`]: Connection phase state machine
//! - [`config`]: Endpoint configuration
//! - [`endpoint`]: Endpoint handle owning both pumps
//! - [`error`]: Error taxonomy

pub mod buffer;
pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod executor;
mod inbound;
mod outbound;
pub mod payload;
pub mod phase;
mod pump;
mod tokio_transport;
mod trampoline;
pub mod transport;

pub use buffer::{BufferRole, GrowableBuffer, SendWindow};
pub use config::{BufferSizes, EndpointConfig, Role};
pub use endpoint::{Capacities, Endpoint};
pub use engine::{DelegatedTask, Engine, EngineResult, HandshakeStatus, Status};
pub use error::{EngineError, PumpError, TransportError};
pub use executor::{InlineExecutor, TaskExecutor, TokioExecutor};
pub use payload::{PayloadConsumer, PayloadProducer, Silent};
pub use phase::Phase;
pub use tokio_transport::TokioTransport;
pub use transport::{IoCompletion, IoEvent, Transport};
