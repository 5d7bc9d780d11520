//! Deterministic harness for tlspump endpoints.
//!
//! In-memory implementations of the transport and engine contracts for
//! reproducible tests of the pump state machines: a transport pair that
//! completes operations in line with seeded chunking and fault injection, a
//! scripted engine with an observation probe, and payload fixtures.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod mailbox;
pub mod memory_transport;
pub mod scenario;
pub mod toy_engine;

pub use mailbox::Mailbox;
pub use memory_transport::MemoryTransport;
pub use scenario::{Connected, Scenario, Side, ToyEndpoint};
pub use toy_engine::{EngineProbe, ProbeEvent, ToyConfig, ToyEngine};
