//! Endpoint: one TLS connection driven by two pumps.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────── Link ────────────────────────┐
//!  consumer <│─ InboundPump ──unwrap──┐        ┌──wrap── OutboundPump│< producer
//!            │   (Pull)               │ Engine │          (Push)     │
//!            │     ↑ read        Mutex└────────┘           ↓ write   │
//!            └─────┼───────────────────────────────────────────┼────┘
//!                  └──────────────── Transport ────────────────┘
//! ```
//!
//! [`Endpoint`] is the owning handle. The shared [`Link`] holds the engine,
//! transport, phase and both pumps. Pumps reach their sibling through the link;
//! completion callbacks hold the link alive only while an operation is in
//! flight. Dropping the endpoint closes the connection.
//!
//! # Close sequence
//!
//! Any error, end of stream, explicit [`Endpoint::close`], or a close record
//! from the peer moves a pump to its `Close` mode. `Close` signals both halves
//! of the engine (each at most once), then finalizes the link: phase becomes
//! [`Phase::Closed`], the transport is released and the sibling pump is woken
//! so it runs its own `Close`.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    buffer::{BufferRole, GROWTH_CEILING_FACTOR, GrowableBuffer},
    config::{EndpointConfig, Role},
    engine::{DelegatedTask, Engine, EngineResult},
    error::PumpError,
    executor::TaskExecutor,
    inbound::InboundPump,
    outbound::OutboundPump,
    payload::{PayloadConsumer, PayloadProducer},
    phase::Phase,
    pump::{Activity, Direction, lock},
    trampoline::bounce,
    transport::Transport,
};

/// Snapshot of the four buffer capacities.
///
/// A buffer lent to the transport still reports its last known capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacities {
    /// Inbound ciphertext buffer
    pub inbound_network: usize,
    /// Inbound plaintext buffer
    pub inbound_application: usize,
    /// Outbound plaintext buffer
    pub outbound_application: usize,
    /// Outbound ciphertext buffer
    pub outbound_network: usize,
}

/// State shared by the endpoint handle, both pumps and in-flight callbacks.
pub(crate) struct Link<E, T> {
    pub(crate) name: String,
    pub(crate) role: Role,
    pub(crate) timeout: Duration,
    pub(crate) verbose: bool,
    engine: Mutex<E>,
    phase: Mutex<Phase>,
    pub(crate) transport: T,
    pub(crate) executor: Arc<dyn TaskExecutor>,
    inbound_engine_closed: AtomicBool,
    outbound_engine_closed: AtomicBool,
    finalized: AtomicBool,
    tasks_in_flight: AtomicUsize,
    pub(crate) inbound: InboundPump,
    pub(crate) outbound: OutboundPump,
}

impl<E: Engine, T: Transport> Link<E, T> {
    /// Unwrap through the engine, refusing once the endpoint is closed.
    pub(crate) fn unwrap(&self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, PumpError> {
        let mut engine = lock(&self.engine);
        if *lock(&self.phase) == Phase::Closed {
            return Err(PumpError::Closed);
        }
        let result = engine.unwrap(src, dst)?;
        self.on_result(&result);
        Ok(result)
    }

    /// Wrap through the engine, refusing once the endpoint is closed.
    pub(crate) fn wrap(&self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, PumpError> {
        let mut engine = lock(&self.engine);
        if *lock(&self.phase) == Phase::Closed {
            return Err(PumpError::Closed);
        }
        let result = engine.wrap(src, dst)?;
        self.on_result(&result);
        Ok(result)
    }

    fn on_result(&self, result: &EngineResult) {
        let mut phase = lock(&self.phase);
        let next = phase.transition(result);
        if next != *phase {
            if self.verbose {
                debug!(endpoint = %self.name, from = ?*phase, to = ?next, "phase transition");
            }
            *phase = next;
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    pub(crate) fn next_delegated_task(&self) -> Option<DelegatedTask> {
        lock(&self.engine).next_delegated_task()
    }

    /// Count a delegated task handed to the executor.
    pub(crate) fn begin_task(&self) {
        self.tasks_in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// A delegated task finished: wake any pump parked behind it.
    pub(crate) fn finish_task(self: &Arc<Self>) {
        self.tasks_in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.inbound.activity.take_parked() {
            self.wake_inbound();
        }
        if self.outbound.activity.take_parked() {
            self.wake_outbound();
        }
    }

    /// Park `activity` if a delegated task is still running. Returns false,
    /// leaving the pump unparked, when none is.
    ///
    /// Parks before reading the counter so a task finishing in between still
    /// sees the flag.
    pub(crate) fn park_behind_task(&self, activity: &Activity) -> bool {
        activity.park();
        if self.tasks_in_flight.load(Ordering::SeqCst) > 0 {
            return true;
        }
        activity.take_parked();
        false
    }

    /// Largest capacity a buffer of `role` may grow to.
    pub(crate) fn ceiling(&self, role: BufferRole) -> usize {
        let engine = lock(&self.engine);
        let hint = match role {
            BufferRole::Network => engine.recommended_ciphertext_buffer_size(),
            BufferRole::Application => engine.recommended_plaintext_buffer_size(),
        };
        hint * GROWTH_CEILING_FACTOR
    }

    /// Double `buffer` within its ceiling.
    pub(crate) fn grow(
        &self,
        direction: Direction,
        role: BufferRole,
        buffer: &mut GrowableBuffer,
    ) -> Result<usize, PumpError> {
        let capacity = buffer.double(role, self.ceiling(role))?;
        if self.verbose {
            debug!(endpoint = %self.name, ?direction, %role, capacity, "buffer grown");
        }
        Ok(capacity)
    }

    /// Signal end of input to the engine, at most once per connection.
    pub(crate) fn close_engine_inbound(&self) {
        if self.inbound_engine_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = lock(&self.engine).close_inbound() {
            self.report(Direction::Inbound, &PumpError::Protocol(err));
        }
    }

    /// Signal end of output to the engine, at most once per connection.
    pub(crate) fn close_engine_outbound(&self) {
        if self.outbound_engine_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.engine).close_outbound();
    }

    /// Log why a pump is closing.
    pub(crate) fn report(&self, direction: Direction, err: &PumpError) {
        if !self.verbose {
            return;
        }
        if err.is_fault() {
            warn!(endpoint = %self.name, ?direction, error = %err, "closing");
        } else {
            debug!(endpoint = %self.name, ?direction, error = %err, "closing");
        }
    }

    /// Mark the connection closed, release the transport and let both pumps
    /// run their close. Idempotent.
    pub(crate) fn finalize(self: &Arc<Self>) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let _engine = lock(&self.engine);
            *lock(&self.phase) = Phase::Closed;
        }
        self.transport.close();
        if self.verbose {
            debug!(endpoint = %self.name, "endpoint closed");
        }

        self.wake_inbound();
        self.wake_outbound();
    }
}

/// Handle to one TLS connection.
///
/// Not `Clone`: the handle owns the connection and closes it on drop. Every
/// method may be called from any thread.
pub struct Endpoint<E: Engine, T: Transport> {
    link: Arc<Link<E, T>>,
}

impl<E: Engine, T: Transport> Endpoint<E, T> {
    /// Bind an engine and transport into an endpoint. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(
        config: EndpointConfig,
        engine: E,
        transport: T,
        executor: Arc<dyn TaskExecutor>,
        consumer: impl PayloadConsumer,
        producer: impl PayloadProducer,
    ) -> Self {
        let link = Link {
            inbound: InboundPump::new(config.inbound, Box::new(consumer)),
            outbound: OutboundPump::new(config.outbound, Box::new(producer)),
            name: config.name,
            role: config.role,
            timeout: config.timeout,
            verbose: config.verbose,
            engine: Mutex::new(engine),
            phase: Mutex::new(Phase::Created),
            transport,
            executor,
            inbound_engine_closed: AtomicBool::new(false),
            outbound_engine_closed: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            tasks_in_flight: AtomicUsize::new(0),
        };
        Self { link: Arc::new(link) }
    }

    /// Begin the handshake: a client starts by wrapping, a server by
    /// unwrapping.
    pub fn start(&self) {
        {
            let mut phase = lock(&self.link.phase);
            *phase = phase.started();
        }
        if self.link.verbose {
            debug!(endpoint = %self.link.name, role = ?self.link.role, "starting");
        }
        match self.link.role {
            Role::Client => self.link.wake_outbound(),
            Role::Server => self.link.wake_inbound(),
        }
    }

    /// Wake both pumps.
    pub fn resume(&self) {
        self.link.wake_inbound();
        self.link.wake_outbound();
    }

    /// Application has data for the producer.
    pub fn send(&self) {
        self.link.wake_outbound();
    }

    /// Application is ready to consume.
    pub fn receive(&self) {
        self.link.wake_inbound();
    }

    /// Close immediately. Idempotent.
    pub fn close(&self) {
        let link = Arc::clone(&self.link);
        bounce(move || link.finalize());
    }

    /// Close gracefully: send the close notification, flush it, then close.
    pub fn shutdown(&self) {
        let link = Arc::clone(&self.link);
        bounce(move || {
            if link.phase() == Phase::Closed {
                return;
            }
            link.close_engine_outbound();
            link.wake_outbound();
        });
    }

    /// Returns true once the connection reached [`Phase::Closed`].
    pub fn is_closed(&self) -> bool {
        self.link.phase() == Phase::Closed
    }

    /// Current connection phase.
    pub fn phase(&self) -> Phase {
        self.link.phase()
    }

    /// Returns true while a handshake is in progress.
    pub fn is_handshaking(&self) -> bool {
        self.link.phase().is_handshaking()
    }

    /// Log name.
    pub fn name(&self) -> &str {
        &self.link.name
    }

    /// Handshake role.
    pub fn role(&self) -> Role {
        self.link.role
    }

    /// Returns true once the inbound pump ran its close.
    pub fn inbound_closed(&self) -> bool {
        self.link.inbound.activity.is_closed()
    }

    /// Returns true once the outbound pump ran its close.
    pub fn outbound_closed(&self) -> bool {
        self.link.outbound.activity.is_closed()
    }

    /// Current buffer capacities.
    pub fn capacities(&self) -> Capacities {
        let (inbound_network, inbound_application) = self.link.inbound.capacities();
        let (outbound_network, outbound_application) = self.link.outbound.capacities();
        Capacities { inbound_network, inbound_application, outbound_application, outbound_network }
    }
}

impl<E: Engine, T: Transport> Drop for Endpoint<E, T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<E: Engine, T: Transport> std::fmt::Debug for Endpoint<E, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.link.name)
            .field("role", &self.link.role)
            .field("phase", &self.link.phase())
            .finish_non_exhaustive()
    }
}
