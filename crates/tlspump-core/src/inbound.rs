//! Inbound pump: transport → unwrap → payload consumer.
//!
//! # State Machine
//!
//! ```text
//!                ┌──────────── bytes read ─────────────┐
//!                ↓                                     │
//!  wake ──> ┌────────┐  UNDERFLOW / no progress   ┌──────┐
//!           │ Unwrap │───────────────────────────>│ Pull │── EOS/error ──┐
//!           └────────┘                            └──────┘               │
//!            │  │  │ NEED_TASK  ┌──────────────────┐                     │
//!            │  │  └───────────>│ RunDelegatedTask │── no task ─> Unwrap │
//!            │  │               └──────────────────┘                     │
//!            │  │ NEED_WRAP  ┌─────────────┐                             │
//!            │  └───────────>│ RequestWrap │── idle, wake outbound       │
//!            │               └─────────────┘                             │
//!            │ CLOSED / engine error / growth refused   ┌───────┐        │
//!            └─────────────────────────────────────────>│ Close │<───────┘
//!                                                        └───────┘
//! ```
//!
//! Decrypted bytes are handed to the consumer as soon as an unwrap produces
//! them, before the status is inspected, and the application buffer is empty
//! again when the consumer returns.
//!
//! `RunDelegatedTask` with no task left but one still running on the executor
//! parks the pump; the task's completion wakes it.

use std::{
    mem,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use tracing::trace;

use crate::{
    buffer::{BufferRole, GrowableBuffer},
    config::BufferSizes,
    endpoint::Link,
    engine::{Engine, EngineResult, HandshakeStatus, Status},
    error::{PumpError, TransportError},
    payload::PayloadConsumer,
    phase::Phase,
    pump::{Activity, Direction, Flow, lock},
    trampoline::bounce,
    transport::{IoEvent, Transport},
};

/// Current step of the inbound pump.
#[derive(Debug)]
pub(crate) enum InboundMode {
    Unwrap,
    Pull,
    /// Run delegated tasks, then continue with the boxed mode
    RunDelegatedTask(Box<InboundMode>),
    RequestWrap,
    Close,
}

struct InboundState {
    network: GrowableBuffer,
    application: GrowableBuffer,
    consumer: Box<dyn PayloadConsumer>,
}

/// Inbound half of an endpoint.
pub(crate) struct InboundPump {
    pub(crate) activity: Activity,
    state: Mutex<InboundState>,
    network_capacity: AtomicUsize,
    application_capacity: AtomicUsize,
}

impl InboundPump {
    pub(crate) fn new(sizes: BufferSizes, consumer: Box<dyn PayloadConsumer>) -> Self {
        Self {
            activity: Activity::default(),
            state: Mutex::new(InboundState {
                network: GrowableBuffer::with_capacity(sizes.network),
                application: GrowableBuffer::with_capacity(sizes.application),
                consumer,
            }),
            network_capacity: AtomicUsize::new(sizes.network),
            application_capacity: AtomicUsize::new(sizes.application),
        }
    }

    /// `(network, application)` capacities.
    pub(crate) fn capacities(&self) -> (usize, usize) {
        (
            self.network_capacity.load(Ordering::Relaxed),
            self.application_capacity.load(Ordering::Relaxed),
        )
    }
}

impl<E: Engine, T: Transport> Link<E, T> {
    /// Wake the inbound pump. Coalesced if it is already running.
    pub(crate) fn wake_inbound(self: &Arc<Self>) {
        let link = Arc::clone(self);
        bounce(move || {
            if link.inbound.activity.request() {
                link.inbound.activity.begin_pass();
                let mode = link.inbound_entry();
                link.drive_inbound(mode);
            }
        });
    }

    fn inbound_entry(&self) -> InboundMode {
        if self.phase() == Phase::Closed {
            InboundMode::Close
        } else {
            InboundMode::Unwrap
        }
    }

    /// Run modes until the pump suspends, idles or closes.
    fn drive_inbound(self: &Arc<Self>, mut mode: InboundMode) {
        loop {
            if self.verbose {
                trace!(endpoint = %self.name, direction = "inbound", ?mode);
            }
            mode = match self.step_inbound(mode) {
                Flow::Next(next) => next,
                Flow::Transfer(buffer, then) => {
                    self.pull(buffer, then);
                    return;
                },
                Flow::Delegate(task, then) => {
                    let link = Arc::clone(self);
                    self.begin_task();
                    self.executor.execute(Box::new(move || {
                        task();
                        bounce(move || {
                            link.finish_task();
                            link.drive_inbound(InboundMode::RunDelegatedTask(Box::new(then)));
                        });
                    }));
                    return;
                },
                Flow::Idle => {
                    if !self.inbound.activity.release() {
                        return;
                    }
                    self.inbound.activity.begin_pass();
                    self.inbound_entry()
                },
                Flow::Done => return,
            };
        }
    }

    fn step_inbound(self: &Arc<Self>, mode: InboundMode) -> Flow<InboundMode> {
        match mode {
            InboundMode::Unwrap => self.unwrap_step(),
            InboundMode::Pull => {
                let mut state = lock(&self.inbound.state);
                let mut buffer = mem::take(&mut state.network);
                buffer.compact();
                Flow::Transfer(buffer, InboundMode::Unwrap)
            },
            InboundMode::RunDelegatedTask(then) => match self.next_delegated_task() {
                Some(task) => Flow::Delegate(task, *then),
                // The sibling's task is still running; its completion wakes us
                None if self.park_behind_task(&self.inbound.activity) => Flow::Idle,
                None => Flow::Next(*then),
            },
            InboundMode::RequestWrap => {
                // Queued on the trampoline, so the outbound pass starts only
                // after this one has released the pump
                self.inbound.activity.park();
                self.wake_outbound();
                Flow::Idle
            },
            InboundMode::Close => {
                self.close_engine_inbound();
                self.close_engine_outbound();
                self.inbound.activity.mark_closed();
                self.finalize();
                Flow::Done
            },
        }
    }

    fn unwrap_step(self: &Arc<Self>) -> Flow<InboundMode> {
        let mut guard = lock(&self.inbound.state);
        let state = &mut *guard;

        let result = match self.unwrap(state.network.pending(), state.application.free_mut()) {
            Ok(result) => result,
            Err(err) => {
                self.report(Direction::Inbound, &err);
                return Flow::Next(InboundMode::Close);
            },
        };
        state.network.consume(result.bytes_consumed);
        state.application.commit(result.bytes_produced);

        if result.bytes_produced > 0 {
            state.consumer.on_received(state.application.pending());
            state.application.clear();
        }

        if !result.handshake_status.needs_unwrap() && self.outbound.activity.take_parked() {
            self.wake_outbound();
        }

        match result.handshake_status {
            HandshakeStatus::NeedWrap if result.status == Status::Closed => {
                Flow::Next(InboundMode::Close)
            },
            HandshakeStatus::NeedWrap => Flow::Next(InboundMode::RequestWrap),
            HandshakeStatus::NeedTask => {
                Flow::Next(InboundMode::RunDelegatedTask(Box::new(InboundMode::Unwrap)))
            },
            HandshakeStatus::Finished => {
                self.wake_outbound();
                self.after_unwrap(state, &result)
            },
            HandshakeStatus::NeedUnwrap
            | HandshakeStatus::NeedUnwrapAgain
            | HandshakeStatus::NotHandshaking => self.after_unwrap(state, &result),
        }
    }

    fn after_unwrap(&self, state: &mut InboundState, result: &EngineResult) -> Flow<InboundMode> {
        match result.status {
            Status::BufferUnderflow => {
                if state.network.is_over_half_full() {
                    match self.grow(Direction::Inbound, BufferRole::Network, &mut state.network) {
                        Ok(capacity) => {
                            self.inbound.network_capacity.store(capacity, Ordering::Relaxed);
                        },
                        Err(err) => {
                            self.report(Direction::Inbound, &err);
                            return Flow::Next(InboundMode::Close);
                        },
                    }
                }
                Flow::Next(InboundMode::Pull)
            },
            Status::BufferOverflow => {
                match self.grow(Direction::Inbound, BufferRole::Application, &mut state.application) {
                    Ok(capacity) => {
                        self.inbound.application_capacity.store(capacity, Ordering::Relaxed);
                        Flow::Next(InboundMode::Unwrap)
                    },
                    Err(err) => {
                        self.report(Direction::Inbound, &err);
                        Flow::Next(InboundMode::Close)
                    },
                }
            },
            Status::Closed => Flow::Next(InboundMode::Close),
            Status::Ok => match result.handshake_status {
                HandshakeStatus::NeedUnwrapAgain => Flow::Next(InboundMode::Unwrap),
                HandshakeStatus::NeedUnwrap if state.network.is_empty() => {
                    Flow::Next(InboundMode::Pull)
                },
                _ if result.made_progress() => Flow::Next(InboundMode::Unwrap),
                _ => Flow::Next(InboundMode::Pull),
            },
        }
    }

    /// Lend the network buffer to the transport for one read.
    fn pull(self: &Arc<Self>, buffer: GrowableBuffer, then: InboundMode) {
        let link = Arc::clone(self);
        self.transport.read(
            buffer,
            self.timeout,
            Box::new(move |buffer, outcome| {
                bounce(move || link.pulled(buffer, outcome, then));
            }),
        );
    }

    fn pulled(
        self: &Arc<Self>,
        buffer: GrowableBuffer,
        outcome: Result<IoEvent, TransportError>,
        then: InboundMode,
    ) {
        let next = {
            let mut state = lock(&self.inbound.state);
            state.network = buffer;
            match outcome {
                Ok(IoEvent::Transferred(0)) => InboundMode::Pull,
                Ok(IoEvent::Transferred(_)) => then,
                Ok(IoEvent::EndOfStream) => {
                    self.report(Direction::Inbound, &PumpError::EndOfStream);
                    self.close_engine_inbound();
                    InboundMode::Close
                },
                Err(err) => {
                    self.report(Direction::Inbound, &PumpError::Transport(err));
                    InboundMode::Close
                },
            }
        };
        self.drive_inbound(next);
    }
}
