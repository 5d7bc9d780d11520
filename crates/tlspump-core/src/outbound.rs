//! Outbound pump: payload producer → wrap → transport.
//!
//! # State Machine
//!
//! ```text
//!                ┌────────────── write done ─────────────┐
//!                ↓                                       │
//!  wake ──> ┌──────┐ output pending / OVERFLOW   ┌──────┐
//!           │ Wrap │────────────────────────────>│ Push │── EOS/error ──┐
//!           └──────┘                             └──────┘               │
//!            │ │ │ │ NEED_TASK   ┌──────────────────┐                   │
//!            │ │ │ └────────────>│ RunDelegatedTask │── no task ─> Wrap │
//!            │ │ │               └──────────────────┘                   │
//!            │ │ │ NEED_UNWRAP  ┌───────┐   ┌───────────────┐           │
//!            │ │ └─────────────>│ Flush │──>│ RequestUnwrap │── idle    │
//!            │ │                └───────┘   └───────────────┘           │
//!            │ │ CLOSED         ┌───────┐                   ┌───────┐   │
//!            │ └───────────────>│ Flush │──────────────────>│ Close │<──┘
//!            │                  └───────┘                   └───────┘
//!            └── nothing to send ──> idle                       ↑
//!                UNDERFLOW / engine error / growth refused ─────┘
//! ```
//!
//! Every pass starts by offering the producer the free space of the
//! application buffer, so data queued while the pump was idle or writing is
//! picked up on the next wrap.

use std::{
    mem,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use tracing::trace;

use crate::{
    buffer::{BufferRole, GrowableBuffer, SendWindow},
    config::BufferSizes,
    endpoint::Link,
    engine::{Engine, EngineResult, HandshakeStatus, Status},
    error::{EngineError, PumpError, TransportError},
    payload::PayloadProducer,
    phase::Phase,
    pump::{Activity, Direction, Flow, lock},
    trampoline::bounce,
    transport::{IoEvent, Transport},
};

/// Current step of the outbound pump.
#[derive(Debug)]
pub(crate) enum OutboundMode {
    Wrap,
    Push,
    /// Write until the network buffer is empty, then continue
    Flush(Box<OutboundMode>),
    /// Run delegated tasks, then continue with the boxed mode
    RunDelegatedTask(Box<OutboundMode>),
    RequestUnwrap,
    Close,
}

struct OutboundState {
    application: GrowableBuffer,
    network: GrowableBuffer,
    producer: Box<dyn PayloadProducer>,
}

/// Outbound half of an endpoint.
pub(crate) struct OutboundPump {
    pub(crate) activity: Activity,
    state: Mutex<OutboundState>,
    network_capacity: AtomicUsize,
    application_capacity: AtomicUsize,
}

impl OutboundPump {
    pub(crate) fn new(sizes: BufferSizes, producer: Box<dyn PayloadProducer>) -> Self {
        Self {
            activity: Activity::default(),
            state: Mutex::new(OutboundState {
                application: GrowableBuffer::with_capacity(sizes.application),
                network: GrowableBuffer::with_capacity(sizes.network),
                producer,
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
    /// Wake the outbound pump. Coalesced if it is already running.
    pub(crate) fn wake_outbound(self: &Arc<Self>) {
        let link = Arc::clone(self);
        bounce(move || {
            if link.outbound.activity.request() {
                link.outbound.activity.begin_pass();
                let mode = link.outbound_entry();
                link.drive_outbound(mode);
            }
        });
    }

    fn outbound_entry(&self) -> OutboundMode {
        if self.phase() == Phase::Closed {
            OutboundMode::Close
        } else {
            OutboundMode::Wrap
        }
    }

    fn drive_outbound(self: &Arc<Self>, mut mode: OutboundMode) {
        loop {
            if self.verbose {
                trace!(endpoint = %self.name, direction = "outbound", ?mode);
            }
            mode = match self.step_outbound(mode) {
                Flow::Next(next) => next,
                Flow::Transfer(buffer, then) => {
                    self.push(buffer, then);
                    return;
                },
                Flow::Delegate(task, then) => {
                    let link = Arc::clone(self);
                    self.begin_task();
                    self.executor.execute(Box::new(move || {
                        task();
                        bounce(move || {
                            link.finish_task();
                            link.drive_outbound(OutboundMode::RunDelegatedTask(Box::new(then)));
                        });
                    }));
                    return;
                },
                Flow::Idle => {
                    if !self.outbound.activity.release() {
                        return;
                    }
                    self.outbound.activity.begin_pass();
                    self.outbound_entry()
                },
                Flow::Done => return,
            };
        }
    }

    fn step_outbound(self: &Arc<Self>, mode: OutboundMode) -> Flow<OutboundMode> {
        match mode {
            OutboundMode::Wrap => self.wrap_step(),
            OutboundMode::Push => {
                let mut state = lock(&self.outbound.state);
                if state.network.is_empty() {
                    return Flow::Next(OutboundMode::Wrap);
                }
                Flow::Transfer(mem::take(&mut state.network), OutboundMode::Wrap)
            },
            OutboundMode::Flush(then) => {
                let mut state = lock(&self.outbound.state);
                if state.network.is_empty() {
                    return Flow::Next(*then);
                }
                Flow::Transfer(mem::take(&mut state.network), OutboundMode::Flush(then))
            },
            OutboundMode::RunDelegatedTask(then) => match self.next_delegated_task() {
                Some(task) => Flow::Delegate(task, *then),
                // The sibling's task is still running; its completion wakes us
                None if self.park_behind_task(&self.outbound.activity) => Flow::Idle,
                None => Flow::Next(*then),
            },
            OutboundMode::RequestUnwrap => {
                self.outbound.activity.park();
                self.wake_inbound();
                Flow::Idle
            },
            OutboundMode::Close => {
                self.close_engine_outbound();
                self.close_engine_inbound();
                self.outbound.activity.mark_closed();
                self.finalize();
                Flow::Done
            },
        }
    }

    fn wrap_step(self: &Arc<Self>) -> Flow<OutboundMode> {
        let mut guard = lock(&self.outbound.state);
        let state = &mut *guard;

        state.application.compact();
        state.producer.on_sending(&mut SendWindow::new(&mut state.application));

        let result = match self.wrap(state.application.pending(), state.network.free_mut()) {
            Ok(result) => result,
            Err(err) => {
                self.report(Direction::Outbound, &err);
                return Flow::Next(OutboundMode::Close);
            },
        };
        state.application.consume(result.bytes_consumed);
        state.network.commit(result.bytes_produced);

        if result.handshake_status != HandshakeStatus::NeedWrap
            && self.inbound.activity.take_parked()
        {
            self.wake_inbound();
        }

        if result.status == Status::Closed {
            return Flow::Next(OutboundMode::Flush(Box::new(OutboundMode::Close)));
        }

        match result.handshake_status {
            HandshakeStatus::NeedTask => {
                Flow::Next(OutboundMode::RunDelegatedTask(Box::new(OutboundMode::Wrap)))
            },
            HandshakeStatus::NeedUnwrap | HandshakeStatus::NeedUnwrapAgain => {
                if state.network.is_empty() {
                    Flow::Next(OutboundMode::RequestUnwrap)
                } else {
                    Flow::Next(OutboundMode::Flush(Box::new(OutboundMode::RequestUnwrap)))
                }
            },
            HandshakeStatus::Finished => {
                self.wake_inbound();
                self.after_wrap(state, &result)
            },
            HandshakeStatus::NeedWrap | HandshakeStatus::NotHandshaking => {
                self.after_wrap(state, &result)
            },
        }
    }

    fn after_wrap(&self, state: &mut OutboundState, result: &EngineResult) -> Flow<OutboundMode> {
        match result.status {
            Status::BufferUnderflow => {
                let err = EngineError::protocol("wrap reported buffer underflow");
                self.report(Direction::Outbound, &PumpError::Protocol(err));
                Flow::Next(OutboundMode::Close)
            },
            Status::BufferOverflow if state.network.is_over_half_full() => {
                Flow::Next(OutboundMode::Push)
            },
            Status::BufferOverflow => {
                match self.grow(Direction::Outbound, BufferRole::Network, &mut state.network) {
                    Ok(capacity) => {
                        self.outbound.network_capacity.store(capacity, Ordering::Relaxed);
                        Flow::Next(OutboundMode::Wrap)
                    },
                    Err(err) => {
                        self.report(Direction::Outbound, &err);
                        Flow::Next(OutboundMode::Close)
                    },
                }
            },
            Status::Ok | Status::Closed => {
                if result.handshake_status == HandshakeStatus::NeedWrap && result.made_progress() {
                    Flow::Next(OutboundMode::Wrap)
                } else if !state.network.is_empty() {
                    Flow::Next(OutboundMode::Push)
                } else {
                    Flow::Idle
                }
            },
        }
    }

    /// Lend the network buffer to the transport for one write.
    fn push(self: &Arc<Self>, buffer: GrowableBuffer, then: OutboundMode) {
        let link = Arc::clone(self);
        self.transport.write(
            buffer,
            self.timeout,
            Box::new(move |buffer, outcome| {
                bounce(move || link.pushed(buffer, outcome, then));
            }),
        );
    }

    fn pushed(
        self: &Arc<Self>,
        buffer: GrowableBuffer,
        outcome: Result<IoEvent, TransportError>,
        then: OutboundMode,
    ) {
        let next = {
            let mut state = lock(&self.outbound.state);
            state.network = buffer;
            match outcome {
                Ok(IoEvent::Transferred(_)) => {
                    state.network.compact();
                    then
                },
                Ok(IoEvent::EndOfStream) => {
                    self.report(Direction::Outbound, &PumpError::EndOfStream);
                    OutboundMode::Close
                },
                Err(err) => {
                    self.report(Direction::Outbound, &PumpError::Transport(err));
                    OutboundMode::Close
                },
            }
        };
        self.drive_outbound(next);
    }
}
