//! Scripted stand-in for a TLS engine.
//!
//! Speaks a three-flight handshake over length-prefixed records and masks
//! application bytes with a fixed key. There is no cryptography here; the
//! point is to produce the same result codes, partial progress and buffer
//! pressure a real engine would, deterministically.
//!
//! # Record format
//!
//! ```text
//! ┌──────┬───────────┬─────────────────────────┐
//! │ kind │ length BE │ payload (XOR 0x5A mask) │
//! │  u8  │    u16    │      length bytes       │
//! └──────┴───────────┴─────────────────────────┘
//! ```
//!
//! # Handshake
//!
//! ```text
//! client                                server
//!   │ ── Hello ────────────────────────> │  NEED_TASK (one delegated task)
//!   │ <──────────────────── HelloReply ── │
//!   │ ── Finished ─────────────────────> │
//! FINISHED                            FINISHED
//! ```
//!
//! [`ToyConfig`] switches add the rarer result codes: a server can report
//! NEED_UNWRAP_AGAIN once after the Hello, and a client can ask for a
//! delegated task from `wrap` before sending its Hello.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tlspump_core::{
    DelegatedTask, Engine, EngineError, EngineResult, HandshakeStatus, Role, Status,
};

/// Length of the record header.
pub const HEADER_LEN: usize = 3;

const MASK: u8 = 0x5A;

/// Record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Client's opening flight
    Hello = 1,
    /// Server's answer
    HelloReply = 2,
    /// Client's last flight
    Finished = 3,
    /// Application data
    Data = 4,
    /// Orderly close
    CloseNotify = 5,
}

impl RecordKind {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Hello),
            2 => Some(Self::HelloReply),
            3 => Some(Self::Finished),
            4 => Some(Self::Data),
            5 => Some(Self::CloseNotify),
            _ => None,
        }
    }
}

/// Encode one record.
pub fn encode_record(kind: RecordKind, payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(HEADER_LEN + payload.len());
    record.push(kind as u8);
    record.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    record.extend(payload.iter().map(|b| b ^ MASK));
    record
}

/// Engine call observed by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeEvent {
    /// A wrap returned this result
    Wrap(EngineResult),
    /// An unwrap returned this result
    Unwrap(EngineResult),
    /// A delegated task ran
    Task,
}

/// Shared record of what the engine was asked to do.
#[derive(Debug, Default)]
pub struct EngineProbe {
    events: Mutex<Vec<ProbeEvent>>,
    wrap_inputs: Mutex<Vec<usize>>,
    close_inbound_calls: AtomicUsize,
    close_outbound_calls: AtomicUsize,
    in_wrap: AtomicBool,
    in_unwrap: AtomicBool,
    overlapped: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EngineProbe {
    /// Every event so far, oldest first.
    pub fn events(&self) -> Vec<ProbeEvent> {
        lock(&self.events).clone()
    }

    /// Plaintext length offered to each wrap call, oldest first.
    pub fn wrap_inputs(&self) -> Vec<usize> {
        lock(&self.wrap_inputs).clone()
    }

    /// Number of `close_inbound` calls.
    pub fn close_inbound_calls(&self) -> usize {
        self.close_inbound_calls.load(Ordering::SeqCst)
    }

    /// Number of `close_outbound` calls.
    pub fn close_outbound_calls(&self) -> usize {
        self.close_outbound_calls.load(Ordering::SeqCst)
    }

    /// Number of delegated tasks that ran.
    pub fn tasks_run(&self) -> usize {
        lock(&self.events).iter().filter(|e| matches!(e, ProbeEvent::Task)).count()
    }

    /// Returns true if two calls in the same direction ever overlapped.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    fn record(&self, event: ProbeEvent) {
        lock(&self.events).push(event);
    }

    fn enter(&self, flag: &AtomicBool) {
        if flag.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
    }
}

/// Where the scripted handshake stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    SendHello,
    AwaitHello,
    AwaitReply,
    Reprocess,
    Task,
    SendReply,
    SendFinished,
    AwaitFinished,
    Established,
}

/// Toy engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct ToyConfig {
    /// Largest plaintext carried by one data record
    pub max_fragment: usize,
    /// Reported plaintext buffer hint
    pub plaintext_hint: usize,
    /// Reported ciphertext buffer hint
    pub ciphertext_hint: usize,
    /// Server asks for one delegated task after the Hello
    pub delegated_task: bool,
    /// Server reports NEED_UNWRAP_AGAIN once after the Hello
    pub unwrap_again: bool,
    /// Client asks for one delegated task from wrap before its Hello
    pub wrap_task: bool,
}

impl Default for ToyConfig {
    fn default() -> Self {
        Self {
            max_fragment: 16 * 1024,
            plaintext_hint: 16 * 1024,
            ciphertext_hint: 16 * 1024 + HEADER_LEN,
            delegated_task: true,
            unwrap_again: false,
            wrap_task: false,
        }
    }
}

/// Scripted engine.
#[derive(Debug)]
pub struct ToyEngine {
    config: ToyConfig,
    stage: Stage,
    after_task: Stage,
    task_handed_out: bool,
    task_done: Arc<AtomicBool>,
    outbound_closing: bool,
    close_sent: bool,
    peer_closed: bool,
    inbound_closed: bool,
    probe: Arc<EngineProbe>,
}

impl ToyEngine {
    /// Engine for `role` with default configuration.
    pub fn new(role: Role) -> Self {
        Self::with_config(role, ToyConfig::default())
    }

    /// Engine for `role`.
    pub fn with_config(role: Role, config: ToyConfig) -> Self {
        let (stage, after_task) = match role {
            Role::Client if config.wrap_task => (Stage::Task, Stage::SendHello),
            Role::Client => (Stage::SendHello, Stage::SendHello),
            Role::Server => (Stage::AwaitHello, Stage::SendReply),
        };
        Self {
            config,
            stage,
            after_task,
            task_handed_out: false,
            task_done: Arc::new(AtomicBool::new(false)),
            outbound_closing: false,
            close_sent: false,
            peer_closed: false,
            inbound_closed: false,
            probe: Arc::new(EngineProbe::default()),
        }
    }

    /// Probe observing this engine.
    pub fn probe(&self) -> Arc<EngineProbe> {
        Arc::clone(&self.probe)
    }

    fn handshake_status(&mut self) -> HandshakeStatus {
        if self.stage == Stage::Task && self.task_done.load(Ordering::SeqCst) {
            self.stage = self.after_task;
        }
        match self.stage {
            Stage::SendHello | Stage::SendReply | Stage::SendFinished => HandshakeStatus::NeedWrap,
            Stage::AwaitHello | Stage::AwaitReply | Stage::AwaitFinished => {
                HandshakeStatus::NeedUnwrap
            },
            Stage::Reprocess => HandshakeStatus::NeedUnwrapAgain,
            Stage::Task => HandshakeStatus::NeedTask,
            Stage::Established => HandshakeStatus::NotHandshaking,
        }
    }

    fn wrap_record(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        if self.close_sent {
            return Ok(EngineResult::idle(Status::Closed, self.handshake_status()));
        }
        if self.outbound_closing {
            if dst.len() < HEADER_LEN {
                return Ok(EngineResult::idle(Status::BufferOverflow, self.handshake_status()));
            }
            dst[..HEADER_LEN].copy_from_slice(&encode_record(RecordKind::CloseNotify, &[]));
            self.close_sent = true;
            return Ok(EngineResult {
                status: Status::Closed,
                handshake_status: self.handshake_status(),
                bytes_consumed: 0,
                bytes_produced: HEADER_LEN,
            });
        }

        let (kind, payload, consumed, next) = match self.handshake_status() {
            HandshakeStatus::NeedWrap => match self.stage {
                Stage::SendHello => (RecordKind::Hello, &b"hello"[..], 0, Stage::AwaitReply),
                Stage::SendReply => {
                    (RecordKind::HelloReply, &b"welcome"[..], 0, Stage::AwaitFinished)
                },
                _ => (RecordKind::Finished, &b"done"[..], 0, Stage::Established),
            },
            HandshakeStatus::NotHandshaking if !src.is_empty() => {
                let n = src.len().min(self.config.max_fragment);
                (RecordKind::Data, &src[..n], n, Stage::Established)
            },
            status => return Ok(EngineResult::idle(Status::Ok, status)),
        };

        let record = encode_record(kind, payload);
        if dst.len() < record.len() {
            return Ok(EngineResult::idle(Status::BufferOverflow, self.handshake_status()));
        }
        dst[..record.len()].copy_from_slice(&record);

        let finished = kind == RecordKind::Finished;
        self.stage = next;
        Ok(EngineResult {
            status: Status::Ok,
            handshake_status: if finished {
                HandshakeStatus::Finished
            } else {
                self.handshake_status()
            },
            bytes_consumed: consumed,
            bytes_produced: record.len(),
        })
    }

    fn unwrap_record(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        let status = self.handshake_status();
        if self.peer_closed || self.inbound_closed {
            return Ok(EngineResult::idle(Status::Closed, status));
        }
        if self.stage == Stage::Reprocess {
            self.stage = self.after_hello();
            return Ok(self.handshake_progress(0, false));
        }
        if matches!(status, HandshakeStatus::NeedWrap | HandshakeStatus::NeedTask) {
            return Ok(EngineResult::idle(Status::Ok, status));
        }
        if src.len() < HEADER_LEN {
            return Ok(EngineResult::idle(Status::BufferUnderflow, status));
        }

        let kind = RecordKind::from_u8(src[0])
            .ok_or_else(|| EngineError::protocol(format!("unknown record kind {}", src[0])))?;
        let len = u16::from_be_bytes([src[1], src[2]]) as usize;
        if src.len() < HEADER_LEN + len {
            return Ok(EngineResult::idle(Status::BufferUnderflow, status));
        }
        let consumed = HEADER_LEN + len;
        let payload = &src[HEADER_LEN..consumed];

        match (self.stage, kind) {
            (_, RecordKind::CloseNotify) => {
                self.peer_closed = true;
                Ok(EngineResult {
                    status: Status::Closed,
                    handshake_status: status,
                    bytes_consumed: consumed,
                    bytes_produced: 0,
                })
            },
            (Stage::Established, RecordKind::Data) => {
                if dst.len() < len {
                    return Ok(EngineResult::idle(Status::BufferOverflow, status));
                }
                for (slot, byte) in dst.iter_mut().zip(payload) {
                    *slot = byte ^ MASK;
                }
                Ok(EngineResult {
                    status: Status::Ok,
                    handshake_status: HandshakeStatus::NotHandshaking,
                    bytes_consumed: consumed,
                    bytes_produced: len,
                })
            },
            (Stage::AwaitHello, RecordKind::Hello) => {
                self.stage =
                    if self.config.unwrap_again { Stage::Reprocess } else { self.after_hello() };
                Ok(self.handshake_progress(consumed, false))
            },
            (Stage::AwaitReply, RecordKind::HelloReply) => {
                self.stage = Stage::SendFinished;
                Ok(self.handshake_progress(consumed, false))
            },
            (Stage::AwaitFinished, RecordKind::Finished) => {
                self.stage = Stage::Established;
                Ok(self.handshake_progress(consumed, true))
            },
            (stage, kind) => {
                Err(EngineError::protocol(format!("unexpected {kind:?} record in {stage:?}")))
            },
        }
    }

    fn after_hello(&self) -> Stage {
        if self.config.delegated_task { Stage::Task } else { Stage::SendReply }
    }

    fn handshake_progress(&mut self, consumed: usize, finished: bool) -> EngineResult {
        EngineResult {
            status: Status::Ok,
            handshake_status: if finished {
                HandshakeStatus::Finished
            } else {
                self.handshake_status()
            },
            bytes_consumed: consumed,
            bytes_produced: 0,
        }
    }
}

impl Engine for ToyEngine {
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        self.probe.enter(&self.probe.in_wrap);
        lock(&self.probe.wrap_inputs).push(src.len());
        let result = self.wrap_record(src, dst);
        self.probe.in_wrap.store(false, Ordering::SeqCst);
        if let Ok(result) = &result {
            self.probe.record(ProbeEvent::Wrap(*result));
        }
        result
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        self.probe.enter(&self.probe.in_unwrap);
        let result = self.unwrap_record(src, dst);
        self.probe.in_unwrap.store(false, Ordering::SeqCst);
        if let Ok(result) = &result {
            self.probe.record(ProbeEvent::Unwrap(*result));
        }
        result
    }

    fn next_delegated_task(&mut self) -> Option<DelegatedTask> {
        if self.stage != Stage::Task || self.task_handed_out {
            return None;
        }
        self.task_handed_out = true;
        let done = Arc::clone(&self.task_done);
        let probe = Arc::clone(&self.probe);
        Some(Box::new(move || {
            probe.record(ProbeEvent::Task);
            done.store(true, Ordering::SeqCst);
        }))
    }

    fn close_inbound(&mut self) -> Result<(), EngineError> {
        self.probe.close_inbound_calls.fetch_add(1, Ordering::SeqCst);
        self.inbound_closed = true;
        if self.peer_closed {
            Ok(())
        } else {
            Err(EngineError::Close("inbound closed before close notification".to_string()))
        }
    }

    fn close_outbound(&mut self) {
        self.probe.close_outbound_calls.fetch_add(1, Ordering::SeqCst);
        self.outbound_closing = true;
    }

    fn recommended_plaintext_buffer_size(&self) -> usize {
        self.config.plaintext_hint
    }

    fn recommended_ciphertext_buffer_size(&self) -> usize {
        self.config.ciphertext_hint
    }
}
