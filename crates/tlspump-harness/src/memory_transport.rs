//! In-memory transport pair.
//!
//! Two [`MemoryTransport`]s share a pair of pipes. Operations complete on the
//! calling thread whenever they can: a write lands in the peer's pipe and
//! completes at once, a read completes at once if bytes are waiting. A read on
//! an empty pipe parks until the peer writes or closes, and is then completed
//! from the peer's thread.
//!
//! Completions are never invoked while a pipe lock is held.
//!
//! # Determinism
//!
//! [`MemoryTransport::pair_chunked`] caps every read at a random size drawn
//! from a seeded `ChaCha20` generator, so record boundaries land in different
//! places for different seeds while each run stays reproducible.
//!
//! # Timeouts
//!
//! There is no clock. A parked read waits until the peer acts. Timeouts are
//! simulated with [`MemoryTransport::fail_next_read`].

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tlspump_core::{GrowableBuffer, IoCompletion, IoEvent, Transport, TransportError};
use tracing::debug;

type Outcome = Result<IoEvent, TransportError>;

/// One direction of the connection.
#[derive(Default)]
struct Pipe {
    bytes: VecDeque<u8>,
    /// Writing side closed: readers see end of stream once drained
    writer_closed: bool,
    /// Reading side closed: writers see end of stream
    reader_closed: bool,
    /// Read parked until bytes arrive
    parked: Option<ParkedRead>,
}

struct ParkedRead {
    buffer: GrowableBuffer,
    limit: usize,
    on_complete: IoCompletion,
}

impl Pipe {
    /// Move up to `limit` bytes into `buffer`.
    fn fill(&mut self, buffer: &mut GrowableBuffer, limit: usize) -> usize {
        let free = buffer.free_mut();
        let n = self.bytes.len().min(free.len()).min(limit);
        for (slot, byte) in free.iter_mut().zip(self.bytes.drain(..n)) {
            *slot = byte;
        }
        buffer.commit(n);
        n
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Deferred completion, run once all locks are released.
struct Completion {
    on_complete: IoCompletion,
    buffer: GrowableBuffer,
    outcome: Outcome,
}

impl Completion {
    fn run(self) {
        (self.on_complete)(self.buffer, self.outcome);
    }
}

/// One end of an in-memory connection.
pub struct MemoryTransport {
    inbox: Arc<Mutex<Pipe>>,
    outbox: Arc<Mutex<Pipe>>,
    chunker: Option<Mutex<ChaCha20Rng>>,
    max_chunk: usize,
    next_read_error: Mutex<Option<TransportError>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Two connected ends. Reads take everything available.
    pub fn pair() -> (Self, Self) {
        let forward = Arc::new(Mutex::new(Pipe::default()));
        let backward = Arc::new(Mutex::new(Pipe::default()));
        let a = Self::end(Arc::clone(&backward), Arc::clone(&forward), None, usize::MAX);
        let b = Self::end(forward, backward, None, usize::MAX);
        (a, b)
    }

    /// Two connected ends whose reads return between 1 and `max_chunk` bytes,
    /// chosen by a generator seeded with `seed`.
    pub fn pair_chunked(seed: u64, max_chunk: usize) -> (Self, Self) {
        let forward = Arc::new(Mutex::new(Pipe::default()));
        let backward = Arc::new(Mutex::new(Pipe::default()));
        let max_chunk = max_chunk.max(1);
        let a = Self::end(
            Arc::clone(&backward),
            Arc::clone(&forward),
            Some(ChaCha20Rng::seed_from_u64(seed)),
            max_chunk,
        );
        let b = Self::end(
            forward,
            backward,
            Some(ChaCha20Rng::seed_from_u64(seed.wrapping_add(1))),
            max_chunk,
        );
        (a, b)
    }

    fn end(
        inbox: Arc<Mutex<Pipe>>,
        outbox: Arc<Mutex<Pipe>>,
        chunker: Option<ChaCha20Rng>,
        max_chunk: usize,
    ) -> Self {
        Self {
            inbox,
            outbox,
            chunker: chunker.map(Mutex::new),
            max_chunk,
            next_read_error: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Fail the next read with `err` instead of touching the pipe.
    pub fn fail_next_read(&self, err: TransportError) {
        *lock(&self.next_read_error) = Some(err);
    }

    /// Returns true once [`Transport::close`] was called on this end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Bytes written by the peer and not yet read by this end.
    pub fn unread(&self) -> usize {
        lock(&self.inbox).bytes.len()
    }

    /// Queue raw bytes for the peer, bypassing any endpoint.
    pub fn inject(&self, bytes: &[u8]) {
        let parked = {
            let mut pipe = lock(&self.outbox);
            pipe.bytes.extend(bytes);
            pipe.parked.take()
        };
        if let Some(parked) = parked {
            self.deliver(&self.outbox, parked);
        }
    }

    /// Cut the connection underneath both ends: each side reads end of stream
    /// once its pipe is drained and writes see end of stream. Neither end is
    /// marked closed.
    pub fn sever(&self) {
        debug!("connection severed");
        let own = Self::cut(&self.inbox);
        let peer = Self::cut(&self.outbox);
        if let Some(read) = own {
            self.deliver(&self.inbox, read);
        }
        if let Some(read) = peer {
            self.deliver(&self.outbox, read);
        }
    }

    fn cut(pipe: &Mutex<Pipe>) -> Option<ParkedRead> {
        let mut pipe = lock(pipe);
        pipe.writer_closed = true;
        pipe.reader_closed = true;
        pipe.parked.take()
    }

    /// Take every byte the peer wrote so far.
    pub fn drain(&self) -> Vec<u8> {
        lock(&self.inbox).bytes.drain(..).collect()
    }

    fn read_limit(&self) -> usize {
        match &self.chunker {
            Some(rng) => lock(rng).gen_range(1..=self.max_chunk),
            None => usize::MAX,
        }
    }

    /// Complete a parked read against `pipe`, or park it again if the bytes it
    /// was woken for are already gone.
    fn deliver(&self, pipe: &Mutex<Pipe>, parked: ParkedRead) {
        let ParkedRead { mut buffer, limit, on_complete } = parked;
        let completion = {
            let mut pipe = lock(pipe);
            if pipe.bytes.is_empty() && !pipe.writer_closed {
                pipe.parked = Some(ParkedRead { buffer, limit, on_complete });
                return;
            }
            let outcome = if pipe.bytes.is_empty() {
                Ok(IoEvent::EndOfStream)
            } else {
                Ok(IoEvent::Transferred(pipe.fill(&mut buffer, limit)))
            };
            Completion { on_complete, buffer, outcome }
        };
        completion.run();
    }
}

impl Transport for MemoryTransport {
    fn read(&self, mut buffer: GrowableBuffer, _timeout: Duration, on_complete: IoCompletion) {
        if self.is_closed() {
            on_complete(buffer, Err(TransportError::Closed));
            return;
        }
        let injected = lock(&self.next_read_error).take();
        if let Some(err) = injected {
            debug!(error = %err, "injected read fault");
            on_complete(buffer, Err(err));
            return;
        }

        let limit = self.read_limit();
        let completion = {
            let mut pipe = lock(&self.inbox);
            if !pipe.bytes.is_empty() {
                let n = pipe.fill(&mut buffer, limit);
                Completion { on_complete, buffer, outcome: Ok(IoEvent::Transferred(n)) }
            } else if pipe.writer_closed {
                Completion { on_complete, buffer, outcome: Ok(IoEvent::EndOfStream) }
            } else {
                pipe.parked = Some(ParkedRead { buffer, limit, on_complete });
                return;
            }
        };
        completion.run();
    }

    fn write(&self, mut buffer: GrowableBuffer, _timeout: Duration, on_complete: IoCompletion) {
        if self.is_closed() {
            on_complete(buffer, Err(TransportError::Closed));
            return;
        }

        let (outcome, parked) = {
            let mut pipe = lock(&self.outbox);
            if pipe.reader_closed {
                (Ok(IoEvent::EndOfStream), None)
            } else {
                let n = buffer.len();
                pipe.bytes.extend(buffer.pending());
                buffer.consume(n);
                (Ok(IoEvent::Transferred(n)), pipe.parked.take())
            }
        };

        on_complete(buffer, outcome);
        if let Some(parked) = parked {
            self.deliver(&self.outbox, parked);
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let own = {
            let mut pipe = lock(&self.inbox);
            pipe.reader_closed = true;
            pipe.parked.take()
        };
        let peer = {
            let mut pipe = lock(&self.outbox);
            pipe.writer_closed = true;
            pipe.parked.take()
        };

        if let Some(ParkedRead { buffer, on_complete, .. }) = own {
            on_complete(buffer, Err(TransportError::Closed));
        }
        if let Some(parked) = peer {
            self.deliver(&self.outbox, parked);
        }
    }
}
