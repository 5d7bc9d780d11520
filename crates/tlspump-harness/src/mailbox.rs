//! Payload fixtures.
//!
//! A [`Mailbox`] is the test's view of one endpoint's application side:
//! bytes posted to it are handed to the outbound pump, bytes the inbound pump
//! delivers are collected for inspection.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use tlspump_core::{PayloadConsumer, PayloadProducer, SendWindow};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Shared {
    outgoing: Mutex<VecDeque<u8>>,
    received: Mutex<Vec<u8>>,
    deliveries: AtomicUsize,
}

/// Application side of one endpoint.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    shared: Arc<Shared>,
}

impl Mailbox {
    /// Empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `bytes` for sending. Call the endpoint's `send()` afterwards.
    pub fn post(&self, bytes: &[u8]) {
        lock(&self.shared.outgoing).extend(bytes);
    }

    /// Bytes queued and not yet taken by the producer.
    pub fn unsent(&self) -> usize {
        lock(&self.shared.outgoing).len()
    }

    /// Everything received so far.
    pub fn received(&self) -> Vec<u8> {
        lock(&self.shared.received).clone()
    }

    /// Take everything received so far.
    pub fn take_received(&self) -> Vec<u8> {
        std::mem::take(&mut *lock(&self.shared.received))
    }

    /// Number of consumer calls.
    pub fn deliveries(&self) -> usize {
        self.shared.deliveries.load(Ordering::SeqCst)
    }

    /// Consumer half, for the endpoint.
    pub fn consumer(&self) -> Inbox {
        Inbox { shared: Arc::clone(&self.shared) }
    }

    /// Producer half, for the endpoint.
    pub fn producer(&self) -> Outbox {
        Outbox { shared: Arc::clone(&self.shared) }
    }
}

/// Consumer collecting into a [`Mailbox`].
#[derive(Debug)]
pub struct Inbox {
    shared: Arc<Shared>,
}

impl PayloadConsumer for Inbox {
    fn on_received(&mut self, plaintext: &[u8]) {
        lock(&self.shared.received).extend_from_slice(plaintext);
        self.shared.deliveries.fetch_add(1, Ordering::SeqCst);
    }
}

/// Producer draining a [`Mailbox`].
#[derive(Debug)]
pub struct Outbox {
    shared: Arc<Shared>,
}

impl PayloadProducer for Outbox {
    fn on_sending(&mut self, window: &mut SendWindow<'_>) -> bool {
        let mut outgoing = lock(&self.shared.outgoing);
        let (front, _) = outgoing.as_slices();
        let mut taken = window.append(front);
        if taken == front.len() {
            let (_, back) = outgoing.as_slices();
            taken += window.append(back);
        }
        outgoing.drain(..taken);
        !outgoing.is_empty()
    }
}
