//! Activity protocol shared by both pumps.
//!
//! A pump is either running (one pass owns it) or idle. Wakes that arrive
//! while it runs are coalesced into one more pass after the current one, so at
//! most one engine call per direction is ever outstanding.
//!
//! ```text
//!   wake ──> wake_requested = true ──> CAS running false→true
//!                                          │ won          │ lost
//!                                          ↓              ↓
//!                                      drive pass      (coalesced)
//!                                          │
//!                   Idle: running = false; wake_requested? ──> drive again
//!                   Transfer/Delegate: running stays set until completion
//!                   Done: running stays set forever
//! ```

use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use crate::{buffer::GrowableBuffer, engine::DelegatedTask};

/// Which pump an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Inbound,
    Outbound,
}

/// What a pump does after one mode step.
pub(crate) enum Flow<M> {
    /// Continue synchronously with this mode
    Next(M),
    /// Lend the buffer to the transport; continue with the mode on success
    Transfer(GrowableBuffer, M),
    /// Run the task on the executor, then poll for more tasks before the mode
    Delegate(DelegatedTask, M),
    /// Nothing left to do until woken
    Idle,
    /// Pump closed for good
    Done,
}

/// Running/wake/closed flags of one pump.
#[derive(Debug, Default)]
pub(crate) struct Activity {
    running: AtomicBool,
    wake_requested: AtomicBool,
    closed: AtomicBool,
    parked: AtomicBool,
}

impl Activity {
    /// Record a wake. Returns true if the caller now owns the pump and must
    /// drive a pass.
    pub(crate) fn request(&self) -> bool {
        self.wake_requested.store(true, Ordering::SeqCst);
        self.try_acquire()
    }

    fn try_acquire(&self) -> bool {
        self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    /// Start of a pass: pending wakes are satisfied by this pass.
    pub(crate) fn begin_pass(&self) {
        self.wake_requested.store(false, Ordering::SeqCst);
        self.parked.store(false, Ordering::SeqCst);
    }

    /// Give up the pump. Returns true if a wake arrived during the pass and
    /// the caller re-acquired the pump to run again.
    pub(crate) fn release(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        self.wake_requested.load(Ordering::SeqCst) && self.try_acquire()
    }

    /// Mark the pump closed. The running flag is never cleared afterwards.
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Record that the pump idled to let its sibling drive the handshake.
    pub(crate) fn park(&self) {
        self.parked.store(true, Ordering::SeqCst);
    }

    /// Clear the parked flag. Returns true if it was set.
    pub(crate) fn take_parked(&self) -> bool {
        self.parked.swap(false, Ordering::SeqCst)
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier, atomic::AtomicUsize},
        thread,
    };

    use super::*;

    #[test]
    fn wake_while_running_is_coalesced() {
        let activity = Activity::default();

        assert!(activity.request());
        activity.begin_pass();

        // Second and third wakes arrive mid-pass
        assert!(!activity.request());
        assert!(!activity.request());

        // One more pass, not two
        assert!(activity.release());
        activity.begin_pass();
        assert!(!activity.release());
    }

    #[test]
    fn closed_pump_is_never_reacquired() {
        let activity = Activity::default();
        assert!(activity.request());
        activity.begin_pass();
        activity.mark_closed();

        assert!(!activity.request());
        assert!(activity.is_closed());
    }

    #[test]
    fn parked_flag_is_taken_once() {
        let activity = Activity::default();
        activity.park();
        assert!(activity.take_parked());
        assert!(!activity.take_parked());
    }

    #[test]
    fn concurrent_wakes_never_overlap() {
        const THREADS: usize = 8;
        const WAKES: usize = 2_000;

        let activity = Arc::new(Activity::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let passes = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let activity = Arc::clone(&activity);
                let inside = Arc::clone(&inside);
                let passes = Arc::clone(&passes);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..WAKES {
                        if !activity.request() {
                            continue;
                        }
                        loop {
                            activity.begin_pass();
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            passes.fetch_add(1, Ordering::SeqCst);
                            inside.fetch_sub(1, Ordering::SeqCst);
                            if !activity.release() {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(passes.load(Ordering::SeqCst) >= 1);
        assert!(!activity.release());
    }
}
