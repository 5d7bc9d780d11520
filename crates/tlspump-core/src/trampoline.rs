//! Per-thread trampoline for pump continuations.
//!
//! A transport may complete an operation on the calling thread before `read`
//! or `write` returns. If the completion called straight back into the pump,
//! a long run of such completions would nest one stack frame per record.
//!
//! Every entry into a pump goes through [`bounce`] instead. The first bounce on
//! a thread becomes the driver: it runs its job and then drains whatever jobs
//! were bounced while it ran. Nested bounces only enqueue. Stack depth stays
//! constant no matter how many completions happen in line.

use std::{cell::RefCell, collections::VecDeque};

type Job = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

/// Run `job` on this thread without growing the stack of an active driver.
pub(crate) fn bounce(job: impl FnOnce() + 'static) {
    let queued = QUEUE.with(|queue| match queue.borrow_mut().as_mut() {
        Some(pending) => {
            pending.push_back(Box::new(job));
            None
        },
        None => Some(job),
    });

    let Some(job) = queued else {
        return;
    };

    QUEUE.with(|queue| *queue.borrow_mut() = Some(VecDeque::new()));
    let _reset = Reset;

    job();
    while let Some(next) = QUEUE.with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front))
    {
        next();
    }
}

/// Deactivates the trampoline even if a job unwinds.
struct Reset;

impl Drop for Reset {
    fn drop(&mut self) {
        QUEUE.with(|queue| *queue.borrow_mut() = None);
    }
}
