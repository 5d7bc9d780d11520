//! Execution context for delegated engine tasks.
//!
//! A delegated task is the one place the driver deliberately leaves the
//! current call stack: the task runs wherever the executor puts it and the
//! owning pump continues from that thread once it finishes.

use tokio::runtime::Handle;

/// Boxed unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send>;

/// Runs jobs on behalf of the pumps.
pub trait TaskExecutor: Send + Sync + 'static {
    /// Run `job`, now or later, on any thread.
    fn execute(&self, job: Job);
}

/// Runs jobs on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Executor bound to `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor bound to the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl TaskExecutor for TokioExecutor {
    fn execute(&self, job: Job) {
        // Detached; completion is observed through the pump, not the handle
        drop(self.handle.spawn_blocking(job));
    }
}

/// Runs jobs immediately on the calling thread.
///
/// Stack depth stays bounded because the pump continuation is queued on the
/// trampoline rather than called directly. Used by deterministic tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn inline_executor_runs_before_returning() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        InlineExecutor.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
