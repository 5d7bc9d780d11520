//! [`Transport`] over a tokio byte stream.
//!
//! Each operation runs as a task on a captured runtime handle. The stream is
//! split so a read and a write can be in flight at the same time, one per
//! pump. Closing wakes every in-flight operation so the pumps see the close
//! instead of waiting for their timeout.

use std::{
    future::Future,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    runtime::Handle,
    sync::{Mutex, Notify},
};

use crate::{
    buffer::GrowableBuffer,
    error::TransportError,
    transport::{IoCompletion, IoEvent, Transport},
};

/// Close signal shared with in-flight operations.
#[derive(Default)]
struct Shutdown {
    closed: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.notify.notify_waiters();
        first
    }

    /// Run `io` under a timeout, abandoning it if the transport closes.
    async fn guard<F>(&self, timeout: Duration, io: F) -> Result<usize, TransportError>
    where
        F: Future<Output = io::Result<usize>>,
    {
        let closed = self.notify.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        tokio::select! {
            () = &mut closed => Err(TransportError::Closed),
            outcome = tokio::time::timeout(timeout, io) => match outcome {
                Err(_) => Err(TransportError::TimedOut),
                Ok(Ok(n)) => Ok(n),
                Ok(Err(err)) => Err(TransportError::Io(err)),
            },
        }
    }
}

/// Transport over any tokio `AsyncRead + AsyncWrite` stream.
pub struct TokioTransport<S> {
    reader: Arc<Mutex<ReadHalf<S>>>,
    writer: Arc<Mutex<WriteHalf<S>>>,
    handle: Handle,
    shutdown: Arc<Shutdown>,
}

impl<S> TokioTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap `stream`, running operations on `handle`.
    pub fn new(stream: S, handle: Handle) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            handle,
            shutdown: Arc::new(Shutdown::default()),
        }
    }

    /// Wrap `stream`, running operations on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn current(stream: S) -> Self {
        Self::new(stream, Handle::current())
    }
}

impl<S> Transport for TokioTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn read(&self, mut buffer: GrowableBuffer, timeout: Duration, on_complete: IoCompletion) {
        if self.shutdown.is_closed() {
            on_complete(buffer, Err(TransportError::Closed));
            return;
        }

        let reader = Arc::clone(&self.reader);
        let shutdown = Arc::clone(&self.shutdown);
        self.handle.spawn(async move {
            let free = buffer.free_len();
            let outcome = shutdown
                .guard(timeout, async {
                    let mut reader = reader.lock().await;
                    reader.read(buffer.free_mut()).await
                })
                .await;

            let outcome = match outcome {
                Ok(0) if free > 0 => Ok(IoEvent::EndOfStream),
                Ok(n) => {
                    buffer.commit(n);
                    Ok(IoEvent::Transferred(n))
                },
                Err(err) => Err(err),
            };
            on_complete(buffer, outcome);
        });
    }

    fn write(&self, mut buffer: GrowableBuffer, timeout: Duration, on_complete: IoCompletion) {
        if self.shutdown.is_closed() {
            on_complete(buffer, Err(TransportError::Closed));
            return;
        }

        let writer = Arc::clone(&self.writer);
        let shutdown = Arc::clone(&self.shutdown);
        self.handle.spawn(async move {
            let outcome = shutdown
                .guard(timeout, async {
                    let mut writer = writer.lock().await;
                    writer.write(buffer.pending()).await
                })
                .await;

            let outcome = match outcome {
                Ok(0) => Ok(IoEvent::EndOfStream),
                Ok(n) => {
                    buffer.consume(n);
                    Ok(IoEvent::Transferred(n))
                },
                Err(TransportError::Io(err)) if err.kind() == io::ErrorKind::BrokenPipe => {
                    Ok(IoEvent::EndOfStream)
                },
                Err(err) => Err(err),
            };
            on_complete(buffer, outcome);
        });
    }

    fn close(&self) {
        if !self.shutdown.close() {
            return;
        }

        let writer = Arc::clone(&self.writer);
        self.handle.spawn(async move {
            if let Err(err) = writer.lock().await.shutdown().await {
                tracing::debug!(error = %err, "stream shutdown failed");
            }
        });
    }
}
