//! Application-side collaborators.
//!
//! Both follow a full-drain contract: the consumer owns the slice it is given
//! only for the duration of the call, and the producer writes everything it
//! wants sent before returning.

use crate::buffer::SendWindow;

/// Receives decrypted application bytes.
pub trait PayloadConsumer: Send + 'static {
    /// Consume `plaintext` completely. The bytes are discarded when this
    /// returns.
    fn on_received(&mut self, plaintext: &[u8]);
}

/// Supplies application bytes to encrypt.
pub trait PayloadProducer: Send + 'static {
    /// Append zero or more bytes to `window`.
    ///
    /// The return value is advisory: true means more data may follow soon. It
    /// does not change pump behavior.
    fn on_sending(&mut self, window: &mut SendWindow<'_>) -> bool;
}

impl<F> PayloadConsumer for F
where
    F: FnMut(&[u8]) + Send + 'static,
{
    fn on_received(&mut self, plaintext: &[u8]) {
        self(plaintext);
    }
}

impl<F> PayloadProducer for F
where
    F: FnMut(&mut SendWindow<'_>) -> bool + Send + 'static,
{
    fn on_sending(&mut self, window: &mut SendWindow<'_>) -> bool {
        self(window)
    }
}

/// Producer that never has anything to send.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl PayloadProducer for Silent {
    fn on_sending(&mut self, _window: &mut SendWindow<'_>) -> bool {
        false
    }
}
