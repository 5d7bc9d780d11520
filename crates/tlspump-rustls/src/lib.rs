//! rustls engine adapter.
//!
//! [`RustlsEngine`] wraps a [`rustls::Connection`] behind the tlspump
//! [`Engine`] contract so an endpoint can drive a real TLS session. rustls
//! keeps its own record buffers; this adapter translates between them and the
//! caller's slices and derives the result codes the pumps act on.
//!
//! # Status mapping
//!
//! | rustls state                                  | handshake status |
//! |-----------------------------------------------|------------------|
//! | handshaking, `wants_write()`                  | `NeedWrap`       |
//! | handshaking, nothing to send                  | `NeedUnwrap`     |
//! | stopped handshaking during this call          | `Finished`       |
//! | otherwise                                     | `NotHandshaking` |
//!
//! rustls never hands out delegated work, so `NeedTask` does not occur.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use rustls::{
    ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection,
    pki_types::ServerName,
};
use tlspump_core::{
    DelegatedTask, Engine, EngineError, EngineResult, HandshakeStatus, Status,
};
use tracing::debug;

/// Reported plaintext buffer size.
pub const PLAINTEXT_HINT: usize = 16_704;

/// Reported ciphertext buffer size: one plaintext buffer plus the five byte
/// record header.
pub const CIPHERTEXT_HINT: usize = PLAINTEXT_HINT + 5;

/// [`Engine`] backed by a rustls connection.
pub struct RustlsEngine {
    conn: Connection,
    outbound_closed: bool,
    peer_closed: bool,
}

impl RustlsEngine {
    /// Client engine that will authenticate `server_name`.
    pub fn client(
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    ) -> Result<Self, EngineError> {
        let conn = ClientConnection::new(config, server_name)
            .map_err(|err| EngineError::Construction(err.to_string()))?;
        Ok(Self::from_connection(conn.into()))
    }

    /// Server engine.
    pub fn server(config: Arc<ServerConfig>) -> Result<Self, EngineError> {
        let conn = ServerConnection::new(config)
            .map_err(|err| EngineError::Construction(err.to_string()))?;
        Ok(Self::from_connection(conn.into()))
    }

    fn from_connection(conn: Connection) -> Self {
        Self { conn, outbound_closed: false, peer_closed: false }
    }

    /// Underlying connection, e.g. for the negotiated protocol version.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn handshake_status(&self, was_handshaking: bool) -> HandshakeStatus {
        if self.conn.is_handshaking() {
            if self.conn.wants_write() {
                HandshakeStatus::NeedWrap
            } else {
                HandshakeStatus::NeedUnwrap
            }
        } else if was_handshaking {
            HandshakeStatus::Finished
        } else {
            HandshakeStatus::NotHandshaking
        }
    }

    /// Feed `src` to rustls. Returns the number of bytes it took.
    fn read_records(&mut self, src: &[u8]) -> Result<usize, EngineError> {
        let mut consumed = 0;
        while consumed < src.len() && self.conn.wants_read() {
            let mut rest = &src[consumed..];
            let n = self.conn.read_tls(&mut rest).map_err(EngineError::protocol)?;
            if n == 0 {
                break;
            }
            consumed += n;
            let state = self.conn.process_new_packets().map_err(EngineError::protocol)?;
            if state.plaintext_bytes_to_read() > 0 || state.peer_has_closed() {
                break;
            }
        }
        Ok(consumed)
    }

    /// Copy decrypted bytes into `dst`. Returns the count and whether the
    /// peer's close notification has been read.
    fn read_plaintext(&mut self, dst: &mut [u8]) -> Result<(usize, bool), EngineError> {
        let mut produced = 0;
        while produced < dst.len() {
            match self.conn.reader().read(&mut dst[produced..]) {
                Ok(0) => return Ok((produced, true)),
                Ok(n) => produced += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(EngineError::protocol(err)),
            }
        }
        Ok((produced, false))
    }

    /// Move queued records into `dst`. Returns the number of bytes written.
    fn write_records(&mut self, dst: &mut [u8]) -> Result<usize, EngineError> {
        let mut produced = 0;
        while self.conn.wants_write() && produced < dst.len() {
            let mut rest = &mut dst[produced..];
            let n = self.conn.write_tls(&mut rest).map_err(EngineError::protocol)?;
            if n == 0 {
                break;
            }
            produced += n;
        }
        Ok(produced)
    }
}

impl std::fmt::Debug for RustlsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsEngine")
            .field("handshaking", &self.conn.is_handshaking())
            .field("outbound_closed", &self.outbound_closed)
            .field("peer_closed", &self.peer_closed)
            .finish_non_exhaustive()
    }
}

impl Engine for RustlsEngine {
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        let was_handshaking = self.conn.is_handshaking();

        let mut consumed = 0;
        if !src.is_empty() && !was_handshaking && !self.outbound_closed {
            consumed = self.conn.writer().write(src).map_err(EngineError::protocol)?;
        }

        let pending_before = self.conn.wants_write();
        let produced = self.write_records(dst)?;
        let handshake_status = self.handshake_status(was_handshaking);

        let status = if pending_before && produced == 0 {
            Status::BufferOverflow
        } else if self.outbound_closed && !self.conn.wants_write() {
            Status::Closed
        } else {
            Status::Ok
        };

        Ok(EngineResult {
            status,
            handshake_status,
            bytes_consumed: consumed,
            bytes_produced: produced,
        })
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        let was_handshaking = self.conn.is_handshaking();

        let consumed = self.read_records(src)?;
        let state = self.conn.process_new_packets().map_err(EngineError::protocol)?;

        if state.plaintext_bytes_to_read() > 0 && dst.is_empty() {
            return Ok(EngineResult {
                status: Status::BufferOverflow,
                handshake_status: self.handshake_status(was_handshaking),
                bytes_consumed: consumed,
                bytes_produced: 0,
            });
        }

        let (produced, eof) = self.read_plaintext(dst)?;
        if (eof || state.peer_has_closed()) && !self.peer_closed {
            debug!("peer sent close_notify");
            self.peer_closed = true;
        }

        let handshake_status = self.handshake_status(was_handshaking);
        // A full dst may leave plaintext behind; report the close on the call
        // that drains it
        let closed = self.peer_closed && produced < dst.len();

        let status = if closed {
            Status::Closed
        } else if consumed == 0
            && produced == 0
            && handshake_status != HandshakeStatus::NeedWrap
            && handshake_status != HandshakeStatus::Finished
        {
            Status::BufferUnderflow
        } else {
            Status::Ok
        };

        Ok(EngineResult {
            status,
            handshake_status,
            bytes_consumed: consumed,
            bytes_produced: produced,
        })
    }

    fn next_delegated_task(&mut self) -> Option<DelegatedTask> {
        None
    }

    fn close_inbound(&mut self) -> Result<(), EngineError> {
        if self.peer_closed {
            Ok(())
        } else {
            Err(EngineError::Close("inbound closed before close_notify".to_string()))
        }
    }

    fn close_outbound(&mut self) {
        if !self.outbound_closed {
            self.conn.send_close_notify();
            self.outbound_closed = true;
        }
    }

    fn recommended_plaintext_buffer_size(&self) -> usize {
        PLAINTEXT_HINT
    }

    fn recommended_ciphertext_buffer_size(&self) -> usize {
        CIPHERTEXT_HINT
    }
}
