//! rustls-backed [`TlsEngine`].
//!
//! Bridges rustls's `read_tls`/`write_tls` transport interface onto the
//! context hooks via small `io::Read`/`io::Write` adapters: a hook `Retry`
//! becomes `WouldBlock`, which rustls surfaces back out of
//! `read_tls`/`write_tls` unchanged. Certificate and hostname verification
//! stay rustls's own (configure a custom `ServerCertVerifier` on the
//! `ClientConfig` to intercept them).

use std::io::{self, Read as _, Write as _};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};

use crate::error::BucketError;
use crate::tls::engine::{EngineError, EngineIo, HookError, TlsEngine};
use crate::tls::init_tls_once;

struct HookReader<'a, 'b>(&'a mut EngineIo<'b>);

impl io::Read for HookReader<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.underlying_read(buf) {
            Ok(n) => Ok(n),
            Err(HookError::Retry) => Err(io::ErrorKind::WouldBlock.into()),
            Err(HookError::Failed) => Err(io::Error::other("transport read failed")),
        }
    }
}

struct HookWriter<'a, 'b>(&'a mut EngineIo<'b>);

impl io::Write for HookWriter<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.underlying_write(buf) {
            Ok(n) => Ok(n),
            Err(HookError::Retry) => Err(io::ErrorKind::WouldBlock.into()),
            Err(HookError::Failed) => Err(io::Error::other("transport write failed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A client-side TLS engine over [`rustls::ClientConnection`].
pub struct RustlsEngine {
    conn: ClientConnection,
}

impl RustlsEngine {
    /// Create a session toward `server_name`. Installs the process-wide
    /// crypto provider on first use.
    pub fn new(
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    ) -> Result<Self, BucketError> {
        init_tls_once(|| {
            let _ = rustls::crypto::ring::default_provider().install_default();
        });
        let conn = ClientConnection::new(config, server_name)
            .map_err(|err| BucketError::Engine(err.to_string()))?;
        Ok(RustlsEngine { conn })
    }

    /// Move queued ciphertext (handshake records, alerts, data) into the
    /// pending aggregate.
    fn flush_output(&mut self, io: &mut EngineIo<'_>) -> Result<(), EngineError> {
        while self.conn.wants_write() {
            let mut writer = HookWriter(&mut *io);
            match self.conn.write_tls(&mut writer) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Err(EngineError::WantWrite)
                }
                Err(_) => return Err(EngineError::Syscall),
            }
        }
        Ok(())
    }

    /// Drive the handshake as far as the transport allows.
    fn advance(&mut self, io: &mut EngineIo<'_>) -> Result<(), EngineError> {
        loop {
            self.flush_output(io)?;
            if !self.conn.is_handshaking() {
                return Ok(());
            }
            let mut reader = HookReader(&mut *io);
            match self.conn.read_tls(&mut reader) {
                Ok(0) => return Err(EngineError::Syscall),
                Ok(_) => {
                    self.conn
                        .process_new_packets()
                        .map_err(|err| EngineError::Fatal(err.to_string()))?;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Err(EngineError::WantRead)
                }
                Err(_) => return Err(EngineError::Syscall),
            }
        }
    }
}

impl TlsEngine for RustlsEngine {
    fn write_plaintext(&mut self, io: &mut EngineIo<'_>, data: &[u8]) -> Result<usize, EngineError> {
        self.advance(io)?;
        let n = self
            .conn
            .writer()
            .write(data)
            .map_err(|err| EngineError::Fatal(err.to_string()))?;
        self.flush_output(io)?;
        Ok(n)
    }

    fn read_plaintext(
        &mut self,
        io: &mut EngineIo<'_>,
        buf: &mut [u8],
    ) -> Result<usize, EngineError> {
        loop {
            self.flush_output(io)?;
            match self.conn.reader().read(buf) {
                Ok(0) => return Err(EngineError::Closed),
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    let mut reader = HookReader(&mut *io);
                    match self.conn.read_tls(&mut reader) {
                        Ok(0) => return Err(EngineError::Syscall),
                        Ok(_) => {
                            let state = self
                                .conn
                                .process_new_packets()
                                .map_err(|err| EngineError::Fatal(err.to_string()))?;
                            if state.peer_has_closed() && state.plaintext_bytes_to_read() == 0 {
                                return Err(EngineError::Closed);
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            return Err(EngineError::WantRead)
                        }
                        Err(_) => return Err(EngineError::Syscall),
                    }
                }
                Err(err) => return Err(EngineError::Fatal(err.to_string())),
            }
        }
    }

    fn in_handshake(&self) -> bool {
        self.conn.is_handshaking()
    }
}
