//! A no-cryptography engine speaking a tiny record protocol.
//!
//! Frames plaintext as `type(1) length(2, BE) payload` records and runs a
//! one-round HELLO exchange before any data moves, so the coupled-pipeline
//! choreography (want-read during a plaintext write, re-entrant reads of
//! the decrypt source, pending-ciphertext draining) behaves exactly like a
//! real engine's. Used by the test suites and as a plaintext passthrough.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::CertFailures;
use crate::tls::engine::{
    CertView, ClientIdentity, EngineError, EngineIo, HookError, OcspResponderStatus, TlsEngine,
};

const RECORD_HELLO: u8 = 1;
const RECORD_DATA: u8 = 2;
const RECORD_SHUTDOWN: u8 = 3;
const RECORD_RENEG: u8 = 4;

const MAX_RECORD: usize = u16::MAX as usize;

fn record(kind: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_RECORD);
    let mut out = Vec::with_capacity(3 + payload.len());
    out.push(kind);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Try to parse one record from `buf`; returns (kind, payload, consumed).
fn parse_record(buf: &[u8]) -> Option<(u8, Bytes, usize)> {
    if buf.len() < 3 {
        return None;
    }
    let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
    if buf.len() < 3 + len {
        return None;
    }
    Some((buf[0], Bytes::copy_from_slice(&buf[3..3 + len]), 3 + len))
}

#[derive(Clone)]
struct ScriptedCert {
    engine_valid: bool,
    failures: CertFailures,
    common_name: Option<Vec<u8>>,
    alt_names: Vec<Vec<u8>>,
}

/// Record-framing [`TlsEngine`] without encryption.
pub struct NullEngine {
    hello_sent: bool,
    hello_received: bool,
    closed: bool,
    /// Partial inbound record bytes.
    inbuf: BytesMut,
    /// Decoded payload the caller's buffer could not hold yet.
    plain: Bytes,
    peer_cert: Option<ScriptedCert>,
    ocsp: Option<OcspResponderStatus>,
    wants_client_cert: bool,
    client_identity: Option<ClientIdentity>,
}

impl NullEngine {
    pub fn new() -> Self {
        NullEngine {
            hello_sent: false,
            hello_received: false,
            closed: false,
            inbuf: BytesMut::new(),
            plain: Bytes::new(),
            peer_cert: None,
            ocsp: None,
            wants_client_cert: false,
            client_identity: None,
        }
    }

    /// Script the peer certificate presented during the HELLO exchange.
    pub fn with_peer_cert(
        mut self,
        engine_valid: bool,
        failures: CertFailures,
        common_name: Option<&[u8]>,
        alt_names: &[&[u8]],
    ) -> Self {
        self.peer_cert = Some(ScriptedCert {
            engine_valid,
            failures,
            common_name: common_name.map(<[u8]>::to_vec),
            alt_names: alt_names.iter().map(|n| n.to_vec()).collect(),
        });
        self
    }

    /// Script a stapled OCSP responder status.
    pub fn with_ocsp(mut self, status: OcspResponderStatus) -> Self {
        self.ocsp = Some(status);
        self
    }

    /// Script a client-certificate request during the handshake.
    pub fn request_client_cert(mut self) -> Self {
        self.wants_client_cert = true;
        self
    }

    /// The peer's HELLO record, for priming a scripted transport.
    pub fn hello_record() -> Vec<u8> {
        record(RECORD_HELLO, b"")
    }

    /// A data record carrying `payload`.
    pub fn data_record(payload: &[u8]) -> Vec<u8> {
        record(RECORD_DATA, payload)
    }

    /// A clean-shutdown record.
    pub fn shutdown_record() -> Vec<u8> {
        record(RECORD_SHUTDOWN, b"")
    }

    /// A mid-connection renegotiation request.
    pub fn reneg_record() -> Vec<u8> {
        record(RECORD_RENEG, b"")
    }

    /// Credentials resolved for the peer's client-cert request, if any.
    pub fn client_identity(&self) -> Option<&ClientIdentity> {
        self.client_identity.as_ref()
    }

    fn emit(&mut self, io: &mut EngineIo<'_>, rec: &[u8]) -> Result<(), EngineError> {
        match io.underlying_write(rec) {
            Ok(_) => Ok(()),
            Err(HookError::Retry) => Err(EngineError::WantWrite),
            Err(HookError::Failed) => Err(EngineError::Syscall),
        }
    }

    fn next_record(&mut self, io: &mut EngineIo<'_>) -> Result<(u8, Bytes), EngineError> {
        loop {
            if let Some((kind, payload, consumed)) = parse_record(&self.inbuf) {
                self.inbuf.advance(consumed);
                return Ok((kind, payload));
            }
            let mut tmp = [0u8; 4096];
            match io.underlying_read(&mut tmp) {
                Ok(n) => self.inbuf.extend_from_slice(&tmp[..n]),
                Err(HookError::Retry) => return Err(EngineError::WantRead),
                Err(HookError::Failed) => return Err(EngineError::Syscall),
            }
        }
    }

    fn ensure_handshake(&mut self, io: &mut EngineIo<'_>) -> Result<(), EngineError> {
        if !self.hello_sent {
            let rec = record(RECORD_HELLO, b"");
            self.emit(io, &rec)?;
            self.hello_sent = true;
        }
        while !self.hello_received {
            let (kind, _payload) = self.next_record(io)?;
            if kind != RECORD_HELLO {
                return Err(EngineError::Fatal(format!(
                    "unexpected record {kind} during handshake"
                )));
            }
            self.hello_received = true;

            if let Some(cert) = &self.peer_cert {
                let view = CertView {
                    depth: 0,
                    common_name: cert.common_name.as_deref(),
                    alt_names: &cert.alt_names,
                };
                if !io.verify_server_cert(cert.engine_valid, cert.failures, &view) {
                    return Err(EngineError::Fatal(
                        "certificate verification failed".into(),
                    ));
                }
            }
            if let Some(status) = self.ocsp {
                if !io.ocsp_result(status) {
                    return Err(EngineError::Fatal("ocsp status rejected".into()));
                }
            }
            if self.wants_client_cert {
                self.client_identity = io.client_cert();
            }
        }
        Ok(())
    }
}

impl Default for NullEngine {
    fn default() -> Self {
        NullEngine::new()
    }
}

impl TlsEngine for NullEngine {
    fn write_plaintext(&mut self, io: &mut EngineIo<'_>, data: &[u8]) -> Result<usize, EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        self.ensure_handshake(io)?;
        let n = data.len().min(MAX_RECORD);
        let rec = record(RECORD_DATA, &data[..n]);
        self.emit(io, &rec)?;
        Ok(n)
    }

    fn read_plaintext(
        &mut self,
        io: &mut EngineIo<'_>,
        buf: &mut [u8],
    ) -> Result<usize, EngineError> {
        if !self.plain.is_empty() {
            let n = buf.len().min(self.plain.len());
            buf[..n].copy_from_slice(&self.plain[..n]);
            self.plain.advance(n);
            return Ok(n);
        }
        if self.closed {
            return Err(EngineError::Closed);
        }
        self.ensure_handshake(io)?;
        loop {
            let (kind, payload) = self.next_record(io)?;
            match kind {
                RECORD_DATA => {
                    if payload.is_empty() {
                        continue;
                    }
                    let n = buf.len().min(payload.len());
                    buf[..n].copy_from_slice(&payload[..n]);
                    self.plain = payload.slice(n..);
                    return Ok(n);
                }
                RECORD_SHUTDOWN => {
                    self.closed = true;
                    return Err(EngineError::Closed);
                }
                RECORD_HELLO | RECORD_RENEG => {
                    io.renegotiation_requested();
                    if io.renegotiation_latched() {
                        // Policy latched the fatal error; bail out through
                        // the failing-hook path.
                        return Err(EngineError::Syscall);
                    }
                    // Renegotiation allowed: treat as a transparent rekey.
                }
                other => {
                    return Err(EngineError::Fatal(format!("unknown record type {other}")))
                }
            }
        }
    }

    fn in_handshake(&self) -> bool {
        !(self.hello_sent && self.hello_received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip() {
        let rec = record(RECORD_DATA, b"payload");
        let (kind, payload, consumed) = parse_record(&rec).unwrap();
        assert_eq!(kind, RECORD_DATA);
        assert_eq!(&payload[..], b"payload");
        assert_eq!(consumed, rec.len());
    }

    #[test]
    fn partial_records_need_more_bytes() {
        let rec = record(RECORD_DATA, b"payload");
        assert!(parse_record(&rec[..2]).is_none());
        assert!(parse_record(&rec[..5]).is_none());
    }
}
