use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use thiserror::Error;

/// Errors surfaced through the bucket read protocol.
///
/// Transient conditions (`Again`, `Eof`, `WaitConn`) are not errors; they
/// travel in [`ReadStatus`](crate::bucket::ReadStatus). Everything here is
/// either a parse/framing failure (the bucket is dead once it has returned
/// one) or a fatal TLS failure (latched; every later read returns it).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BucketError {
    /// The peer closed the stream before the declared body was complete.
    #[error("truncated http response")]
    TruncatedHttpResponse,
    /// The status line is not of the form `HTTP/d.d ddd ...`.
    #[error("malformed http response")]
    BadResponse,
    /// A header line has no `:` separator or an unparseable value.
    #[error("malformed http header")]
    BadHeader,
    /// A status or header line exceeded [`LINE_LIMIT`](crate::line::LINE_LIMIT).
    #[error("line exceeds the line-length limit")]
    LineTooLong,
    /// The TLS engine failed while still handshaking.
    #[error("tls setup failed")]
    SslSetupFailed,
    /// The TLS engine failed after the handshake completed.
    #[error("tls communication failed")]
    SslCommFailed,
    /// The peer certificate was rejected and no callback overrode it.
    #[error("server certificate rejected")]
    SslCertFailed,
    /// The peer requested a mid-connection renegotiation while pipelining.
    #[error("tls renegotiation in progress")]
    SslNegotiateInProgress,
    /// The OCSP responder reported an error for the request.
    #[error("ocsp responder error")]
    OcspResponderError,
    /// The OCSP responder asked us to retry later.
    #[error("ocsp responder busy, try later")]
    OcspResponderTryLater,
    /// The OCSP responder failed in an unrecognized way.
    #[error("ocsp responder unknown failure")]
    OcspResponderUnknownFailure,
    /// Fatal detail reported by the TLS engine itself.
    #[error("tls engine: {0}")]
    Engine(String),
}

impl BucketError {
    /// Stable numeric identity for callers that dispatch on codes.
    pub fn code(&self) -> u32 {
        match self {
            BucketError::TruncatedHttpResponse => 100,
            BucketError::BadResponse => 101,
            BucketError::BadHeader => 102,
            BucketError::LineTooLong => 103,
            BucketError::SslSetupFailed => 120,
            BucketError::SslCommFailed => 121,
            BucketError::SslCertFailed => 122,
            BucketError::SslNegotiateInProgress => 123,
            BucketError::OcspResponderError => 130,
            BucketError::OcspResponderTryLater => 131,
            BucketError::OcspResponderUnknownFailure => 132,
            BucketError::Engine(_) => 190,
        }
    }
}

/// Bitmask of certificate verification failures accumulated during a
/// handshake. Passed to the server-cert callback so the application can
/// decide whether to proceed.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct CertFailures(u32);

impl CertFailures {
    pub const NOT_YET_VALID: CertFailures = CertFailures(1 << 0);
    pub const EXPIRED: CertFailures = CertFailures(1 << 1);
    pub const SELF_SIGNED: CertFailures = CertFailures(1 << 2);
    pub const UNKNOWN_CA: CertFailures = CertFailures(1 << 3);
    pub const REVOKED: CertFailures = CertFailures(1 << 4);
    pub const UNABLE_TO_GET_CRL: CertFailures = CertFailures(1 << 5);
    pub const INVALID_HOST: CertFailures = CertFailures(1 << 6);
    pub const UNKNOWN_FAILURE: CertFailures = CertFailures(1 << 7);
    pub const OCSP_RESPONDER_ERROR: CertFailures = CertFailures(1 << 8);
    pub const OCSP_RESPONDER_TRYLATER: CertFailures = CertFailures(1 << 9);
    pub const OCSP_RESPONDER_UNKNOWN_FAILURE: CertFailures = CertFailures(1 << 10);

    /// True when no failure bit is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`.
    pub const fn contains(self, other: CertFailures) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bit representation.
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for CertFailures {
    type Output = CertFailures;

    fn bitor(self, rhs: CertFailures) -> CertFailures {
        CertFailures(self.0 | rhs.0)
    }
}

impl BitOrAssign for CertFailures {
    fn bitor_assign(&mut self, rhs: CertFailures) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for CertFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CertFailures({:#b})", self.0)
    }
}
