//! bucketline: lazy, composable, streaming byte pipelines for parsing
//! and emitting network protocol data (primarily HTTP/1.1 over TLS).
//!
//! A [`Bucket`] is a polymorphic source of bytes read incrementally by a
//! single-threaded, non-blocking I/O loop: operations return partial
//! results and `Again`/`WaitConn` statuses instead of suspending. Buckets
//! compose: concatenate them with an [`AggregateBucket`], parse an HTTP
//! response out of one with a [`ResponseBucket`], or bridge a TLS engine
//! between two of them with a [`TlsContext`] pair.
//!
//! # Reading an HTTPS response
//!
//! ```text
//! socket_source -> TlsDecrypt -> ResponseBucket -> application
//! request_stream -> TlsEncrypt -> socket_sink
//! ```
//!
//! ```rust
//! use bucketline::{Bucket, ReadStatus, ResponseBucket, SimpleBucket, READ_ALL_AVAIL};
//!
//! let raw = SimpleBucket::from_static(
//!     b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\nabc1234",
//! );
//! let mut response = ResponseBucket::new(Box::new(raw));
//!
//! let mut body = Vec::new();
//! loop {
//!     let (data, status) = response.read(READ_ALL_AVAIL).unwrap();
//!     body.extend_from_slice(&data);
//!     match status {
//!         ReadStatus::Eof => break,
//!         _ => continue,
//!     }
//! }
//! assert_eq!(body, b"abc1234");
//! assert_eq!(response.status().unwrap().unwrap().code, 200);
//! ```

pub mod aggregate;
pub mod alloc;
pub mod bucket;
pub mod chunked;
pub mod config;
pub mod databuf;
pub mod error;
pub mod headers;
pub mod iovec;
pub mod line;
pub mod mock;
pub mod response;
pub mod simple;
pub mod tls;

// ── Re-exports: read protocol ───────────────────────────────────────────

/// The universal bucket contract.
pub use bucket::Bucket;
/// Terminator kind reported by `readline`.
pub use bucket::NewlineFound;
/// Acceptable-terminator mask for `readline`.
pub use bucket::NewlineSet;
/// Flow-control status accompanying every read.
pub use bucket::ReadStatus;
/// Read whatever is immediately available.
pub use bucket::READ_ALL_AVAIL;

// ── Re-exports: errors ──────────────────────────────────────────────────

/// All errors surfaced through the read protocol.
pub use error::BucketError;
/// Certificate verification failure bitmask.
pub use error::CertFailures;

// ── Re-exports: buckets ─────────────────────────────────────────────────

/// Ordered queue of child buckets.
pub use aggregate::AggregateBucket;
/// Per-pipeline buffer allocator.
pub use alloc::BucketAlloc;
/// Standalone chunked-transfer decoder bucket.
pub use chunked::ChunkedBucket;
/// Per-connection configuration.
pub use config::PipelineConfig;
/// Ordered, case-insensitive header multimap.
pub use headers::HeadersBucket;
/// Bucket over a fixed vector of byte ranges.
pub use iovec::IovecBucket;
/// Scripted source for tests.
pub use mock::MockBucket;
/// HTTP/1.x response parser bucket.
pub use response::ResponseBucket;
/// Parsed response status line.
pub use response::StatusLine;
/// Bucket over one contiguous byte range.
pub use simple::SimpleBucket;

// ── Re-exports: TLS ─────────────────────────────────────────────────────

/// No-cryptography record-framing engine.
pub use tls::NullEngine;
/// Shared TLS session handle.
pub use tls::TlsContext;
/// Ciphertext-out bucket (plaintext in).
pub use tls::TlsEncrypt;
/// Plaintext-out bucket (ciphertext in).
pub use tls::TlsDecrypt;
/// The engine seam.
pub use tls::TlsEngine;
/// rustls-backed engine adapter.
#[cfg(feature = "tls")]
pub use tls::RustlsEngine;
