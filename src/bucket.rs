//! The universal bucket read protocol.
//!
//! A bucket is a polymorphic source of bytes read incrementally by a
//! non-blocking loop. Operations never block; when a bucket cannot make
//! progress it returns [`ReadStatus::Again`] (or [`ReadStatus::WaitConn`]
//! when it is blocked on the other half of a duplex) and the caller retries
//! on the next loop iteration. Returned data is an owned [`Bytes`] view;
//! `peek` hands out a borrow that the borrow checker keeps valid until the
//! next operation.

use bytes::Bytes;

use crate::config::PipelineConfig;
use crate::error::BucketError;

/// Pass as `max` to read whatever is immediately available.
pub const READ_ALL_AVAIL: usize = usize::MAX;

/// Flow-control status accompanying every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Data was (or may immediately be) available; read again.
    Ok,
    /// Nothing right now; retry later.
    Again,
    /// No more data, ever.
    Eof,
    /// Blocked until the other end of the duplex makes progress
    /// (e.g. TLS must write handshake bytes before it can read).
    WaitConn,
}

impl ReadStatus {
    /// True for `Eof`.
    pub fn is_eof(self) -> bool {
        self == ReadStatus::Eof
    }
}

/// Which line terminators a `readline` call accepts.
///
/// Terminator kinds outside the set are scanned through, never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewlineSet(u8);

impl NewlineSet {
    /// Accept a bare carriage return.
    pub const CR: NewlineSet = NewlineSet(1 << 0);
    /// Accept a bare line feed.
    pub const LF: NewlineSet = NewlineSet(1 << 1);
    /// Accept the two-byte CRLF sequence.
    pub const CRLF: NewlineSet = NewlineSet(1 << 2);
    /// Accept any of the above.
    pub const ANY: NewlineSet = NewlineSet(1 << 0 | 1 << 1 | 1 << 2);

    /// True when every kind in `other` is acceptable.
    pub const fn contains(self, other: NewlineSet) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for NewlineSet {
    type Output = NewlineSet;

    fn bitor(self, rhs: NewlineSet) -> NewlineSet {
        NewlineSet(self.0 | rhs.0)
    }
}

/// The terminator (if any) a `readline` call found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewlineFound {
    /// No acceptable terminator in the returned data.
    None,
    /// Terminated by a bare CR.
    Cr,
    /// Terminated by a bare LF.
    Lf,
    /// Terminated by CRLF.
    Crlf,
    /// The data ended exactly on a CR and CRLF is acceptable; call again
    /// to learn whether the next byte is the matching LF. A control
    /// signal, not a terminator kind.
    CrlfSplit,
}

/// Result of [`Bucket::read`]: data plus its flow-control status.
/// Empty data is legal only with `Again`, `Eof` or `WaitConn`.
pub type ReadResult = Result<(Bytes, ReadStatus), BucketError>;

/// Result of [`Bucket::readline`]: data (terminator included when found),
/// the terminator kind, and the flow-control status.
pub type LineResult = Result<(Bytes, NewlineFound, ReadStatus), BucketError>;

/// Result of [`Bucket::peek`]: the currently visible bytes and `Ok` if
/// more may follow or `Eof` if what is shown is all there is.
pub type PeekResult<'a> = Result<(&'a [u8], ReadStatus), BucketError>;

/// A streaming byte source.
///
/// Buckets are single-ownership: the consumer holds the bucket and drops it
/// exactly once, which recursively drops any children it owns. Buckets are
/// not shareable across concurrent readers. Once a bucket has reported
/// `Eof`, every subsequent operation reports `Eof` with no data.
pub trait Bucket {
    /// Return up to `max` bytes ([`READ_ALL_AVAIL`] for "whatever is
    /// immediately available"). Never returns more than `max`.
    fn read(&mut self, max: usize) -> ReadResult;

    /// Scan for a line ending from `acceptable`. The returned data
    /// includes the terminator when one was found.
    fn readline(&mut self, acceptable: NewlineSet) -> LineResult;

    /// Show currently visible bytes without advancing.
    fn peek(&mut self) -> PeekResult<'_>;

    /// Like `read`, but may append several non-contiguous ranges to `out`,
    /// bounded by `max` total bytes and `max_vecs` ranges. The default
    /// performs a single `read`.
    fn read_iovec(
        &mut self,
        max: usize,
        max_vecs: usize,
        out: &mut Vec<Bytes>,
    ) -> Result<ReadStatus, BucketError> {
        if max == 0 || max_vecs == 0 {
            return Ok(ReadStatus::Ok);
        }
        let (data, status) = self.read(max)?;
        if !data.is_empty() {
            out.push(data);
        }
        Ok(status)
    }

    /// Propagate per-connection configuration. Best effort; the default
    /// does nothing.
    fn set_config(&mut self, _config: &PipelineConfig) {}
}

impl Bucket for Box<dyn Bucket> {
    fn read(&mut self, max: usize) -> ReadResult {
        (**self).read(max)
    }

    fn readline(&mut self, acceptable: NewlineSet) -> LineResult {
        (**self).readline(acceptable)
    }

    fn peek(&mut self) -> PeekResult<'_> {
        (**self).peek()
    }

    fn read_iovec(
        &mut self,
        max: usize,
        max_vecs: usize,
        out: &mut Vec<Bytes>,
    ) -> Result<ReadStatus, BucketError> {
        (**self).read_iovec(max, max_vecs, out)
    }

    fn set_config(&mut self, config: &PipelineConfig) {
        (**self).set_config(config)
    }
}
