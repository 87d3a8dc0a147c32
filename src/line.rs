//! Line scanning and the incremental line buffer.
//!
//! `scan_line` is the shared terminator scanner behind every in-memory
//! `readline`. `LineBuffer` accumulates one logical line across reads of a
//! streaming bucket, tolerating CR, LF and CRLF endings and a CRLF split
//! across two arrivals.

use crate::bucket::{Bucket, NewlineFound, NewlineSet, ReadStatus};
use crate::error::BucketError;

/// Limit on the length of a status or header line.
pub const LINE_LIMIT: usize = 8000;

/// Scan `visible` for the earliest acceptable terminator.
///
/// Returns how many bytes belong to the line (terminator included) and
/// which terminator was found. Unacceptable terminator kinds are scanned
/// through. When the data ends exactly on a CR and CRLF is acceptable,
/// the CR is consumed and [`NewlineFound::CrlfSplit`] is reported so the
/// caller can resolve the pair on the next read.
pub fn scan_line(visible: &[u8], acceptable: NewlineSet) -> (usize, NewlineFound) {
    let mut i = 0;
    while i < visible.len() {
        match visible[i] {
            b'\n' if acceptable.contains(NewlineSet::LF) => {
                return (i + 1, NewlineFound::Lf);
            }
            b'\r' => {
                if acceptable.contains(NewlineSet::CRLF) {
                    if i + 1 == visible.len() {
                        return (i + 1, NewlineFound::CrlfSplit);
                    }
                    if visible[i + 1] == b'\n' {
                        return (i + 2, NewlineFound::Crlf);
                    }
                }
                if acceptable.contains(NewlineSet::CR) {
                    return (i + 1, NewlineFound::Cr);
                }
            }
            _ => {}
        }
        i += 1;
    }
    (visible.len(), NewlineFound::None)
}

/// State of a [`LineBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    /// Nothing accumulated.
    Empty,
    /// A prefix of a line is buffered; no terminator yet.
    Partial,
    /// One complete logical line is buffered, terminator stripped.
    Ready,
    /// The terminating CR was consumed; the paired LF (if any) must be
    /// resolved on the next read.
    CrlfSplit,
}

/// Accumulates one logical line at a time from a streaming bucket.
pub struct LineBuffer {
    state: LineState,
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        LineBuffer {
            state: LineState::Empty,
            buf: Vec::new(),
        }
    }

    pub fn state(&self) -> LineState {
        self.state
    }

    /// True when a complete line is available via [`line`](Self::line).
    pub fn is_ready(&self) -> bool {
        self.state == LineState::Ready
    }

    /// The buffered line content, without its terminator. Meaningful in
    /// state `Ready`; a prefix otherwise.
    pub fn line(&self) -> &[u8] {
        &self.buf
    }

    /// Drive the buffer toward one complete line.
    ///
    /// A previously `Ready` line is assumed used and the buffer resets.
    /// Returns the stream's status; the line is complete exactly when
    /// [`is_ready`](Self::is_ready) afterwards. A stream that reports
    /// `Eof` while the buffer waits on a split CRLF completes the line as
    /// CR-terminated, since the LF can never arrive.
    pub fn fetch(
        &mut self,
        stream: &mut dyn Bucket,
        acceptable: NewlineSet,
    ) -> Result<ReadStatus, BucketError> {
        if self.state == LineState::Ready {
            self.state = LineState::Empty;
            self.buf.clear();
        }

        loop {
            if self.state == LineState::CrlfSplit {
                let consume_lf = {
                    let (data, status) = stream.peek()?;
                    if data.is_empty() {
                        if status != ReadStatus::Eof {
                            return Ok(ReadStatus::Again);
                        }
                        // Lone CR at stream end: the CR terminated the line.
                        None
                    } else {
                        Some(data[0] == b'\n')
                    }
                };
                if consume_lf == Some(true) {
                    let _ = stream.read(1)?;
                }
                // Any other first byte belongs to the next reader.
                self.state = LineState::Ready;
                return Ok(ReadStatus::Ok);
            }

            let (data, found, status) = stream.readline(acceptable)?;
            let keep = match found {
                NewlineFound::None => data.len(),
                NewlineFound::Crlf => data.len() - 2,
                _ => data.len() - 1,
            };
            if self.buf.len() + keep > LINE_LIMIT {
                return Err(BucketError::LineTooLong);
            }
            self.buf.extend_from_slice(&data[..keep]);

            self.state = match found {
                NewlineFound::None => LineState::Partial,
                NewlineFound::CrlfSplit => LineState::CrlfSplit,
                _ => LineState::Ready,
            };

            if self.state == LineState::CrlfSplit && status == ReadStatus::Eof {
                self.state = LineState::Ready;
            }
            if status != ReadStatus::Ok || self.state == LineState::Ready {
                return Ok(status);
            }
            // Stream said "read again" and the line is incomplete: loop.
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        LineBuffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple::SimpleBucket;

    #[test]
    fn scan_crlf() {
        let (n, found) = scan_line(b"line1\r\nline2", NewlineSet::CRLF);
        assert_eq!(n, 7);
        assert_eq!(found, NewlineFound::Crlf);
    }

    #[test]
    fn scan_unacceptable_kinds_are_skipped() {
        // CRLF-only scan runs through a bare LF.
        let (n, found) = scan_line(b"line1\nline2", NewlineSet::CRLF);
        assert_eq!(n, 11);
        assert_eq!(found, NewlineFound::None);

        // LF-only scan runs through the CR and stops on the LF.
        let (n, found) = scan_line(b"line1\r\n", NewlineSet::LF);
        assert_eq!(n, 7);
        assert_eq!(found, NewlineFound::Lf);

        // CR-only scan stops on the CR of a CRLF.
        let (n, found) = scan_line(b"line1\r\n", NewlineSet::CR);
        assert_eq!(n, 6);
        assert_eq!(found, NewlineFound::Cr);
    }

    #[test]
    fn scan_split_crlf_at_end() {
        let (n, found) = scan_line(b"line1\r", NewlineSet::CRLF);
        assert_eq!(n, 6);
        assert_eq!(found, NewlineFound::CrlfSplit);

        // CR mid-buffer followed by a non-LF byte is not a CRLF.
        let (n, found) = scan_line(b"a\rb", NewlineSet::CRLF);
        assert_eq!(n, 3);
        assert_eq!(found, NewlineFound::None);
    }

    #[test]
    fn fetch_accumulates_one_line() {
        let mut bkt = SimpleBucket::from_static(b"alpha\r\nbeta\r\n");
        let mut lines = LineBuffer::new();

        let status = lines.fetch(&mut bkt, NewlineSet::ANY).unwrap();
        assert_eq!(status, ReadStatus::Ok);
        assert!(lines.is_ready());
        assert_eq!(lines.line(), b"alpha");

        lines.fetch(&mut bkt, NewlineSet::ANY).unwrap();
        assert!(lines.is_ready());
        assert_eq!(lines.line(), b"beta");
    }

    #[test]
    fn fetch_resolves_lone_cr_at_eof() {
        let mut bkt = SimpleBucket::from_static(b"alpha\r");
        let mut lines = LineBuffer::new();

        lines.fetch(&mut bkt, NewlineSet::ANY).unwrap();
        assert!(lines.is_ready());
        assert_eq!(lines.line(), b"alpha");
    }

    #[test]
    fn fetch_rejects_oversized_line() {
        let big = vec![b'x'; LINE_LIMIT + 1];
        let mut bkt = SimpleBucket::own(big);
        let mut lines = LineBuffer::new();
        assert_eq!(
            lines.fetch(&mut bkt, NewlineSet::ANY).unwrap_err(),
            BucketError::LineTooLong
        );
    }
}
