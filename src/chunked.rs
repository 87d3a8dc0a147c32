//! Transfer-Encoding: chunked decoding.
//!
//! `ChunkedDecoder` is the state machine the response bucket drives over
//! its own stream; `ChunkedBucket` wraps a stream and a decoder into a
//! standalone bucket. A stream that ends anywhere before the terminator
//! surfaces [`BucketError::TruncatedHttpResponse`], never `Eof`. The one
//! exception is the optional trailer section, where end-of-stream counts
//! as completion.

use bytes::Bytes;

use crate::bucket::{Bucket, LineResult, PeekResult, ReadResult, ReadStatus};
use crate::config::PipelineConfig;
use crate::error::BucketError;
use crate::headers::HeadersBucket;
use crate::line::{scan_line, LineBuffer};
use crate::{NewlineFound, NewlineSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Reading the `<hex-size> [";" ext]*` line.
    Size,
    /// Serving chunk payload bytes.
    Payload { left: u64 },
    /// Consuming the CRLF that trails a chunk's payload.
    Term,
    /// Reading optional trailer header lines after the zero-size chunk.
    Trailers,
    Done,
}

/// Parse the size line: hex digits up to `;`, space or tab; extensions are
/// ignored. An empty line parses as zero, so a blank line where a size is
/// expected terminates the body.
fn parse_chunk_size(line: &[u8]) -> Result<u64, BucketError> {
    let mut size: u64 = 0;
    for &b in line {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            b';' | b' ' | b'\t' => break,
            _ => return Err(BucketError::BadResponse),
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(u64::from(digit)))
            .ok_or(BucketError::BadResponse)?;
    }
    Ok(size)
}

/// Decodes `<hex-size> CRLF <bytes> CRLF ... 0 CRLF <trailers> CRLF` from
/// a stream the caller supplies on each read. Trailer header lines land in
/// the caller's header map.
pub struct ChunkedDecoder {
    phase: Phase,
    lines: LineBuffer,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        ChunkedDecoder {
            phase: Phase::Size,
            lines: LineBuffer::new(),
        }
    }

    /// True once the terminating chunk and trailers have been consumed.
    pub fn done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Decode up to `max` payload bytes from `stream`. Trailers are merged
    /// into `trailers` as they are parsed. Reports `Eof` exactly once the
    /// terminator state is reached.
    pub fn read(
        &mut self,
        stream: &mut dyn Bucket,
        max: usize,
        trailers: &mut HeadersBucket,
    ) -> ReadResult {
        loop {
            match self.phase {
                Phase::Size => {
                    let status = self.lines.fetch(stream, NewlineSet::ANY)?;
                    if !self.lines.is_ready() {
                        return match status {
                            ReadStatus::Eof => Err(BucketError::TruncatedHttpResponse),
                            other => Ok((Bytes::new(), other)),
                        };
                    }
                    let size = parse_chunk_size(self.lines.line())?;
                    self.phase = if size == 0 {
                        Phase::Trailers
                    } else {
                        Phase::Payload { left: size }
                    };
                }
                Phase::Payload { left } => {
                    let want = max.min(usize::try_from(left).unwrap_or(usize::MAX));
                    let (data, status) = stream.read(want)?;
                    if data.is_empty() {
                        return match status {
                            ReadStatus::Eof => Err(BucketError::TruncatedHttpResponse),
                            other => Ok((Bytes::new(), other)),
                        };
                    }
                    let left = left - data.len() as u64;
                    self.phase = if left == 0 {
                        Phase::Term
                    } else {
                        Phase::Payload { left }
                    };
                    return Ok((data, ReadStatus::Ok));
                }
                Phase::Term => {
                    let status = self.lines.fetch(stream, NewlineSet::ANY)?;
                    if !self.lines.is_ready() {
                        return match status {
                            ReadStatus::Eof => Err(BucketError::TruncatedHttpResponse),
                            other => Ok((Bytes::new(), other)),
                        };
                    }
                    self.phase = Phase::Size;
                }
                Phase::Trailers => {
                    let status = self.lines.fetch(stream, NewlineSet::ANY)?;
                    if !self.lines.is_ready() {
                        return match status {
                            // Trailers are optional; end-of-stream here is
                            // a complete body.
                            ReadStatus::Eof => {
                                self.phase = Phase::Done;
                                Ok((Bytes::new(), ReadStatus::Eof))
                            }
                            other => Ok((Bytes::new(), other)),
                        };
                    }
                    if self.lines.line().is_empty() {
                        self.phase = Phase::Done;
                        return Ok((Bytes::new(), ReadStatus::Eof));
                    }
                    trailers.parse_line(self.lines.line())?;
                }
                Phase::Done => return Ok((Bytes::new(), ReadStatus::Eof)),
            }
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        ChunkedDecoder::new()
    }
}

/// A standalone bucket decoding a chunked stream it owns. Trailer headers
/// are collected and exposed via [`trailers`](ChunkedBucket::trailers).
pub struct ChunkedBucket {
    stream: Box<dyn Bucket>,
    decoder: ChunkedDecoder,
    trailers: HeadersBucket,
    pending: Bytes,
}

impl ChunkedBucket {
    pub fn new(stream: Box<dyn Bucket>) -> Self {
        ChunkedBucket {
            stream,
            decoder: ChunkedDecoder::new(),
            trailers: HeadersBucket::new(),
            pending: Bytes::new(),
        }
    }

    /// Trailer headers seen after the terminating chunk. Complete once the
    /// bucket has reported `Eof`.
    pub fn trailers(&self) -> &HeadersBucket {
        &self.trailers
    }

    fn fill_pending(&mut self) -> Result<ReadStatus, BucketError> {
        if !self.pending.is_empty() {
            return Ok(ReadStatus::Ok);
        }
        if self.decoder.done() {
            return Ok(ReadStatus::Eof);
        }
        let ChunkedBucket {
            stream,
            decoder,
            trailers,
            pending,
        } = self;
        let (data, status) = decoder.read(stream.as_mut(), crate::READ_ALL_AVAIL, trailers)?;
        *pending = data;
        Ok(status)
    }

    fn serve(&mut self, max: usize, status: ReadStatus) -> (Bytes, ReadStatus) {
        let n = max.min(self.pending.len());
        let data = self.pending.split_to(n);
        let status = if self.pending.is_empty() {
            if self.decoder.done() {
                ReadStatus::Eof
            } else if data.is_empty() {
                status
            } else {
                ReadStatus::Ok
            }
        } else {
            ReadStatus::Ok
        };
        (data, status)
    }
}

impl Bucket for ChunkedBucket {
    fn read(&mut self, max: usize) -> ReadResult {
        let status = self.fill_pending()?;
        Ok(self.serve(max, status))
    }

    fn readline(&mut self, acceptable: NewlineSet) -> LineResult {
        let status = self.fill_pending()?;
        if self.pending.is_empty() {
            return Ok((Bytes::new(), NewlineFound::None, status));
        }
        let (n, found) = scan_line(&self.pending, acceptable);
        let (data, status) = self.serve(n, status);
        Ok((data, found, status))
    }

    fn peek(&mut self) -> PeekResult<'_> {
        let _ = self.fill_pending()?;
        let status = if self.decoder.done() {
            ReadStatus::Eof
        } else {
            ReadStatus::Ok
        };
        Ok((&self.pending, status))
    }

    fn set_config(&mut self, config: &PipelineConfig) {
        self.stream.set_config(config);
    }
}
