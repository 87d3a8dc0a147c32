//! The HTTP/1.x response parser bucket.
//!
//! Layers a status-line/header/body state machine over a raw byte stream.
//! Every observable suspension is "advance as far as possible, return
//! `Again`, resume where we left off": the parser is a hand-written
//! machine, driven one line at a time by a [`LineBuffer`].

use bytes::Bytes;
use log::{debug, trace};

use crate::aggregate::AggregateBucket;
use crate::bucket::{Bucket, LineResult, PeekResult, ReadResult, ReadStatus};
use crate::chunked::ChunkedDecoder;
use crate::config::PipelineConfig;
use crate::error::BucketError;
use crate::headers::HeadersBucket;
use crate::line::{scan_line, LineBuffer};
use crate::simple::SimpleBucket;
use crate::{NewlineFound, NewlineSet};

/// Parsed first line of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// `major * 1000 + minor`; HTTP/1.1 is 1001.
    pub version: u32,
    pub code: u16,
    /// Reason phrase, verbatim, without terminator.
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    StatusLine,
    Headers,
    Body,
    Done,
}

enum Framing {
    NotStarted,
    Length { left: u64 },
    Chunked(ChunkedDecoder),
    Close,
}

fn parse_status_line(line: &[u8]) -> Result<StatusLine, BucketError> {
    // HTTP/<d>.<d> <ddd> <reason>
    if line.len() < 12
        || &line[..5] != b"HTTP/"
        || !line[5].is_ascii_digit()
        || line[6] != b'.'
        || !line[7].is_ascii_digit()
        || line[8] != b' '
        || !line[9..12].iter().all(u8::is_ascii_digit)
    {
        return Err(BucketError::BadResponse);
    }
    let major = u32::from(line[5] - b'0');
    let minor = u32::from(line[7] - b'0');
    let code = (line[9..12])
        .iter()
        .fold(0u16, |acc, &d| acc * 10 + u16::from(d - b'0'));
    let reason_bytes = match line.get(12).copied() {
        None => &[][..],
        Some(b' ') => &line[13..],
        Some(_) => &line[12..],
    };
    Ok(StatusLine {
        version: major * 1000 + minor,
        code,
        reason: String::from_utf8_lossy(reason_bytes).into_owned(),
    })
}

fn parse_content_length(value: &str) -> Result<u64, BucketError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BucketError::BadHeader);
    }
    value.parse().map_err(|_| BucketError::BadHeader)
}

/// Parses an HTTP/1.x response from an owned stream bucket and serves the
/// framed body through the bucket read protocol. Reads before the body is
/// reached drive the parser and report `Again` until it gets there.
pub struct ResponseBucket {
    stream: Box<dyn Bucket>,
    state: ParseState,
    lines: LineBuffer,
    status_line: Option<StatusLine>,
    status_raw: Vec<u8>,
    headers: HeadersBucket,
    framing: Framing,
    /// Decoded-but-unserved body bytes (chunked readline/peek staging).
    pending: Bytes,
    /// Raw re-emission of the whole response after `become_aggregate`.
    replay: Option<AggregateBucket>,
    dead: Option<BucketError>,
}

impl ResponseBucket {
    pub fn new(stream: Box<dyn Bucket>) -> Self {
        ResponseBucket {
            stream,
            state: ParseState::StatusLine,
            lines: LineBuffer::new(),
            status_line: None,
            status_raw: Vec::new(),
            headers: HeadersBucket::new(),
            framing: Framing::NotStarted,
            pending: Bytes::new(),
            replay: None,
            dead: None,
        }
    }

    fn fail(&mut self, err: BucketError) -> BucketError {
        self.dead = Some(err.clone());
        err
    }

    fn check_dead(&self) -> Result<(), BucketError> {
        match &self.dead {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Advance the machine by (at most) one parsing step.
    fn run_machine(&mut self) -> Result<ReadStatus, BucketError> {
        match self.state {
            ParseState::StatusLine => {
                let status = self.lines.fetch(self.stream.as_mut(), NewlineSet::ANY)?;
                if self.lines.is_ready() {
                    let parsed = match parse_status_line(self.lines.line()) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            debug!(target: "bucketline::response", "bad status line");
                            return Err(self.fail(err));
                        }
                    };
                    trace!(target: "bucketline::response",
                           "status line: version {} code {}", parsed.version, parsed.code);
                    self.status_raw = self.lines.line().to_vec();
                    self.status_line = Some(parsed);
                    self.state = ParseState::Headers;
                }
                Ok(status)
            }
            ParseState::Headers => loop {
                let status = self.lines.fetch(self.stream.as_mut(), NewlineSet::ANY)?;
                if !self.lines.is_ready() {
                    return Ok(status);
                }
                if self.lines.line().is_empty() {
                    self.select_framing()?;
                    self.state = ParseState::Body;
                    return Ok(ReadStatus::Ok);
                }
                let line = self.lines.line();
                if let Err(err) = self.headers.parse_line(line) {
                    return Err(self.fail(err));
                }
                if status != ReadStatus::Ok {
                    return Ok(status);
                }
            },
            ParseState::Body | ParseState::Done => Ok(ReadStatus::Ok),
        }
    }

    fn select_framing(&mut self) -> Result<(), BucketError> {
        let chunked = self
            .headers
            .get("Transfer-Encoding")
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")))
            .unwrap_or(false);
        self.framing = if chunked {
            trace!(target: "bucketline::response", "body framing: chunked");
            Framing::Chunked(ChunkedDecoder::new())
        } else if let Some(value) = self.headers.get("Content-Length") {
            let left = match parse_content_length(value) {
                Ok(left) => left,
                Err(err) => return Err(self.fail(err)),
            };
            trace!(target: "bucketline::response", "body framing: length {left}");
            Framing::Length { left }
        } else {
            trace!(target: "bucketline::response", "body framing: close-delimited");
            Framing::Close
        };
        Ok(())
    }

    fn ensure_body(&mut self) -> Result<ReadStatus, BucketError> {
        while matches!(self.state, ParseState::StatusLine | ParseState::Headers) {
            let status = self.run_machine()?;
            if status != ReadStatus::Ok
                && matches!(self.state, ParseState::StatusLine | ParseState::Headers)
            {
                return Ok(status);
            }
        }
        Ok(ReadStatus::Ok)
    }

    /// Drive the parser until the status line is available.
    ///
    /// `Ok(None)` means the line has not fully arrived yet (try again).
    /// A stream that ends before completing the status line fails with
    /// [`BucketError::TruncatedHttpResponse`].
    pub fn status(&mut self) -> Result<Option<&StatusLine>, BucketError> {
        self.check_dead()?;
        while self.state == ParseState::StatusLine {
            let status = self.run_machine()?;
            if self.state == ParseState::StatusLine {
                if status == ReadStatus::Eof {
                    return Err(self.fail(BucketError::TruncatedHttpResponse));
                }
                return Ok(None);
            }
        }
        Ok(self.status_line.as_ref())
    }

    /// Drive the parser until the body is reached. Returns `Ok` once
    /// there, `Again`/`WaitConn`/`Eof` while the head is still arriving.
    pub fn wait_for_headers(&mut self) -> Result<ReadStatus, BucketError> {
        self.check_dead()?;
        self.ensure_body()
    }

    /// The parsed headers; present once the header block has been parsed.
    /// Chunked trailer headers are merged in as the body completes.
    pub fn headers(&self) -> Option<&HeadersBucket> {
        match self.state {
            ParseState::Body | ParseState::Done => Some(&self.headers),
            _ => None,
        }
    }

    /// Convert in place into an aggregate that re-emits the original
    /// status-line bytes, header block, blank line and the remaining
    /// stream as raw bytes; body framing no longer applies. Used to hand
    /// a fully-formed response to something that expects raw bytes.
    /// Returns `Again`-style statuses while the head has not fully
    /// arrived yet.
    pub fn become_aggregate(&mut self) -> Result<ReadStatus, BucketError> {
        self.check_dead()?;
        let status = self.ensure_body()?;
        if status != ReadStatus::Ok {
            return Ok(status);
        }
        let mut agg = AggregateBucket::new();
        let mut line = self.status_raw.clone();
        line.extend_from_slice(b"\r\n");
        agg.append(Box::new(SimpleBucket::own(line)));
        agg.append(Box::new(SimpleBucket::own(self.headers.wire())));
        if !self.pending.is_empty() {
            agg.append(Box::new(SimpleBucket::own(std::mem::take(&mut self.pending))));
        }
        let stream = std::mem::replace(
            &mut self.stream,
            Box::new(SimpleBucket::own(Bytes::new())),
        );
        agg.append(stream);
        self.replay = Some(agg);
        Ok(ReadStatus::Ok)
    }

    fn read_body(&mut self, max: usize) -> ReadResult {
        if !self.pending.is_empty() {
            let n = max.min(self.pending.len());
            let data = self.pending.split_to(n);
            let status = if self.pending.is_empty() && self.state == ParseState::Done {
                ReadStatus::Eof
            } else {
                ReadStatus::Ok
            };
            return Ok((data, status));
        }
        if self.state == ParseState::Done {
            return Ok((Bytes::new(), ReadStatus::Eof));
        }

        if let Framing::Length { left } = self.framing {
            if left == 0 {
                self.state = ParseState::Done;
                return Ok((Bytes::new(), ReadStatus::Eof));
            }
            let want = max.min(usize::try_from(left).unwrap_or(usize::MAX));
            let (data, status) = self.stream.read(want)?;
            if data.is_empty() {
                return match status {
                    ReadStatus::Eof => Err(self.fail(BucketError::TruncatedHttpResponse)),
                    other => Ok((Bytes::new(), other)),
                };
            }
            let left = left - data.len() as u64;
            self.framing = Framing::Length { left };
            if left == 0 {
                self.state = ParseState::Done;
                return Ok((data, ReadStatus::Eof));
            }
            // Hold a premature stream Eof; the next read maps it to a
            // truncation error after this data has been delivered.
            let status = if status == ReadStatus::Eof {
                ReadStatus::Ok
            } else {
                status
            };
            return Ok((data, status));
        }

        if matches!(self.framing, Framing::Chunked(_)) {
            let ResponseBucket {
                stream,
                framing,
                headers,
                ..
            } = self;
            let Framing::Chunked(decoder) = framing else {
                unreachable!()
            };
            return match decoder.read(stream.as_mut(), max, headers) {
                Ok((data, ReadStatus::Eof)) => {
                    self.state = ParseState::Done;
                    Ok((data, ReadStatus::Eof))
                }
                Ok(other) => Ok(other),
                Err(err) => Err(self.fail(err)),
            };
        }

        if matches!(self.framing, Framing::Close) {
            let (data, status) = self.stream.read(max)?;
            if status == ReadStatus::Eof {
                self.state = ParseState::Done;
            }
            return Ok((data, status));
        }

        Ok((Bytes::new(), ReadStatus::Again))
    }

    /// Decode more chunked body bytes into the staging buffer.
    fn fill_chunk_pending(&mut self) -> Result<ReadStatus, BucketError> {
        if !self.pending.is_empty() {
            return Ok(ReadStatus::Ok);
        }
        if self.state == ParseState::Done {
            return Ok(ReadStatus::Eof);
        }
        let (data, status) = self.read_body(crate::READ_ALL_AVAIL)?;
        self.pending = data;
        Ok(status)
    }
}

impl Bucket for ResponseBucket {
    fn read(&mut self, max: usize) -> ReadResult {
        self.check_dead()?;
        if let Some(replay) = &mut self.replay {
            return replay.read(max);
        }
        let status = self.ensure_body()?;
        if status != ReadStatus::Ok {
            return Ok((Bytes::new(), status));
        }
        self.read_body(max)
    }

    fn readline(&mut self, acceptable: NewlineSet) -> LineResult {
        self.check_dead()?;
        if let Some(replay) = &mut self.replay {
            return replay.readline(acceptable);
        }
        let status = self.ensure_body()?;
        if status != ReadStatus::Ok {
            return Ok((Bytes::new(), NewlineFound::None, status));
        }

        if matches!(self.framing, Framing::Chunked(_)) {
            let status = self.fill_chunk_pending()?;
            if self.pending.is_empty() {
                return Ok((Bytes::new(), NewlineFound::None, status));
            }
            let (n, found) = scan_line(&self.pending, acceptable);
            let data = self.pending.split_to(n);
            let status = if self.pending.is_empty() && self.state == ParseState::Done {
                ReadStatus::Eof
            } else {
                ReadStatus::Ok
            };
            return Ok((data, found, status));
        }

        if let Framing::Length { left } = self.framing {
            if left == 0 {
                self.state = ParseState::Done;
                return Ok((Bytes::new(), NewlineFound::None, ReadStatus::Eof));
            }
            let (data, found, status) = self.stream.readline(acceptable)?;
            if data.is_empty() && status == ReadStatus::Eof {
                return Err(self.fail(BucketError::TruncatedHttpResponse));
            }
            let left = left.saturating_sub(data.len() as u64);
            self.framing = Framing::Length { left };
            if left == 0 {
                self.state = ParseState::Done;
                return Ok((data, found, ReadStatus::Eof));
            }
            let status = if status == ReadStatus::Eof {
                ReadStatus::Ok
            } else {
                status
            };
            return Ok((data, found, status));
        }

        // Close-delimited: the stream's own line semantics apply.
        let result = self.stream.readline(acceptable)?;
        if result.2 == ReadStatus::Eof {
            self.state = ParseState::Done;
        }
        Ok(result)
    }

    fn peek(&mut self) -> PeekResult<'_> {
        self.check_dead()?;
        if self.replay.is_some() {
            return self.replay.as_mut().unwrap().peek();
        }

        let status = self.ensure_body()?;
        if status != ReadStatus::Ok {
            return Ok((&[], ReadStatus::Ok));
        }

        if matches!(self.framing, Framing::Chunked(_)) {
            let _ = self.fill_chunk_pending()?;
            let status = if self.state == ParseState::Done {
                ReadStatus::Eof
            } else {
                ReadStatus::Ok
            };
            return Ok((&self.pending, status));
        }

        if let Framing::Length { left } = self.framing {
            let (data, status) = self.stream.peek()?;
            let visible = data.len().min(usize::try_from(left).unwrap_or(usize::MAX));
            let status = if left <= data.len() as u64 {
                ReadStatus::Eof
            } else {
                status
            };
            return Ok((&data[..visible], status));
        }

        self.stream.peek()
    }

    fn set_config(&mut self, config: &PipelineConfig) {
        self.stream.set_config(config);
    }
}
