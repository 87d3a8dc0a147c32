//! Adapter turning a "fill this buffer" callback into the full bucket
//! read protocol.

use bytes::Bytes;

use crate::bucket::{LineResult, PeekResult, ReadResult, ReadStatus};
use crate::error::BucketError;
use crate::line::scan_line;
use crate::NewlineSet;

/// Scratch size handed to the fill callback on each refill.
pub const DATABUF_CAPACITY: usize = 8192;

/// Buffers one fill's worth of data and serves `read`/`readline`/`peek`
/// from it. The status accompanying a fill is remembered and surfaced when
/// the buffered span drains; `Again` is transparent (the next call refills)
/// and `Eof` is final.
pub struct DataBuf {
    current: Bytes,
    status: ReadStatus,
}

impl DataBuf {
    pub fn new() -> Self {
        DataBuf {
            current: Bytes::new(),
            status: ReadStatus::Ok,
        }
    }

    /// Forget buffered data and stored status. Used when the upstream of
    /// the fill callback is replaced.
    pub fn reset(&mut self) {
        self.current = Bytes::new();
        self.status = ReadStatus::Ok;
    }

    fn prep<F>(&mut self, mut fill: F) -> Result<(), BucketError>
    where
        F: FnMut(&mut [u8]) -> Result<(usize, ReadStatus), BucketError>,
    {
        if !self.current.is_empty() || self.status == ReadStatus::Eof {
            return Ok(());
        }
        let mut scratch = vec![0u8; DATABUF_CAPACITY];
        let (n, status) = fill(&mut scratch)?;
        debug_assert!(n <= scratch.len());
        scratch.truncate(n);
        self.current = Bytes::from(scratch);
        self.status = status;
        Ok(())
    }

    fn drained_status(&self) -> ReadStatus {
        if self.current.is_empty() {
            self.status
        } else {
            ReadStatus::Ok
        }
    }

    pub fn read<F>(&mut self, max: usize, fill: F) -> ReadResult
    where
        F: FnMut(&mut [u8]) -> Result<(usize, ReadStatus), BucketError>,
    {
        self.prep(fill)?;
        let n = max.min(self.current.len());
        let data = self.current.split_to(n);
        Ok((data, self.drained_status()))
    }

    pub fn readline<F>(&mut self, acceptable: NewlineSet, fill: F) -> LineResult
    where
        F: FnMut(&mut [u8]) -> Result<(usize, ReadStatus), BucketError>,
    {
        self.prep(fill)?;
        let (n, found) = scan_line(&self.current, acceptable);
        let data = self.current.split_to(n);
        Ok((data, found, self.drained_status()))
    }

    pub fn peek<F>(&mut self, fill: F) -> PeekResult<'_>
    where
        F: FnMut(&mut [u8]) -> Result<(usize, ReadStatus), BucketError>,
    {
        self.prep(fill)?;
        // Eof from the last fill means what is visible is all there is,
        // even when that span is nonempty. Anything else means more may
        // follow.
        let status = if self.status == ReadStatus::Eof {
            ReadStatus::Eof
        } else {
            ReadStatus::Ok
        };
        Ok((&self.current, status))
    }
}

impl Default for DataBuf {
    fn default() -> Self {
        DataBuf::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_once_then_eof() {
        let mut db = DataBuf::new();
        let mut calls = 0;
        let mut fill = |buf: &mut [u8]| {
            calls += 1;
            buf[..5].copy_from_slice(b"hello");
            Ok((5, ReadStatus::Eof))
        };

        let (data, status) = db.read(3, &mut fill).unwrap();
        assert_eq!(&data[..], b"hel");
        assert_eq!(status, ReadStatus::Ok);

        let (data, status) = db.read(16, &mut fill).unwrap();
        assert_eq!(&data[..], b"lo");
        assert_eq!(status, ReadStatus::Eof);

        // Eof is final; the callback is not consulted again.
        let (data, status) = db.read(16, &mut fill).unwrap();
        assert!(data.is_empty());
        assert_eq!(status, ReadStatus::Eof);
        assert_eq!(calls, 1);
    }

    #[test]
    fn again_is_transparent() {
        let mut db = DataBuf::new();
        let mut first = true;
        let mut fill = |buf: &mut [u8]| {
            if first {
                first = false;
                Ok((0, ReadStatus::Again))
            } else {
                buf[..4].copy_from_slice(b"data");
                Ok((4, ReadStatus::Eof))
            }
        };

        let (data, status) = db.read(16, &mut fill).unwrap();
        assert!(data.is_empty());
        assert_eq!(status, ReadStatus::Again);

        let (data, status) = db.read(16, &mut fill).unwrap();
        assert_eq!(&data[..], b"data");
        assert_eq!(status, ReadStatus::Eof);
    }

    #[test]
    fn readline_scans_buffered_data() {
        let mut db = DataBuf::new();
        let mut fill = |buf: &mut [u8]| {
            buf[..12].copy_from_slice(b"line\r\nafter\n");
            Ok((12, ReadStatus::Eof))
        };

        let (data, found, status) = db.readline(NewlineSet::CRLF, &mut fill).unwrap();
        assert_eq!(&data[..], b"line\r\n");
        assert_eq!(found, crate::NewlineFound::Crlf);
        assert_eq!(status, ReadStatus::Ok);
    }

    #[test]
    fn peek_does_not_advance() {
        let mut db = DataBuf::new();
        let mut fill = |buf: &mut [u8]| {
            buf[..3].copy_from_slice(b"abc");
            Ok((3, ReadStatus::Eof))
        };
        let (data, status) = db.peek(&mut fill).unwrap();
        assert_eq!(data, b"abc");
        assert_eq!(status, ReadStatus::Eof);

        let (data, _) = db.read(16, &mut fill).unwrap();
        assert_eq!(&data[..], b"abc");
    }
}
