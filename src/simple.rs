//! A bucket over one contiguous in-memory byte range.

use bytes::Bytes;

use crate::alloc::BucketAlloc;
use crate::bucket::{Bucket, LineResult, PeekResult, ReadResult, ReadStatus};
use crate::line::scan_line;
use crate::NewlineSet;

/// Wraps a single byte range. The three constructors express who owns the
/// bytes: `from_static` borrows, `copy` duplicates into the pipeline
/// allocator, `own` takes ownership of bytes the caller hands over.
pub struct SimpleBucket {
    data: Bytes,
}

impl SimpleBucket {
    /// Borrow bytes that outlive every bucket (`'static`).
    pub fn from_static(data: &'static [u8]) -> Self {
        SimpleBucket {
            data: Bytes::from_static(data),
        }
    }

    /// Copy `data` into a block owned by this bucket.
    pub fn copy(data: &[u8], alloc: &BucketAlloc) -> Self {
        SimpleBucket {
            data: alloc.copy(data),
        }
    }

    /// Take ownership of caller-provided bytes.
    pub fn own(data: impl Into<Bytes>) -> Self {
        SimpleBucket { data: data.into() }
    }

    fn status(&self) -> ReadStatus {
        if self.data.is_empty() {
            ReadStatus::Eof
        } else {
            ReadStatus::Ok
        }
    }
}

impl Bucket for SimpleBucket {
    fn read(&mut self, max: usize) -> ReadResult {
        let n = max.min(self.data.len());
        let out = self.data.split_to(n);
        Ok((out, self.status()))
    }

    fn readline(&mut self, acceptable: NewlineSet) -> LineResult {
        let (n, found) = scan_line(&self.data, acceptable);
        let out = self.data.split_to(n);
        Ok((out, found, self.status()))
    }

    fn peek(&mut self) -> PeekResult<'_> {
        // Everything visible is everything there is.
        Ok((&self.data, ReadStatus::Eof))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{NewlineFound, READ_ALL_AVAIL};

    #[test]
    fn read_drains_then_reports_eof() {
        let mut bkt = SimpleBucket::from_static(b"abc1234");
        let (data, status) = bkt.read(3).unwrap();
        assert_eq!(&data[..], b"abc");
        assert_eq!(status, ReadStatus::Ok);

        let (data, status) = bkt.read(READ_ALL_AVAIL).unwrap();
        assert_eq!(&data[..], b"1234");
        assert_eq!(status, ReadStatus::Eof);

        // Eof is sticky.
        let (data, status) = bkt.read(READ_ALL_AVAIL).unwrap();
        assert!(data.is_empty());
        assert_eq!(status, ReadStatus::Eof);
    }

    #[test]
    fn readline_reports_terminator_then_eof() {
        let mut bkt = SimpleBucket::from_static(b"line1\r\nline2");

        let (data, found, status) = bkt.readline(NewlineSet::CRLF).unwrap();
        assert_eq!(&data[..], b"line1\r\n");
        assert_eq!(found, NewlineFound::Crlf);
        assert_eq!(status, ReadStatus::Ok);

        let (data, found, status) = bkt.readline(NewlineSet::CRLF).unwrap();
        assert_eq!(&data[..], b"line2");
        assert_eq!(found, NewlineFound::None);
        assert_eq!(status, ReadStatus::Eof);
    }

    #[test]
    fn peek_shows_all_with_eof() {
        let mut bkt = SimpleBucket::own(b"visible".to_vec());
        let (data, status) = bkt.peek().unwrap();
        assert_eq!(data, b"visible");
        assert_eq!(status, ReadStatus::Eof);
    }

    #[test]
    fn copy_is_detached_from_source() {
        let alloc = BucketAlloc::new();
        let src = vec![1u8, 2, 3];
        let mut bkt = SimpleBucket::copy(&src, &alloc);
        drop(src);
        let (data, _) = bkt.read(READ_ALL_AVAIL).unwrap();
        assert_eq!(&data[..], &[1, 2, 3]);
    }
}
