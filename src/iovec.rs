//! A bucket over a fixed vector of byte ranges.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::bucket::{Bucket, LineResult, PeekResult, ReadResult, ReadStatus};
use crate::error::BucketError;
use crate::line::scan_line;
use crate::NewlineSet;

/// Serves a fixed sequence of ranges front-to-back. `read` never crosses a
/// range boundary in one call; `read_iovec` returns the ranges themselves.
pub struct IovecBucket {
    vecs: VecDeque<Bytes>,
}

impl IovecBucket {
    pub fn new(vecs: impl IntoIterator<Item = Bytes>) -> Self {
        IovecBucket {
            vecs: vecs.into_iter().filter(|v| !v.is_empty()).collect(),
        }
    }

    fn status(&self) -> ReadStatus {
        if self.vecs.is_empty() {
            ReadStatus::Eof
        } else {
            ReadStatus::Ok
        }
    }
}

impl Bucket for IovecBucket {
    fn read(&mut self, max: usize) -> ReadResult {
        let Some(front) = self.vecs.front_mut() else {
            return Ok((Bytes::new(), ReadStatus::Eof));
        };
        let n = max.min(front.len());
        let data = front.split_to(n);
        if front.is_empty() {
            self.vecs.pop_front();
        }
        Ok((data, self.status()))
    }

    fn readline(&mut self, acceptable: NewlineSet) -> LineResult {
        let Some(front) = self.vecs.front_mut() else {
            return Ok((Bytes::new(), crate::NewlineFound::None, ReadStatus::Eof));
        };
        let (n, found) = scan_line(front, acceptable);
        let data = front.split_to(n);
        if front.is_empty() {
            self.vecs.pop_front();
        }
        Ok((data, found, self.status()))
    }

    fn peek(&mut self) -> PeekResult<'_> {
        let last = self.vecs.len() == 1;
        match self.vecs.front() {
            None => Ok((&[], ReadStatus::Eof)),
            Some(front) => {
                let status = if last { ReadStatus::Eof } else { ReadStatus::Ok };
                Ok((front, status))
            }
        }
    }

    fn read_iovec(
        &mut self,
        max: usize,
        max_vecs: usize,
        out: &mut Vec<Bytes>,
    ) -> Result<ReadStatus, BucketError> {
        let mut budget = max;
        let mut used = 0;
        while used < max_vecs && budget > 0 {
            let Some(front) = self.vecs.front_mut() else {
                break;
            };
            let n = budget.min(front.len());
            let data = front.split_to(n);
            if front.is_empty() {
                self.vecs.pop_front();
            }
            budget = budget.saturating_sub(n);
            out.push(data);
            used += 1;
        }
        Ok(self.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::READ_ALL_AVAIL;

    fn bufs(count: usize) -> Vec<Bytes> {
        (0..count)
            .map(|i| Bytes::from(format!("data {i:02} 901234567890")))
            .collect()
    }

    #[test]
    fn read_serves_one_range_at_a_time() {
        let mut bkt = IovecBucket::new(bufs(2));

        let (data, status) = bkt.read(10).unwrap();
        assert_eq!(&data[..], b"data 00 90");
        assert_eq!(status, ReadStatus::Ok);

        // ALL_AVAIL still stops at the range boundary.
        let (data, status) = bkt.read(READ_ALL_AVAIL).unwrap();
        assert_eq!(&data[..], b"1234567890");
        assert_eq!(status, ReadStatus::Ok);

        let (data, status) = bkt.read(READ_ALL_AVAIL).unwrap();
        assert_eq!(&data[..], b"data 01 901234567890");
        assert_eq!(status, ReadStatus::Eof);
    }

    #[test]
    fn read_iovec_respects_byte_budget() {
        let mut bkt = IovecBucket::new(bufs(32));

        let mut vecs = Vec::new();
        let status = bkt.read_iovec(20, 32, &mut vecs).unwrap();
        assert_eq!(status, ReadStatus::Ok);
        assert_eq!(vecs.len(), 1);

        vecs.clear();
        let status = bkt.read_iovec(40, 32, &mut vecs).unwrap();
        assert_eq!(status, ReadStatus::Ok);
        assert_eq!(vecs.len(), 2);

        vecs.clear();
        let status = bkt.read_iovec(READ_ALL_AVAIL, 32, &mut vecs).unwrap();
        assert_eq!(status, ReadStatus::Eof);
        assert_eq!(vecs.len(), 29);
    }

    #[test]
    fn read_iovec_zero_bytes() {
        let mut bkt = IovecBucket::new(bufs(1));
        let mut vecs = Vec::new();
        let status = bkt.read_iovec(0, 32, &mut vecs).unwrap();
        assert_eq!(status, ReadStatus::Ok);
        assert!(vecs.is_empty());
    }

    #[test]
    fn empty_bucket_reports_eof() {
        let mut bkt = IovecBucket::new(Vec::new());
        let mut vecs = Vec::new();
        assert_eq!(
            bkt.read_iovec(READ_ALL_AVAIL, 32, &mut vecs).unwrap(),
            ReadStatus::Eof
        );
        assert!(vecs.is_empty());

        let (data, status) = bkt.read(READ_ALL_AVAIL).unwrap();
        assert!(data.is_empty());
        assert_eq!(status, ReadStatus::Eof);
    }

    #[test]
    fn peek_reports_eof_only_on_last_range() {
        let mut bkt = IovecBucket::new(bufs(2));
        let (_, status) = bkt.peek().unwrap();
        assert_eq!(status, ReadStatus::Ok);

        let _ = bkt.read(READ_ALL_AVAIL).unwrap();
        let (data, status) = bkt.peek().unwrap();
        assert_eq!(&data[..8], b"data 01 ");
        assert_eq!(status, ReadStatus::Eof);
    }
}
