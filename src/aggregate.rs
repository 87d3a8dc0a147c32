//! A bucket over an ordered queue of child buckets.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::bucket::{Bucket, LineResult, PeekResult, ReadResult, ReadStatus};
use crate::config::PipelineConfig;
use crate::error::BucketError;
use crate::{NewlineFound, NewlineSet};

/// Drains child buckets strictly front-to-back, dropping each as it
/// reaches `Eof`. A child finishing mid-call moves the read on to the next
/// child, so callers never see a spurious `Eof` between segments.
pub struct AggregateBucket {
    children: VecDeque<Box<dyn Bucket>>,
}

impl AggregateBucket {
    pub fn new() -> Self {
        AggregateBucket {
            children: VecDeque::new(),
        }
    }

    /// Add a child at the tail.
    pub fn append(&mut self, child: Box<dyn Bucket>) {
        self.children.push_back(child);
    }

    /// Add a child at the head, to be read before everything queued.
    pub fn prepend(&mut self, child: Box<dyn Bucket>) {
        self.children.push_front(child);
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Default for AggregateBucket {
    fn default() -> Self {
        AggregateBucket::new()
    }
}

impl Bucket for AggregateBucket {
    fn read(&mut self, max: usize) -> ReadResult {
        loop {
            let Some(head) = self.children.front_mut() else {
                return Ok((Bytes::new(), ReadStatus::Eof));
            };
            let (data, status) = head.read(max)?;
            if status != ReadStatus::Eof {
                return Ok((data, status));
            }
            self.children.pop_front();
            if !data.is_empty() {
                let status = if self.children.is_empty() {
                    ReadStatus::Eof
                } else {
                    ReadStatus::Ok
                };
                return Ok((data, status));
            }
            // Spent child with no data: consult the next one in this call.
        }
    }

    fn readline(&mut self, acceptable: NewlineSet) -> LineResult {
        loop {
            let Some(head) = self.children.front_mut() else {
                return Ok((Bytes::new(), NewlineFound::None, ReadStatus::Eof));
            };
            let (data, found, status) = head.readline(acceptable)?;
            if status != ReadStatus::Eof {
                return Ok((data, found, status));
            }
            self.children.pop_front();
            let exhausted = self.children.is_empty();
            if !data.is_empty() {
                // A line ending without terminator (or on a split CR)
                // continues into the next child; reporting `Ok` keeps the
                // caller's accumulation going on the following call.
                let status = if exhausted {
                    ReadStatus::Eof
                } else {
                    ReadStatus::Ok
                };
                return Ok((data, found, status));
            }
            if exhausted {
                return Ok((Bytes::new(), NewlineFound::None, ReadStatus::Eof));
            }
        }
    }

    fn peek(&mut self) -> PeekResult<'_> {
        // Drop spent children first so the head actually has data to show.
        loop {
            let drained = match self.children.front_mut() {
                None => return Ok((&[], ReadStatus::Eof)),
                Some(head) => {
                    let (data, status) = head.peek()?;
                    data.is_empty() && status == ReadStatus::Eof
                }
            };
            if !drained {
                break;
            }
            self.children.pop_front();
        }

        let more = self.children.len() > 1;
        let Some(head) = self.children.front_mut() else {
            return Ok((&[], ReadStatus::Eof));
        };
        let (data, status) = head.peek()?;
        let status = if more { ReadStatus::Ok } else { status };
        Ok((data, status))
    }

    fn read_iovec(
        &mut self,
        max: usize,
        max_vecs: usize,
        out: &mut Vec<Bytes>,
    ) -> Result<ReadStatus, BucketError> {
        let mut budget = max;
        let mut used = 0;
        loop {
            if used >= max_vecs || budget == 0 {
                return Ok(ReadStatus::Ok);
            }
            let (data, status) = self.read(budget)?;
            if !data.is_empty() {
                budget = budget.saturating_sub(data.len());
                out.push(data);
                used += 1;
            }
            if status != ReadStatus::Ok {
                return Ok(status);
            }
        }
    }

    fn set_config(&mut self, config: &PipelineConfig) {
        for child in &mut self.children {
            child.set_config(config);
        }
    }
}
