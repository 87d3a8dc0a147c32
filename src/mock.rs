//! A scripted byte source for exercising arrival boundaries in tests.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::bucket::{Bucket, LineResult, PeekResult, ReadResult, ReadStatus};
use crate::error::BucketError;
use crate::line::scan_line;
use crate::{NewlineFound, NewlineSet};

enum Action {
    Deliver(Bytes),
    Stall,
    Fail(BucketError),
}

/// Plays back a script of deliveries, stalls and failures.
///
/// A stall is consumed the first time any operation observes it, so the
/// following call proceeds to the next scripted action; the "more data
/// arrived" nudge is implicit. After the script runs out every operation
/// reports `Eof`.
pub struct MockBucket {
    actions: VecDeque<Action>,
}

impl MockBucket {
    pub fn new() -> Self {
        MockBucket {
            actions: VecDeque::new(),
        }
    }

    /// Script bytes to deliver.
    pub fn deliver(mut self, data: impl Into<Bytes>) -> Self {
        self.actions.push_back(Action::Deliver(data.into()));
        self
    }

    /// Script one `Again` before the next action.
    pub fn stall(mut self) -> Self {
        self.actions.push_back(Action::Stall);
        self
    }

    /// Script a hard error.
    pub fn fail(mut self, err: BucketError) -> Self {
        self.actions.push_back(Action::Fail(err));
        self
    }

    /// Pop stalls/failures off the front; `Ok(true)` means the caller
    /// should report `Again` for this observation.
    fn settle(&mut self) -> Result<bool, BucketError> {
        loop {
            match self.actions.front() {
                Some(Action::Stall) => {
                    self.actions.pop_front();
                    return Ok(true);
                }
                Some(Action::Fail(_)) => {
                    let Some(Action::Fail(err)) = self.actions.pop_front() else {
                        unreachable!()
                    };
                    return Err(err);
                }
                Some(Action::Deliver(data)) if data.is_empty() => {
                    self.actions.pop_front();
                }
                _ => return Ok(false),
            }
        }
    }

    fn status(&self) -> ReadStatus {
        if self.actions.is_empty() {
            ReadStatus::Eof
        } else {
            ReadStatus::Ok
        }
    }
}

impl Default for MockBucket {
    fn default() -> Self {
        MockBucket::new()
    }
}

impl Bucket for MockBucket {
    fn read(&mut self, max: usize) -> ReadResult {
        if self.settle()? {
            return Ok((Bytes::new(), ReadStatus::Again));
        }
        let Some(Action::Deliver(front)) = self.actions.front_mut() else {
            return Ok((Bytes::new(), ReadStatus::Eof));
        };
        let n = max.min(front.len());
        let data = front.split_to(n);
        if front.is_empty() {
            self.actions.pop_front();
        }
        Ok((data, self.status()))
    }

    fn readline(&mut self, acceptable: NewlineSet) -> LineResult {
        if self.settle()? {
            return Ok((Bytes::new(), NewlineFound::None, ReadStatus::Again));
        }
        let Some(Action::Deliver(front)) = self.actions.front_mut() else {
            return Ok((Bytes::new(), NewlineFound::None, ReadStatus::Eof));
        };
        let (n, found) = scan_line(front, acceptable);
        let data = front.split_to(n);
        if front.is_empty() {
            self.actions.pop_front();
        }
        Ok((data, found, self.status()))
    }

    fn peek(&mut self) -> PeekResult<'_> {
        if self.settle()? {
            // The stall was consumed; show nothing, promise more.
            return Ok((&[], ReadStatus::Ok));
        }
        let last = self.actions.len() == 1;
        match self.actions.front() {
            Some(Action::Deliver(front)) => {
                let status = if last { ReadStatus::Eof } else { ReadStatus::Ok };
                Ok((front, status))
            }
            _ => Ok((&[], ReadStatus::Eof)),
        }
    }
}
