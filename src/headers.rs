//! An ordered, case-insensitive header multimap that can emit itself as
//! HTTP header bytes.

use bytes::{Bytes, BytesMut};

use crate::bucket::{Bucket, LineResult, PeekResult, ReadResult, ReadStatus};
use crate::error::BucketError;
use crate::line::scan_line;
use crate::NewlineSet;

fn trim_spaces(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}

/// Header map preserving insertion order. Setting an existing name appends
/// the new value to the old, comma-separated. Lookup is case-insensitive.
/// Reading the bucket drains `Name: Value CRLF` pairs followed by one
/// terminating CRLF.
pub struct HeadersBucket {
    entries: Vec<(String, String)>,
    emit: Option<Bytes>,
}

impl HeadersBucket {
    pub fn new() -> Self {
        HeadersBucket {
            entries: Vec::new(),
            emit: None,
        }
    }

    /// Set a header. A repeated name comma-joins onto the existing value.
    pub fn set(&mut self, name: &str, value: &str) {
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => {
                existing.push(',');
                existing.push_str(value);
            }
            None => self.entries.push((name.to_owned(), value.to_owned())),
        }
    }

    /// Parse one wire-format header line (terminator already stripped)
    /// into the map. The name is the bytes before the first `:` with
    /// surrounding spaces trimmed; the value is the remainder with leading
    /// linear whitespace stripped. Empty values are legal; a line without
    /// `:` is not.
    pub fn parse_line(&mut self, line: &[u8]) -> Result<(), BucketError> {
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(BucketError::BadHeader)?;
        let name = trim_spaces(&line[..colon]);
        let mut value = &line[colon + 1..];
        while let [first, rest @ ..] = value {
            if !first.is_ascii_whitespace() {
                break;
            }
            value = rest;
        }
        self.set(
            &String::from_utf8_lossy(name),
            &String::from_utf8_lossy(value),
        );
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the wire form: each pair as `Name: Value CRLF`, then one
    /// terminating CRLF. Output always uses CRLF regardless of what was
    /// parsed.
    pub fn wire(&self) -> Bytes {
        let mut out = BytesMut::new();
        for (name, value) in &self.entries {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.freeze()
    }

    fn emit(&mut self) -> &mut Bytes {
        if self.emit.is_none() {
            self.emit = Some(self.wire());
        }
        self.emit.as_mut().expect("emit just initialized")
    }

    fn status(emit: &Bytes) -> ReadStatus {
        if emit.is_empty() {
            ReadStatus::Eof
        } else {
            ReadStatus::Ok
        }
    }
}

impl Default for HeadersBucket {
    fn default() -> Self {
        HeadersBucket::new()
    }
}

impl Bucket for HeadersBucket {
    fn read(&mut self, max: usize) -> ReadResult {
        let emit = self.emit();
        let n = max.min(emit.len());
        let data = emit.split_to(n);
        Ok((data, Self::status(emit)))
    }

    fn readline(&mut self, acceptable: NewlineSet) -> LineResult {
        let emit = self.emit();
        let (n, found) = scan_line(emit, acceptable);
        let data = emit.split_to(n);
        Ok((data, found, Self::status(emit)))
    }

    fn peek(&mut self) -> PeekResult<'_> {
        let emit = self.emit();
        Ok((&emit[..], ReadStatus::Eof))
    }
}
