//! Compact binary snapshots of a dictionary
//!
//! Used to hand a dictionary to another process. The format carries no type
//! tags; the receiver narrows values with its own typed accessors.
//!
//! Layout, repeated once per entry in insertion order:
//! - name length: 4 bytes (big-endian u32)
//! - name: UTF-8
//! - has-value: 1 byte (0 or 1)
//! - if has-value: value length (4 bytes, big-endian u32) and the value as
//!   UTF-8 text
//!
//! Unmodified compiled defaults are sent without a value.

use std::mem::size_of;

use log::debug;

use crate::dictionary::{Dictionary, validate_name};
use crate::entry::{DefaultLevel, Entry};
use crate::error::{DictError, ErrorCategory, ErrorKind, Result};

fn truncated(what: &str) -> DictError {
    DictError::with_kind(
        ErrorCategory::User,
        ErrorKind::TruncatedInput,
        format!("snapshot likely truncated while reading {}", what),
    )
}

fn bad_format(msg: impl Into<String>) -> DictError {
    DictError::with_kind(ErrorCategory::User, ErrorKind::BinaryFormat, msg)
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| bad_format(format!("field of {} bytes is too long", bytes.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn put_entry(out: &mut Vec<u8>, entry: &Entry) -> Result<()> {
    put_bytes(out, entry.name.as_bytes())?;
    if entry.default_level == DefaultLevel::CompiledDefault && !entry.modified {
        out.push(0);
    } else {
        out.push(1);
        put_bytes(out, entry.value.to_text().as_bytes())?;
    }
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.bytes.len() - self.pos < n {
            return Err(truncated(what));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn text(&mut self, what: &str) -> Result<String> {
        let mut len = [0u8; size_of::<u32>()];
        let prefix = self.take(size_of::<u32>(), what)?;
        len.copy_from_slice(prefix);
        let body = self.take(u32::from_be_bytes(len) as usize, what)?;
        String::from_utf8(body.to_vec()).map_err(|e| {
            DictError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::BinaryFormat,
                format!("{} is not valid UTF-8", what),
                e,
            )
        })
    }
}

impl Dictionary {
    /// Snapshot of every entry, including compiled defaults.
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for entry in self.entries.values() {
            put_entry(&mut out, entry)?;
        }
        Ok(out)
    }

    /// Snapshot that leaves out entries at the `exclude` level unless they
    /// have been modified.
    pub fn marshal_modified(&self, exclude: DefaultLevel) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for entry in self.entries.values() {
            if entry.default_level == exclude && !entry.modified {
                continue;
            }
            put_entry(&mut out, entry)?;
        }
        Ok(out)
    }

    /// Merges a snapshot into the dictionary at `level`. Entries sent
    /// without a value are left alone. Returns how many entries were
    /// stored. A malformed snapshot changes nothing.
    pub fn unmarshal(&mut self, bytes: &[u8], level: DefaultLevel) -> Result<usize> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let mut pairs = Vec::new();

        while !cursor.at_end() {
            let name = cursor.text("name")?;
            validate_name(&name)
                .map_err(|e| e.with_context(format!("snapshot has a bad entry name '{}'", name)))?;
            match cursor.take(1, "value flag")?[0] {
                0 => {}
                1 => pairs.push((name, cursor.text("value")?)),
                other => return Err(bad_format(format!("bad value flag {}", other))),
            }
        }

        let count = pairs.len();
        for (name, text) in pairs {
            self.commit_pair(name, text, None, level);
        }
        debug!("unmarshaled {} entries", count);
        Ok(count)
    }
}
