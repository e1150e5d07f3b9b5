//! Character encoding negotiation
//!
//! A dictionary's encoding is resolved once per load, in this order:
//!
//! 1. an `.encoding` declaration in the content,
//! 2. a UTF-8 byte-order mark,
//! 3. the encoding the dictionary already has (appending),
//! 4. the caller-supplied default,
//! 5. the platform encoding (UTF-8).
//!
//! Once set, a dictionary's encoding can only be changed explicitly; content
//! that declares something else is rejected.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};

use crate::error::{DictError, ErrorCategory, ErrorKind, Result};

/// Names starting with this prefix are metavariables, not entries.
pub const METAVARIABLE_PREFIX: char = '.';

/// The only metavariable the loader understands.
pub const ENCODING_METAVARIABLE: &str = ".encoding";

pub(crate) const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Looks up an encoding by label (`"UTF-8"`, `"latin1"`, `"shift_jis"`, ...).
///
/// Only ASCII-compatible encodings are accepted because the line format
/// finds `=`, `#` and quotes by byte value.
pub fn lookup(label: &str) -> Result<&'static Encoding> {
    let encoding = Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
        DictError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnknownEncoding,
            format!("unknown encoding '{}'", label),
        )
    })?;
    if !encoding.is_ascii_compatible() {
        return Err(DictError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnknownEncoding,
            format!(
                "encoding '{}' is not ASCII-compatible and cannot be used for dictionaries",
                encoding.name()
            ),
        ));
    }
    Ok(encoding)
}

pub fn platform_encoding() -> &'static Encoding {
    UTF_8
}

/// Splits a leading UTF-8 byte-order mark off `bytes`.
pub(crate) fn strip_bom(bytes: &[u8]) -> (bool, &[u8]) {
    match bytes.strip_prefix(UTF8_BOM) {
        Some(rest) => (true, rest),
        None => (false, bytes),
    }
}

/// Everything known about the encoding of one load.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Negotiation {
    pub existing: Option<&'static Encoding>,
    pub declared: Option<&'static Encoding>,
    pub bom: bool,
    pub caller_default: Option<&'static Encoding>,
}

impl Negotiation {
    pub fn resolve(&self) -> Result<&'static Encoding> {
        let claimed = match (self.declared, self.bom) {
            (Some(declared), true) if declared != UTF_8 => {
                return Err(redeclared(UTF_8, declared));
            }
            (Some(declared), _) => Some(declared),
            (None, true) => Some(UTF_8),
            (None, false) => None,
        };

        match (claimed, self.existing) {
            (Some(claimed), Some(existing)) if claimed != existing => {
                Err(redeclared(existing, claimed))
            }
            (Some(claimed), _) => Ok(claimed),
            (None, Some(existing)) => Ok(existing),
            (None, None) => Ok(self.caller_default.unwrap_or_else(platform_encoding)),
        }
    }
}

fn redeclared(existing: &'static Encoding, claimed: &'static Encoding) -> DictError {
    DictError::with_kind(
        ErrorCategory::User,
        ErrorKind::EncodingRedeclared,
        format!(
            "content declares encoding {} but the dictionary uses {}",
            claimed.name(),
            existing.name()
        ),
    )
}

/// Strictly decodes `bytes`; `None` if any byte sequence is invalid.
pub(crate) fn decode(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(Cow::into_owned)
}

/// Strictly encodes `text`; `None` if a character has no representation.
pub(crate) fn encode<'a>(encoding: &'static Encoding, text: &'a str) -> Option<Cow<'a, [u8]>> {
    let (bytes, _, unmappable) = encoding.encode(text);
    if unmappable { None } else { Some(bytes) }
}
