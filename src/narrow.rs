//! Textual grammars used to narrow untyped strings to concrete kinds
//!
//! Narrowing is total: every `(string, kind)` pair produces a value of that
//! kind. When the text does not fit the grammar a fallback payload is
//! substituted (false, 0, 0.0, or the parsed prefix for numbers) and an
//! issue is reported alongside so the caller can emit a diagnostic.

use std::fmt;

use crate::value::{Kind, TriState, Value};

const TRUE_WORDS: [&str; 6] = ["true", "t", "yes", "y", "on", "1"];
const FALSE_WORDS: [&str; 6] = ["false", "f", "no", "n", "off", "0"];
const DEFAULT_WORDS: [&str; 3] = ["default", "dontcare", "auto"];

/// Why a string did not fully match the grammar of its target kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrowIssue {
    NotBool,
    NotTriState,
    NotInteger,
    IntegerTooBig,
    NotFloat,
}

impl NarrowIssue {
    /// Stable message id for the diagnostics sink.
    pub fn message_id(self) -> &'static str {
        match self {
            NarrowIssue::NotBool => "dictionary.notBool",
            NarrowIssue::NotTriState => "dictionary.notTriState",
            NarrowIssue::NotInteger => "dictionary.notInteger",
            NarrowIssue::IntegerTooBig => "dictionary.integerTooBig",
            NarrowIssue::NotFloat => "dictionary.notFloat",
        }
    }
}

impl fmt::Display for NarrowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NarrowIssue::NotBool => "not a boolean",
            NarrowIssue::NotTriState => "not a boolean or default",
            NarrowIssue::NotInteger => "not an integer",
            NarrowIssue::IntegerTooBig => "integer too big",
            NarrowIssue::NotFloat => "not a float",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Narrowed {
    pub value: Value,
    pub issue: Option<NarrowIssue>,
}

impl Narrowed {
    fn clean(value: Value) -> Self {
        Self { value, issue: None }
    }
}

/// Converts a raw string into a value of `kind`.
///
/// Narrowing to [`Kind::String`] moves the buffer without copying; narrowing
/// to [`Kind::Any`] leaves the value untyped.
pub fn narrow(raw: String, kind: Kind) -> Narrowed {
    match kind {
        Kind::Any => Narrowed::clean(Value::Any(raw)),
        Kind::String => Narrowed::clean(Value::String(raw)),
        Kind::Bool => {
            let (b, issue) = parse_bool(&raw);
            Narrowed {
                value: Value::Bool(b),
                issue,
            }
        }
        Kind::TriState => {
            let (t, issue) = parse_tristate(&raw);
            Narrowed {
                value: Value::TriState(t),
                issue,
            }
        }
        Kind::Int32 => {
            let (i, issue) = parse_int32(&raw);
            Narrowed {
                value: Value::Int32(i),
                issue,
            }
        }
        Kind::Int64 => {
            let (i, issue) = parse_int64(&raw);
            Narrowed {
                value: Value::Int64(i),
                issue,
            }
        }
        Kind::Double => {
            let (d, issue) = parse_double(&raw);
            Narrowed {
                value: Value::Double(d),
                issue,
            }
        }
    }
}

fn is_one_of(s: &str, words: &[&str]) -> bool {
    words.iter().any(|w| s.eq_ignore_ascii_case(w))
}

pub fn parse_bool(s: &str) -> (bool, Option<NarrowIssue>) {
    if s.is_empty() || is_one_of(s, &FALSE_WORDS) {
        (false, None)
    } else if is_one_of(s, &TRUE_WORDS) {
        (true, None)
    } else {
        (false, Some(NarrowIssue::NotBool))
    }
}

pub fn parse_tristate(s: &str) -> (TriState, Option<NarrowIssue>) {
    match parse_bool(s) {
        (b, None) => (TriState::from(b), None),
        (_, Some(_)) if is_one_of(s, &DEFAULT_WORDS) => (TriState::Default, None),
        (_, Some(_)) => (TriState::False, Some(NarrowIssue::NotTriState)),
    }
}

/// Result of scanning an integer the way a base-0 `strtoll` would.
struct WideInt {
    negative: bool,
    magnitude: u128,
    any_digits: bool,
    consumed_all: bool,
}

fn is_c_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn scan_wide_int(s: &str) -> WideInt {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && is_c_space(bytes[i]) {
        i += 1;
    }

    let mut negative = false;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        negative = bytes[i] == b'-';
        i += 1;
    }

    let radix: u32 = if bytes.get(i) == Some(&b'0')
        && matches!(bytes.get(i + 1), Some(b'x') | Some(b'X'))
        && bytes.get(i + 2).is_some_and(|b| b.is_ascii_hexdigit())
    {
        i += 2;
        16
    } else if bytes.get(i) == Some(&b'0') {
        8
    } else {
        10
    };

    let mut magnitude: u128 = 0;
    let mut any_digits = false;
    while i < bytes.len() {
        let digit = match (bytes[i] as char).to_digit(radix) {
            Some(d) => d,
            None => break,
        };
        magnitude = magnitude
            .saturating_mul(radix as u128)
            .saturating_add(digit as u128);
        any_digits = true;
        i += 1;
    }

    WideInt {
        negative,
        magnitude,
        any_digits,
        consumed_all: any_digits && i == bytes.len(),
    }
}

/// Parses with the given bit width, applying the clamping and two's
/// complement rules. Returns the value as an `i128` already reinterpreted
/// into the signed range of `bits`.
fn parse_int_bits(s: &str, bits: u32) -> (i128, Option<NarrowIssue>) {
    if s.is_empty() {
        return (0, None);
    }

    let scanned = scan_wide_int(s);
    if !scanned.any_digits {
        return (0, Some(NarrowIssue::NotInteger));
    }

    let signed_min_magnitude: u128 = 1u128 << (bits - 1);
    let unsigned_max: u128 = (1u128 << bits) - 1;

    let mut issue = None;
    let wide: i128 = if scanned.negative {
        if scanned.magnitude > signed_min_magnitude {
            issue = Some(NarrowIssue::IntegerTooBig);
            -(signed_min_magnitude as i128)
        } else {
            -(scanned.magnitude as i128)
        }
    } else if scanned.magnitude > unsigned_max {
        issue = Some(NarrowIssue::IntegerTooBig);
        unsigned_max as i128
    } else {
        scanned.magnitude as i128
    };

    // Values between the signed and unsigned maximum wrap like a cast.
    let value = if wide >= signed_min_magnitude as i128 {
        wide - (1i128 << bits)
    } else {
        wide
    };

    if issue.is_none() && !scanned.consumed_all {
        issue = Some(NarrowIssue::NotInteger);
    }
    (value, issue)
}

pub fn parse_int32(s: &str) -> (i32, Option<NarrowIssue>) {
    let (v, issue) = parse_int_bits(s, 32);
    (v as i32, issue)
}

pub fn parse_int64(s: &str) -> (i64, Option<NarrowIssue>) {
    let (v, issue) = parse_int_bits(s, 64);
    (v as i64, issue)
}

/// Length of the longest prefix of `s[start..]` that reads as a decimal
/// float, including `inf`, `infinity` and `nan`.
fn float_prefix_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }

    let rest = &bytes[i..];
    for word in ["infinity", "inf", "nan"] {
        if rest.len() >= word.len() && rest[..word.len()].eq_ignore_ascii_case(word.as_bytes()) {
            return i + word.len();
        }
    }

    let mut digits = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        let mut j = i + 1;
        let mut frac = 0;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
            frac += 1;
        }
        if digits + frac > 0 {
            i = j;
            digits += frac;
        }
    }
    if digits == 0 {
        return start;
    }

    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    i
}

pub fn parse_double(s: &str) -> (f64, Option<NarrowIssue>) {
    if s.is_empty() {
        return (0.0, None);
    }

    let bytes = s.as_bytes();
    let mut start = 0;
    while start < bytes.len() && is_c_space(bytes[start]) {
        start += 1;
    }
    let end = float_prefix_end(bytes, start);
    if end == start {
        return (0.0, Some(NarrowIssue::NotFloat));
    }

    // The prefix is pure ASCII, so slicing on these offsets is safe.
    let value = match s[start..end].parse::<f64>() {
        Ok(v) => v,
        Err(_) => return (0.0, Some(NarrowIssue::NotFloat)),
    };
    let issue = (end != bytes.len()).then_some(NarrowIssue::NotFloat);
    (value, issue)
}
