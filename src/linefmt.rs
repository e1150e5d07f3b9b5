//! The line format shared by the loader and the writer
//!
//! One line holds either a comment (blank, or `#` after leading spaces and
//! tabs) or a pair:
//!
//! ```text
//! name = "value"   # optional trailing comment
//! name = value
//! ```
//!
//! Quoted values escape `"`, `|`, control bytes and DEL as `|XX` with two
//! uppercase hex digits. The format works on bytes so it is agnostic to the
//! (ASCII-compatible) encoding of the text.

const ESCAPE: u8 = b'|';
const QUOTE: u8 = b'"';
const COMMENT: u8 = b'#';
const HEX: &[u8; 16] = b"0123456789ABCDEF";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParsedLine {
    Comment,
    Pair { name: Vec<u8>, value: Vec<u8> },
}

/// Why a line could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SyntaxError {
    pub column: usize,
    pub reason: &'static str,
}

fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn is_name_byte(b: u8) -> bool {
    !is_blank(b) && b != b'=' && b != COMMENT && b != QUOTE && b != b'\r' && b != b'\n'
}

fn skip_blanks(line: &[u8], mut i: usize) -> usize {
    while i < line.len() && is_blank(line[i]) {
        i += 1;
    }
    i
}

pub(crate) fn parse_line(line: &[u8]) -> Result<ParsedLine, SyntaxError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let mut i = skip_blanks(line, 0);
    if i == line.len() || line[i] == COMMENT {
        return Ok(ParsedLine::Comment);
    }

    let name_start = i;
    while i < line.len() && is_name_byte(line[i]) {
        i += 1;
    }
    if i == name_start {
        return Err(SyntaxError {
            column: i,
            reason: "expected a name",
        });
    }
    let name = line[name_start..i].to_vec();

    i = skip_blanks(line, i);
    if i == line.len() || line[i] != b'=' {
        return Err(SyntaxError {
            column: i,
            reason: "expected '=' after name",
        });
    }
    i = skip_blanks(line, i + 1);

    let value = if i < line.len() && line[i] == QUOTE {
        let start = i + 1;
        let end = match line[start..].iter().position(|&b| b == QUOTE) {
            Some(offset) => start + offset,
            None => {
                return Err(SyntaxError {
                    column: i,
                    reason: "unterminated quoted value",
                });
            }
        };
        i = end + 1;
        unescape_value(&line[start..end])
    } else {
        let start = i;
        while i < line.len() && !is_blank(line[i]) && line[i] != COMMENT && line[i] != QUOTE {
            i += 1;
        }
        if i < line.len() && line[i] == QUOTE {
            return Err(SyntaxError {
                column: i,
                reason: "stray quote in unquoted value",
            });
        }
        line[start..i].to_vec()
    };

    i = skip_blanks(line, i);
    if i < line.len() && line[i] != COMMENT {
        return Err(SyntaxError {
            column: i,
            reason: "unexpected text after value",
        });
    }

    Ok(ParsedLine::Pair { name, value })
}

fn needs_escape(b: u8) -> bool {
    b < 0x20 || b == 0x7f || b == QUOTE || b == ESCAPE
}

pub fn escape_value(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if needs_escape(b) {
            out.push(ESCAPE);
            out.push(HEX[(b >> 4) as usize]);
            out.push(HEX[(b & 0x0f) as usize]);
        } else {
            out.push(b);
        }
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// Inverse of [`escape_value`]. A `|` not followed by two hex digits is
/// kept literally.
pub fn unescape_value(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESCAPE {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).copied().and_then(hex_value),
                bytes.get(i + 2).copied().and_then(hex_value),
            ) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Renders `name = "value"` from already-encoded bytes, without newline.
pub(crate) fn render_pair(name: &[u8], value: &[u8]) -> Vec<u8> {
    let escaped = escape_value(value);
    let mut out = Vec::with_capacity(name.len() + escaped.len() + 5);
    out.extend_from_slice(name);
    out.extend_from_slice(b" = \"");
    out.extend_from_slice(&escaped);
    out.push(QUOTE);
    out
}

/// Whether `name` can be written as a name by [`render_pair`] and read back
/// unchanged.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_name_byte)
}
