//! Loading line-format content into a dictionary
//!
//! A load runs in two steps. Staging parses every line, negotiates the
//! encoding and decodes all names and values without touching the
//! dictionary; any fatal problem surfaces there. Committing then applies the
//! staged lines and cannot fail, so a failed load leaves the dictionary
//! exactly as it was.

use std::collections::HashSet;
use std::path::Path;

use encoding_rs::Encoding;
use log::debug;

use crate::dictionary::{Dictionary, LineContent, index_key};
use crate::encoding::{self, ENCODING_METAVARIABLE, METAVARIABLE_PREFIX, Negotiation};
use crate::entry::{DefaultLevel, EntryId};
use crate::envelope;
use crate::error::{DictError, ErrorCategory, ErrorKind, Result};
use crate::file_ops;
use crate::linefmt::{self, ParsedLine};
use crate::narrow::narrow;
use crate::value::{Kind, Value};

/// How content is merged into a dictionary.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Level given to every loaded entry. Content loaded at a default level
    /// is never written back and keeps no layout.
    pub default_level: DefaultLevel,
    /// Empty the dictionary first. When false the content is appended and
    /// must agree with the dictionary's encoding.
    pub clear: bool,
    /// Encoding to assume when neither the content nor the dictionary says.
    pub default_encoding: Option<&'static Encoding>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            default_level: DefaultLevel::NotDefault,
            clear: true,
            default_encoding: None,
        }
    }
}

impl LoadOptions {
    /// Appending load of a defaults file.
    pub fn defaults() -> Self {
        Self {
            default_level: DefaultLevel::LoadedDefault,
            clear: false,
            default_encoding: None,
        }
    }

    /// Appending load of a regular file.
    pub fn append() -> Self {
        Self {
            clear: false,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
enum StagedLine {
    Verbatim(Vec<u8>),
    EncodingDecl(Vec<u8>),
    Pair {
        line_no: usize,
        name: String,
        value: String,
        source: Vec<u8>,
    },
}

#[derive(Debug)]
pub(crate) struct Staged {
    bom: bool,
    encoding: &'static Encoding,
    lines: Vec<StagedLine>,
    unknown_metavariables: Vec<String>,
}

struct RawPair {
    line_no: usize,
    name: Vec<u8>,
    value: Vec<u8>,
    source: Vec<u8>,
}

enum RawLine {
    Verbatim(Vec<u8>),
    EncodingDecl(Vec<u8>),
    Pair(RawPair),
}

fn syntax_error(line_no: usize, err: linefmt::SyntaxError) -> DictError {
    DictError::with_kind(
        ErrorCategory::User,
        ErrorKind::Syntax,
        format!(
            "syntax error at line {}, column {}: {}",
            line_no,
            err.column + 1,
            err.reason
        ),
    )
}

fn invalid_bytes(line_no: usize, encoding: &'static Encoding) -> DictError {
    DictError::with_kind(
        ErrorCategory::User,
        ErrorKind::EncodingInvalid,
        format!("line {} is not valid {}", line_no, encoding.name()),
    )
}

/// Splits on `\n`. A trailing newline does not start another line.
fn split_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let empty = bytes.is_empty();
    body.split(|&b| b == b'\n').filter(move |_| !empty)
}

impl Dictionary {
    /// Parses `bytes` and merges the result into the dictionary.
    ///
    /// Fatal problems (syntax errors, bytes invalid in the resolved
    /// encoding, a conflicting encoding declaration) leave the dictionary
    /// unchanged. A name defined twice keeps its first definition; the rest
    /// of the content is committed and [`ErrorKind::DuplicateName`] is
    /// returned afterwards.
    pub fn load_from_buffer(&mut self, bytes: &[u8], opts: LoadOptions) -> Result<()> {
        let existing = if opts.clear { None } else { self.encoding };
        let staged = stage(bytes, existing, opts.default_encoding)?;
        if opts.clear {
            self.clear();
        }
        let duplicates = self.commit(staged, opts.default_level, false);
        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(DictError::with_kind(
                ErrorCategory::User,
                ErrorKind::DuplicateName,
                format!("duplicate definitions of {}", duplicates.join(", ")),
            ))
        }
    }

    pub fn load_file(&mut self, path: &Path, opts: LoadOptions) -> Result<()> {
        let bytes = file_ops::read_file(path)?;
        debug!("loading {} ({} bytes)", path.display(), bytes.len());
        self.load_from_buffer(&bytes, opts).map_err(|e| {
            let msg = format!("failed to load {}", path.display());
            e.with_context(msg)
        })
    }

    /// Applies staged content. Returns the names that were defined more than
    /// once. `decrypted` marks content coming out of the envelope: it is not
    /// plaintext-exempt and does not carry its own layout metadata.
    pub(crate) fn commit(
        &mut self,
        staged: Staged,
        level: DefaultLevel,
        decrypted: bool,
    ) -> Vec<String> {
        let keep_layout = level == DefaultLevel::NotDefault;
        let mut seen = HashSet::new();
        let mut touched: Vec<EntryId> = Vec::new();
        let mut duplicates = Vec::new();

        for name in staged.unknown_metavariables {
            self.diagnostics.warn(
                "dictionary.unknownMetavariable",
                format!("unknown metavariable '{}' kept as is", name),
            );
        }

        for line in staged.lines {
            match line {
                StagedLine::Verbatim(text) => {
                    if keep_layout {
                        self.push_line(LineContent::Verbatim(text));
                    }
                }
                StagedLine::EncodingDecl(text) => {
                    let have_decl = self
                        .lines
                        .iter()
                        .any(|l| matches!(l.content, LineContent::EncodingDecl { .. }));
                    if keep_layout && !have_decl {
                        self.push_line(LineContent::EncodingDecl {
                            text,
                            encoding: staged.encoding,
                        });
                    }
                }
                StagedLine::Pair {
                    line_no,
                    name,
                    value,
                    source,
                } => {
                    if !seen.insert(index_key(&name)) {
                        self.diagnostics.warn(
                            "dictionary.duplicate",
                            format!(
                                "'{}' on line {} is already defined; keeping the first value",
                                name, line_no
                            ),
                        );
                        duplicates.push(name);
                        continue;
                    }
                    let id = self.commit_pair(name, value, Some(source), level);
                    if keep_layout {
                        let old_line = self.entries.get(&id).and_then(|e| e.write_line);
                        if let Some(old_line) = old_line {
                            self.lines.retain(|l| l.id != old_line);
                        }
                        let line = self.push_line(LineContent::Entry(id));
                        if let Some(entry) = self.entries.get_mut(&id) {
                            entry.write_line = Some(line);
                        }
                    }
                    touched.push(id);
                }
            }
        }

        let enveloped = !decrypted
            && touched.iter().any(|id| {
                self.entries
                    .get(id)
                    .is_some_and(|e| envelope::is_envelope_name(&e.name))
            });
        for id in &touched {
            if let Some(entry) = self.entries.get_mut(id) {
                if decrypted {
                    if !entry.version_spec {
                        entry.dont_encrypt = false;
                    }
                } else if enveloped {
                    entry.dont_encrypt = true;
                }
            }
        }

        self.encoding = Some(staged.encoding);
        if keep_layout && !decrypted {
            self.bom |= staged.bom;
            self.declare_encoding = false;
        }
        debug!(
            "committed {} entries ({})",
            touched.len(),
            staged.encoding.name()
        );
        duplicates
    }

    /// Stores loaded text under `name`. An existing entry keeps its kind and
    /// takes the text narrowed to it.
    pub(crate) fn commit_pair(
        &mut self,
        name: String,
        text: String,
        source: Option<Vec<u8>>,
        level: DefaultLevel,
    ) -> EntryId {
        let Some(id) = self.find_id(&name) else {
            let id = self.insert_entry(name, Value::Any(text), level);
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.source = source;
            }
            return id;
        };

        if let Some(entry) = self.entries.get_mut(&id) {
            let kind = entry.kind();
            entry.value = if kind == Kind::Any {
                Value::Any(text)
            } else {
                let narrowed = narrow(text.clone(), kind);
                if let Some(issue) = narrowed.issue {
                    self.diagnostics.warn(
                        issue.message_id(),
                        format!("value '{}' for '{}' is {}", text, entry.name, issue),
                    );
                }
                narrowed.value
            };
            entry.source = source;
            entry.modified = false;
            entry.default_level = level;
        }
        id
    }
}

/// Parses and decodes `bytes` without touching any dictionary.
pub(crate) fn stage(
    bytes: &[u8],
    existing: Option<&'static Encoding>,
    caller_default: Option<&'static Encoding>,
) -> Result<Staged> {
    let (bom, body) = encoding::strip_bom(bytes);

    let mut raw_lines = Vec::new();
    let mut declared: Option<&'static Encoding> = None;
    let mut unknown_metavariables = Vec::new();

    for (i, line) in split_lines(body).enumerate() {
        let line_no = i + 1;
        let (name, value) = match linefmt::parse_line(line).map_err(|e| syntax_error(line_no, e))? {
            ParsedLine::Comment => {
                raw_lines.push(RawLine::Verbatim(line.to_vec()));
                continue;
            }
            ParsedLine::Pair { name, value } => (name, value),
        };

        if name.first() != Some(&(METAVARIABLE_PREFIX as u8)) {
            raw_lines.push(RawLine::Pair(RawPair {
                line_no,
                name,
                value,
                source: line.to_vec(),
            }));
            continue;
        }

        if !name.eq_ignore_ascii_case(ENCODING_METAVARIABLE.as_bytes()) {
            unknown_metavariables.push(String::from_utf8_lossy(&name).into_owned());
            raw_lines.push(RawLine::Verbatim(line.to_vec()));
            continue;
        }

        let label = std::str::from_utf8(&value).map_err(|_| {
            DictError::with_kind(
                ErrorCategory::User,
                ErrorKind::UnknownEncoding,
                format!("line {}: encoding label is not ASCII", line_no),
            )
        })?;
        let named = encoding::lookup(label)
            .map_err(|e| e.with_context(format!("line {}: bad encoding declaration", line_no)))?;
        match declared {
            Some(previous) if previous != named => {
                return Err(DictError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::EncodingRedeclared,
                    format!(
                        "line {} declares {} after {} was declared",
                        line_no,
                        named.name(),
                        previous.name()
                    ),
                ));
            }
            _ => declared = Some(named),
        }
        raw_lines.push(RawLine::EncodingDecl(line.to_vec()));
    }

    let resolved = Negotiation {
        existing,
        declared,
        bom,
        caller_default,
    }
    .resolve()?;

    let mut lines = Vec::with_capacity(raw_lines.len());
    for raw in raw_lines {
        lines.push(match raw {
            RawLine::Verbatim(text) => StagedLine::Verbatim(text),
            RawLine::EncodingDecl(text) => StagedLine::EncodingDecl(text),
            RawLine::Pair(pair) => {
                let name = encoding::decode(resolved, &pair.name)
                    .ok_or_else(|| invalid_bytes(pair.line_no, resolved))?;
                let value = encoding::decode(resolved, &pair.value)
                    .ok_or_else(|| invalid_bytes(pair.line_no, resolved))?;
                StagedLine::Pair {
                    line_no: pair.line_no,
                    name,
                    value,
                    source: pair.source,
                }
            }
        });
    }

    Ok(Staged {
        bom,
        encoding: resolved,
        lines,
        unknown_metavariables,
    })
}

impl Staged {
    /// Whether the staged content defines `name`.
    pub(crate) fn defines(&self, name: &str) -> bool {
        self.lines.iter().any(|l| match l {
            StagedLine::Pair { name: n, .. } => n.eq_ignore_ascii_case(name),
            _ => false,
        })
    }
}
