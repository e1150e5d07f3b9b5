//! Serializing a dictionary back to the line format
//!
//! Output is produced in three phases. Nothing is marked written up front.
//! Then the fixed prefix goes out: the leading comment block, the encoding
//! declaration, version-spec entries and, when encrypting, the entries
//! exempt from encryption. Last, the original line order is replayed for
//! everything not yet written, followed by entries that never had a line.
//!
//! When the dictionary holds a key, the replayed part is encrypted and
//! replaced by the two envelope entries.

use std::collections::HashSet;
use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use encoding_rs::{Encoding, UTF_8};
use log::debug;
use zeroize::Zeroizing;

use crate::dictionary::{Dictionary, LineContent};
use crate::encoding::{self, ENCODING_METAVARIABLE, UTF8_BOM, platform_encoding};
use crate::entry::{Entry, EntryId, LineId};
use crate::envelope::{self, DATA_ENTRY, KEYSAFE_ENTRY, PAYLOAD_MAC};
use crate::error::{DictError, ErrorCategory, ErrorKind, Result};
use crate::file_ops;
use crate::linefmt;

fn unrepresentable(what: &str, name: &str, encoding: &'static Encoding) -> DictError {
    DictError::with_kind(
        ErrorCategory::User,
        ErrorKind::EncodingUnrepresentable,
        format!(
            "{} of '{}' cannot be represented in {}",
            what,
            name,
            encoding.name()
        ),
    )
}

fn push_line(out: &mut Vec<u8>, line: &[u8]) {
    out.extend_from_slice(line);
    out.push(b'\n');
}

/// Renders `entry`: its source line if the value is still the loaded one,
/// otherwise a fresh `name = "value"` line.
fn render_entry(entry: &Entry, encoding: &'static Encoding, out: &mut Vec<u8>) -> Result<()> {
    if let Some(source) = &entry.source {
        push_line(out, source);
        return Ok(());
    }
    let name = encoding::encode(encoding, &entry.name)
        .ok_or_else(|| unrepresentable("name", &entry.name, encoding))?;
    let text = entry.value.to_text();
    let value = encoding::encode(encoding, &text)
        .ok_or_else(|| unrepresentable("value", &entry.name, encoding))?;
    push_line(out, &linefmt::render_pair(&name, &value));
    Ok(())
}

struct Writer<'a> {
    dict: &'a Dictionary,
    encoding: &'static Encoding,
    written: HashSet<EntryId>,
    written_lines: HashSet<LineId>,
}

impl<'a> Writer<'a> {
    fn new(dict: &'a Dictionary) -> Self {
        Self {
            dict,
            encoding: dict.encoding.unwrap_or_else(platform_encoding),
            written: HashSet::new(),
            written_lines: HashSet::new(),
        }
    }

    fn entry(&mut self, entry: &Entry, out: &mut Vec<u8>) -> Result<()> {
        render_entry(entry, self.encoding, out)?;
        self.written.insert(entry.id);
        Ok(())
    }

    fn prefix(&mut self, encrypting: bool, out: &mut Vec<u8>) -> Result<()> {
        let dict = self.dict;
        if dict.bom && self.encoding == UTF_8 {
            out.extend_from_slice(UTF8_BOM);
        }

        let mut declared = false;
        for line in &dict.lines {
            match &line.content {
                LineContent::Verbatim(text) => push_line(out, text),
                LineContent::EncodingDecl { text, encoding } => {
                    self.declaration(text, *encoding, out);
                    declared = true;
                }
                LineContent::Entry(_) => break,
            }
            self.written_lines.insert(line.id);
        }

        // A declaration below the first entry stays where it is, unless the
        // body is about to be encrypted.
        if !declared {
            let later = dict.lines.iter().find_map(|line| match &line.content {
                LineContent::EncodingDecl { text, encoding } => Some((line.id, text, *encoding)),
                _ => None,
            });
            match later {
                Some((id, text, encoding)) if encrypting => {
                    self.declaration(text, encoding, out);
                    self.written_lines.insert(id);
                }
                Some(_) => {}
                None if dict.declare_encoding => self.declare(out),
                None => {}
            }
        }

        for entry in dict.entries.values() {
            if entry.version_spec && entry.should_persist() {
                self.entry(entry, out)?;
            }
        }
        if encrypting {
            for entry in dict.entries.values() {
                if entry.dont_encrypt && !self.written.contains(&entry.id) && entry.should_persist()
                {
                    self.entry(entry, out)?;
                }
            }
        }
        Ok(())
    }

    /// A loaded declaration: verbatim while it still names the dictionary's
    /// encoding, otherwise replaced by a fresh one.
    fn declaration(&self, text: &[u8], declared: &'static Encoding, out: &mut Vec<u8>) {
        if declared == self.encoding {
            push_line(out, text);
        } else {
            self.declare(out);
        }
    }

    fn declare(&self, out: &mut Vec<u8>) {
        push_line(
            out,
            &linefmt::render_pair(
                ENCODING_METAVARIABLE.as_bytes(),
                self.encoding.name().as_bytes(),
            ),
        );
    }

    /// Replays the remaining lines, then appends entries that have none.
    fn body(&mut self, encrypting: bool, out: &mut Vec<u8>) -> Result<()> {
        let dict = self.dict;
        let mut replayed = false;

        for line in &dict.lines {
            if self.written_lines.contains(&line.id) {
                continue;
            }
            match &line.content {
                LineContent::Verbatim(text) => {
                    push_line(out, text);
                    replayed = true;
                }
                LineContent::EncodingDecl { text, encoding } => {
                    self.declaration(text, *encoding, out);
                    replayed = true;
                }
                LineContent::Entry(id) => {
                    let Some(entry) = dict.entries.get(id) else {
                        continue;
                    };
                    if self.written.contains(id) || !entry.should_persist() {
                        continue;
                    }
                    if encrypting && envelope::is_envelope_name(&entry.name) {
                        continue;
                    }
                    self.entry(entry, out)?;
                    replayed = true;
                }
            }
        }

        let fresh: Vec<&Entry> = dict
            .entries
            .values()
            .filter(|e| !self.written.contains(&e.id) && e.should_persist())
            .filter(|e| !(encrypting && envelope::is_envelope_name(&e.name)))
            .collect();
        if !fresh.is_empty() && replayed {
            out.push(b'\n');
        }
        for entry in fresh {
            self.entry(entry, out)?;
        }
        Ok(())
    }
}

impl Dictionary {
    /// Serializes the dictionary.
    ///
    /// An unmodified dictionary loaded from a buffer is written back byte
    /// for byte. Fails with [`ErrorKind::EncodingUnrepresentable`] if some
    /// rendered value has no representation in the dictionary's encoding;
    /// switching to UTF-8 with [`Dictionary::change_encoding`] and retrying
    /// always succeeds.
    pub fn write_to_buffer(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(self);
        let mut out = Vec::new();

        let Some(key) = &self.key else {
            if self.is_locked() {
                self.check_locked_writable()?;
            }
            writer.prefix(false, &mut out)?;
            writer.body(false, &mut out)?;
            debug!("wrote {} bytes ({})", out.len(), writer.encoding.name());
            return Ok(out);
        };

        let key_safe = self.key_safe.as_ref().ok_or_else(|| {
            DictError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "dictionary holds a key without a key-safe",
            )
        })?;
        let crypto = self.provider()?;

        writer.prefix(true, &mut out)?;
        let mut secret = Zeroizing::new(Vec::new());
        writer.body(true, &mut secret)?;

        let ciphertext = crypto
            .encrypt_with_mac(key, PAYLOAD_MAC, &secret)
            .map_err(|e| e.with_context("failed to encrypt dictionary"))?;
        let exported = crypto.export(key_safe)?;

        push_line(
            &mut out,
            &linefmt::render_pair(KEYSAFE_ENTRY.as_bytes(), exported.as_bytes()),
        );
        push_line(
            &mut out,
            &linefmt::render_pair(DATA_ENTRY.as_bytes(), STANDARD.encode(ciphertext).as_bytes()),
        );
        debug!(
            "wrote {} bytes, {} of them encrypted",
            out.len(),
            secret.len()
        );
        Ok(out)
    }

    /// A locked dictionary can only be written back if every entry that
    /// would be persisted belongs in plaintext.
    fn check_locked_writable(&self) -> Result<()> {
        let leaked = self.entries.values().find(|e| {
            e.should_persist()
                && !e.dont_encrypt
                && !e.version_spec
                && !envelope::is_envelope_name(&e.name)
        });
        match leaked {
            Some(entry) => Err(DictError::with_kind(
                ErrorCategory::User,
                ErrorKind::Locked,
                format!(
                    "'{}' would be written in plaintext next to encrypted data; unlock first",
                    entry.name
                ),
            )),
            None => Ok(()),
        }
    }

    /// Writes the dictionary to `path` atomically, readable by the owner only.
    pub fn write_file(&self, path: &Path) -> Result<()> {
        let bytes = self.write_to_buffer()?;
        file_ops::write_file_atomic(path, &bytes)
            .map_err(|e| e.with_context(format!("failed to write {}", path.display())))
    }
}
