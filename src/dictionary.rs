//! The dictionary: a flat, ordered, typed key/value store
//!
//! A [`Dictionary`] keeps two ordered collections in loose sync:
//!
//! - entries, in insertion order, with a case-insensitive name index;
//! - write lines, the textual layout of the source (comments, blank lines,
//!   the position of every loaded entry), replayed by the writer.
//!
//! A write line refers to an entry by id only. Removing an entry removes its
//! lines in the same pass; a line whose entry is gone is skipped anyway.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use encoding_rs::Encoding;
use log::info;

use crate::crypto::{CryptoProvider, Key, KeySafe};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::encoding::{self, METAVARIABLE_PREFIX};
use crate::entry::{DefaultLevel, Entry, EntryId, LineId, SetFlags};
use crate::envelope;
use crate::error::{DictError, ErrorCategory, ErrorKind, Result};
use crate::linefmt;
use crate::narrow::narrow;
use crate::value::{DictValue, Kind, Value};

#[derive(Debug, Clone)]
pub(crate) enum LineContent {
    /// Comment, blank line, or unknown metavariable, kept byte for byte.
    Verbatim(Vec<u8>),
    /// The line that renders an entry.
    Entry(EntryId),
    /// The source's `.encoding` declaration and the encoding it named.
    EncodingDecl {
        text: Vec<u8>,
        encoding: &'static Encoding,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct WriteLine {
    pub id: LineId,
    pub content: LineContent,
}

/// Which entries a lookup may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visibility {
    /// Plaintext-exempt entries of an encrypted dictionary are hidden.
    Masked,
    All,
}

/// Counts from [`Dictionary::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub updated: usize,
    pub added: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct Dictionary {
    pub(crate) entries: BTreeMap<EntryId, Entry>,
    pub(crate) index: HashMap<String, EntryId>,
    pub(crate) lines: Vec<WriteLine>,
    next_entry: u64,
    next_line: u64,
    pub(crate) encoding: Option<&'static Encoding>,
    /// Emit an `.encoding` line even if the source had none.
    pub(crate) declare_encoding: bool,
    pub(crate) bom: bool,
    pub(crate) crypto: Option<Arc<dyn CryptoProvider>>,
    pub(crate) key_safe: Option<KeySafe>,
    pub(crate) key: Option<Key>,
    pub(crate) diagnostics: Diagnostics,
}

pub(crate) fn index_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

pub(crate) fn has_prefix_ignore_case(name: &str, prefix: &str) -> bool {
    name.len() >= prefix.len()
        && name.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.starts_with(METAVARIABLE_PREFIX) {
        return Err(DictError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidName,
            format!("'{}' is reserved for metavariables", name),
        ));
    }
    if !linefmt::is_valid_name(name) {
        return Err(DictError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidName,
            format!("'{}' is not a valid entry name", name),
        ));
    }
    Ok(())
}

fn kind_mismatch(name: &str, have: Kind, want: Kind) -> DictError {
    DictError::with_kind(
        ErrorCategory::User,
        ErrorKind::KindMismatch,
        format!("entry '{}' is a {}, not a {}", name, have, want),
    )
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl Dictionary {
    /// An empty plaintext dictionary with no crypto provider. Encrypted
    /// content can be loaded and written back, but not unlocked.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            lines: Vec::new(),
            next_entry: 0,
            next_line: 0,
            encoding: None,
            declare_encoding: true,
            bom: false,
            crypto: None,
            key_safe: None,
            key: None,
            diagnostics: Diagnostics::new(),
        }
    }

    /// An empty dictionary that uses `crypto` for unlocking and encrypting.
    pub fn with_crypto(crypto: Arc<dyn CryptoProvider>) -> Self {
        let mut dict = Self::new();
        dict.crypto = Some(crypto);
        dict
    }

    pub fn set_crypto_provider(&mut self, crypto: Arc<dyn CryptoProvider>) {
        self.crypto = Some(crypto);
    }

    /// Drops every entry, line, the encoding, and any key material. The
    /// crypto provider and accumulated diagnostics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.lines.clear();
        self.encoding = None;
        self.declare_encoding = true;
        self.bom = false;
        self.key_safe = None;
        self.key = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encoding(&self) -> Option<&'static Encoding> {
        self.encoding
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.take()
    }

    // ---- storage primitives -------------------------------------------

    pub(crate) fn find_id(&self, name: &str) -> Option<EntryId> {
        self.index.get(&index_key(name)).copied()
    }

    pub(crate) fn is_masked(&self, entry: &Entry) -> bool {
        entry.dont_encrypt && self.is_encrypted()
    }

    pub(crate) fn lookup(&self, name: &str, visibility: Visibility) -> Option<&Entry> {
        let entry = self.entries.get(&self.find_id(name)?)?;
        if visibility == Visibility::Masked && self.is_masked(entry) {
            return None;
        }
        Some(entry)
    }

    pub(crate) fn insert_entry(&mut self, name: String, value: Value, level: DefaultLevel) -> EntryId {
        let id = EntryId(self.next_entry);
        self.next_entry += 1;
        self.index.insert(index_key(&name), id);
        self.entries.insert(id, Entry::new(id, name, value, level));
        id
    }

    pub(crate) fn push_line(&mut self, content: LineContent) -> LineId {
        let id = LineId(self.next_line);
        self.next_line += 1;
        self.lines.push(WriteLine { id, content });
        id
    }

    fn remove_ids(&mut self, doomed: &HashSet<EntryId>) {
        if doomed.is_empty() {
            return;
        }
        self.entries.retain(|id, _| !doomed.contains(id));
        self.index.retain(|_, id| !doomed.contains(id));
        self.lines.retain(|line| match line.content {
            LineContent::Entry(id) => !doomed.contains(&id),
            _ => true,
        });
    }

    /// Narrows an untyped entry to `kind`, reporting text that does not fit.
    fn narrow_entry(&mut self, id: EntryId, kind: Kind) -> Result<()> {
        let entry = self.entries.get_mut(&id).ok_or_else(|| {
            DictError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "narrowing an entry that does not exist",
            )
        })?;

        let have = entry.kind();
        if have == kind {
            return Ok(());
        }
        let raw = match &mut entry.value {
            Value::Any(raw) => std::mem::take(raw),
            _ => return Err(kind_mismatch(&entry.name, have, kind)),
        };

        let narrowed = narrow(raw.clone(), kind);
        if let Some(issue) = narrowed.issue {
            self.diagnostics.warn(
                issue.message_id(),
                format!(
                    "value '{}' for '{}' is {}; using {}",
                    raw,
                    entry.name,
                    issue,
                    narrowed.value.to_text()
                ),
            );
        }
        entry.value = narrowed.value;
        Ok(())
    }

    // ---- typed access -------------------------------------------------

    /// Narrows the named entry to `kind`.
    ///
    /// Narrowing to the kind the entry already has is a no-op; narrowing a
    /// typed entry to any other kind fails.
    pub fn narrow(&mut self, name: &str, kind: Kind) -> Result<()> {
        let id = self.find_id(name).ok_or_else(|| {
            DictError::with_kind(
                ErrorCategory::User,
                ErrorKind::NotFound,
                format!("no entry named '{}'", name),
            )
        })?;
        self.narrow_entry(id, kind)
    }

    /// Returns the value of `name` as `T`, creating the entry with
    /// `default` (as a compiled default) if it does not exist.
    ///
    /// An untyped entry is narrowed to `T`'s kind on first access. Fails only
    /// if the entry already has a different kind. A plaintext-exempt entry
    /// of an encrypted dictionary is invisible here and yields `default`.
    pub fn get<T: DictValue>(&mut self, name: &str, default: T) -> Result<T> {
        self.get_with(name, default, Visibility::Masked)
    }

    /// Like [`Dictionary::get`], but also sees plaintext-exempt entries.
    pub fn get_plaintext<T: DictValue>(&mut self, name: &str, default: T) -> Result<T> {
        self.get_with(name, default, Visibility::All)
    }

    fn get_with<T: DictValue>(&mut self, name: &str, default: T, visibility: Visibility) -> Result<T> {
        let id = match self.find_id(name) {
            Some(id) => id,
            None => {
                validate_name(name)?;
                self.insert_entry(
                    name.to_string(),
                    default.clone().into_value(),
                    DefaultLevel::CompiledDefault,
                );
                return Ok(default);
            }
        };

        if visibility == Visibility::Masked
            && self.entries.get(&id).is_some_and(|e| self.is_masked(e))
        {
            return Ok(default);
        }

        self.narrow_entry(id, T::KIND)?;
        let entry = &self.entries[&id];
        let current =
            T::from_value(&entry.value).ok_or_else(|| kind_mismatch(name, entry.kind(), T::KIND))?;

        // A compiled-in default that disagrees with an earlier default for
        // the same name is a programming error.
        if cfg!(debug_assertions)
            && entry.default_level != DefaultLevel::NotDefault
            && !entry.modified
            && current != default
        {
            let text = format!(
                "'{}' has default {} but was requested with default {}",
                name,
                entry.value.to_text(),
                default.into_value().to_text()
            );
            self.diagnostics.error("dictionary.redefined", text);
        }
        Ok(current)
    }

    /// Creates or overwrites `name`.
    ///
    /// The entry becomes `NotDefault` and is marked modified if the value
    /// changed, unless `flags.version_spec` is set. Setting a value of a
    /// different kind than an existing typed entry fails, and so does
    /// setting a value that would need encryption while the dictionary is
    /// locked.
    pub fn set<T: DictValue>(&mut self, name: &str, value: T, flags: SetFlags) -> Result<()> {
        self.set_value(name, value.into_value(), flags)
    }

    pub(crate) fn set_value(&mut self, name: &str, value: Value, flags: SetFlags) -> Result<()> {
        if self.is_locked() && !flags.dont_encrypt && !flags.version_spec {
            return Err(DictError::with_kind(
                ErrorCategory::User,
                ErrorKind::Locked,
                format!("cannot set '{}': the dictionary is locked", name),
            ));
        }
        let kind = value.kind();
        let id = match self.find_id(name) {
            Some(id) => id,
            None => {
                validate_name(name)?;
                let id = self.insert_entry(name.to_string(), value, DefaultLevel::NotDefault);
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.modified = !flags.version_spec;
                    entry.version_spec = flags.version_spec;
                    entry.dont_encrypt = flags.dont_encrypt;
                }
                return Ok(());
            }
        };

        let entry = self.entries.get_mut(&id).ok_or_else(|| {
            DictError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "name index points at a missing entry",
            )
        })?;

        // The old text is being replaced, so narrow it quietly for comparison.
        if let Value::Any(raw) = &mut entry.value {
            if kind != Kind::Any {
                entry.value = narrow(std::mem::take(raw), kind).value;
            }
        }
        if entry.kind() != kind {
            return Err(kind_mismatch(name, entry.kind(), kind));
        }

        entry.replace_value(value, !flags.version_spec);
        entry.default_level = DefaultLevel::NotDefault;
        entry.version_spec |= flags.version_spec;
        entry.dont_encrypt = flags.dont_encrypt;
        Ok(())
    }

    // ---- queries ------------------------------------------------------

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.lookup(name, Visibility::Masked)
    }

    pub fn entry_plaintext(&self, name: &str) -> Option<&Entry> {
        self.lookup(name, Visibility::All)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// True if `name` is absent or still holds its compiled-in default.
    pub fn not_set(&self, name: &str) -> bool {
        match self.entry(name) {
            None => true,
            Some(e) => e.default_level == DefaultLevel::CompiledDefault && !e.modified,
        }
    }

    /// The value of `name` rendered as text, whatever its kind.
    pub fn get_as_string(&self, name: &str) -> Option<String> {
        self.entry(name).map(|e| e.value.to_text())
    }

    pub fn get_as_string_plaintext(&self, name: &str) -> Option<String> {
        self.entry_plaintext(name).map(|e| e.value.to_text())
    }

    /// Visible entry names starting with `prefix` (case-insensitive), in
    /// insertion order.
    pub fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.names_with_prefix_in(prefix, Visibility::Masked)
    }

    /// Like [`Dictionary::names_with_prefix`], including plaintext-exempt
    /// entries of an encrypted dictionary.
    pub fn names_with_prefix_plaintext(&self, prefix: &str) -> Vec<String> {
        self.names_with_prefix_in(prefix, Visibility::All)
    }

    fn names_with_prefix_in(&self, prefix: &str, visibility: Visibility) -> Vec<String> {
        self.iter_with(true, visibility)
            .filter(|e| has_prefix_ignore_case(&e.name, prefix))
            .map(|e| e.name.clone())
            .collect()
    }

    pub(crate) fn iter_with(
        &self,
        include_defaults: bool,
        visibility: Visibility,
    ) -> impl Iterator<Item = &Entry> {
        self.entries.values().filter(move |e| {
            (include_defaults || e.default_level != DefaultLevel::CompiledDefault || e.modified)
                && (visibility == Visibility::All || !self.is_masked(e))
        })
    }

    /// Entries in insertion order. Unmodified compiled defaults are skipped
    /// unless `include_defaults`; plaintext-exempt entries of an encrypted
    /// dictionary are always skipped.
    pub fn iter(&self, include_defaults: bool) -> impl Iterator<Item = &Entry> {
        self.iter_with(include_defaults, Visibility::Masked)
    }

    pub fn iter_plaintext(&self, include_defaults: bool) -> impl Iterator<Item = &Entry> {
        self.iter_with(include_defaults, Visibility::All)
    }

    pub fn iterate<F: FnMut(&Entry)>(&self, include_defaults: bool, mut f: F) {
        for entry in self.iter(include_defaults) {
            f(entry);
        }
    }

    /// Logs every visible entry that would be persisted.
    pub fn log_entries(&self) {
        for entry in self.iter(false).filter(|e| e.should_persist()) {
            info!("DICT {:>25} = \"{}\"", entry.name, entry.value.to_text());
        }
    }

    // ---- removal ------------------------------------------------------

    /// Removes `name` and its write line. Returns whether it existed.
    pub fn unset(&mut self, name: &str) -> bool {
        match self.find_id(name) {
            Some(id) => {
                self.remove_ids(&HashSet::from([id]));
                true
            }
            None => false,
        }
    }

    /// Removes every visible entry whose name starts with `prefix`
    /// (case-insensitive). Returns how many were removed.
    pub fn unset_with_prefix(&mut self, prefix: &str) -> usize {
        let doomed: HashSet<EntryId> = self
            .entries
            .values()
            .filter(|e| has_prefix_ignore_case(&e.name, prefix) && !self.is_masked(e))
            .map(|e| e.id)
            .collect();
        self.remove_ids(&doomed);
        doomed.len()
    }

    // ---- bulk and merge -----------------------------------------------

    /// Sets every visible entry under `prefix` whose kind is `T`'s (or
    /// untyped) to `value`. Returns how many entries were touched.
    pub fn set_all<T: DictValue>(&mut self, prefix: &str, value: T) -> usize {
        let ids: Vec<EntryId> = self
            .entries
            .values()
            .filter(|e| has_prefix_ignore_case(&e.name, prefix) && !self.is_masked(e))
            .filter(|e| e.kind() == Kind::Any || e.kind() == T::KIND)
            .map(|e| e.id)
            .collect();

        for id in &ids {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.replace_value(value.clone().into_value(), true);
                entry.default_level = DefaultLevel::NotDefault;
            }
        }
        ids.len()
    }

    /// Merges `other` into this dictionary.
    ///
    /// Matching names take `other`'s value; an untyped side is narrowed to
    /// the typed side's kind, and a real kind conflict skips the entry. When
    /// this dictionary is encrypted, a plaintext-exempt entry only accepts
    /// plaintext-exempt values, and new names are only accepted if they are
    /// plaintext-exempt. Skips are reported as diagnostics.
    pub fn update(&mut self, other: &Dictionary) -> UpdateSummary {
        let encrypted = self.is_encrypted();
        let mut summary = UpdateSummary::default();

        for incoming in other.entries.values() {
            if envelope::is_envelope_name(&incoming.name)
                || (incoming.default_level == DefaultLevel::CompiledDefault && !incoming.modified)
            {
                continue;
            }

            let Some(id) = self.find_id(&incoming.name) else {
                if encrypted && !incoming.dont_encrypt {
                    self.diagnostics.warn(
                        "dictionary.updateRejected",
                        format!(
                            "not adding '{}' to an encrypted dictionary",
                            incoming.name
                        ),
                    );
                    summary.skipped += 1;
                    continue;
                }
                let id = self.insert_entry(
                    incoming.name.clone(),
                    incoming.value.clone(),
                    DefaultLevel::NotDefault,
                );
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.modified = true;
                    entry.dont_encrypt = incoming.dont_encrypt;
                    entry.version_spec = incoming.version_spec;
                }
                summary.added += 1;
                continue;
            };

            let (old_kind, old_dont_encrypt) = match self.entries.get(&id) {
                Some(e) => (e.kind(), e.dont_encrypt),
                None => continue,
            };

            if encrypted && old_dont_encrypt && !incoming.dont_encrypt {
                self.diagnostics.warn(
                    "dictionary.updatePlaintext",
                    format!(
                        "not replacing plaintext '{}' with a value meant for encryption",
                        incoming.name
                    ),
                );
                summary.skipped += 1;
                continue;
            }

            let new_kind = incoming.kind();
            let value = if old_kind == new_kind {
                incoming.value.clone()
            } else if old_kind == Kind::Any {
                if self.narrow_entry(id, new_kind).is_err() {
                    summary.skipped += 1;
                    continue;
                }
                incoming.value.clone()
            } else if let Value::Any(raw) = &incoming.value {
                let narrowed = narrow(raw.clone(), old_kind);
                if let Some(issue) = narrowed.issue {
                    self.diagnostics.warn(
                        issue.message_id(),
                        format!("value '{}' for '{}' is {}", raw, incoming.name, issue),
                    );
                }
                narrowed.value
            } else {
                self.diagnostics.warn(
                    "dictionary.updateKindMismatch",
                    format!(
                        "'{}' is a {} here but a {} in the update; left untouched",
                        incoming.name, old_kind, new_kind
                    ),
                );
                summary.skipped += 1;
                continue;
            };

            if let Some(entry) = self.entries.get_mut(&id) {
                if entry.replace_value(value, true) {
                    entry.default_level = DefaultLevel::NotDefault;
                    summary.updated += 1;
                } else {
                    summary.unchanged += 1;
                }
            }
        }
        summary
    }

    // ---- encoding -----------------------------------------------------

    /// Switches the dictionary to `target`, transcoding every value and
    /// every preserved source line. Fails without changing anything if some
    /// text has no representation in `target`.
    pub fn change_encoding(&mut self, target: &'static Encoding) -> Result<()> {
        let target = encoding::lookup(target.name())?;
        let unrepresentable = |what: &str| {
            DictError::with_kind(
                ErrorCategory::User,
                ErrorKind::EncodingUnrepresentable,
                format!("{} cannot be represented in {}", what, target.name()),
            )
        };

        for entry in self.entries.values() {
            if let Some(text) = entry.value.as_str() {
                if encoding::encode(target, text).is_none() {
                    return Err(unrepresentable(&format!("value of '{}'", entry.name)));
                }
            }
            if encoding::encode(target, &entry.name).is_none() {
                return Err(unrepresentable(&format!("name '{}'", entry.name)));
            }
        }

        let current = match self.encoding {
            Some(current) if current != target => current,
            _ => {
                self.encoding = Some(target);
                self.declare_encoding = true;
                return Ok(());
            }
        };

        let transcode = |bytes: &[u8]| -> Option<Vec<u8>> {
            let text = encoding::decode(current, bytes)?;
            encoding::encode(target, &text).map(|b| b.into_owned())
        };

        let mut sources = Vec::new();
        for entry in self.entries.values() {
            if let Some(source) = &entry.source {
                let converted = transcode(source)
                    .ok_or_else(|| unrepresentable(&format!("source line of '{}'", entry.name)))?;
                sources.push((entry.id, converted));
            }
        }
        let mut verbatim = Vec::new();
        for (i, line) in self.lines.iter().enumerate() {
            if let LineContent::Verbatim(text) = &line.content {
                let converted =
                    transcode(text).ok_or_else(|| unrepresentable("a preserved comment line"))?;
                verbatim.push((i, converted));
            }
        }

        for (id, converted) in sources {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.source = Some(converted);
            }
        }
        for (i, converted) in verbatim {
            self.lines[i].content = LineContent::Verbatim(converted);
        }
        self.encoding = Some(target);
        self.declare_encoding = true;
        Ok(())
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dictionary")
            .field("entries", &self.entries.len())
            .field("lines", &self.lines.len())
            .field("encoding", &self.encoding.map(|e| e.name()))
            .field("encrypted", &self.is_encrypted())
            .field("unlocked", &self.key.is_some())
            .finish()
    }
}
