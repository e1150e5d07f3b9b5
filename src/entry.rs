//! Dictionary entries and their bookkeeping flags

use crate::value::{Kind, Value};

/// Where an entry's current value came from. Decides whether the writer
/// has to persist it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultLevel {
    /// Loaded from the dictionary's own file or set by the program.
    NotDefault,
    /// Created by a typed accessor from a value compiled into the program.
    CompiledDefault,
    /// Loaded from a defaults file or buffer.
    LoadedDefault,
}

/// Stable identity of an entry. Ids are handed out in increasing order, so
/// sorting by id yields insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) u64);

/// Stable identity of a write line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct LineId(pub(crate) u64);

/// Options for [`crate::Dictionary::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetFlags {
    /// Always written first and never encrypted. Setting such an entry does
    /// not mark it modified.
    pub version_spec: bool,
    /// Written in plaintext even when the dictionary is encrypted.
    pub dont_encrypt: bool,
}

impl SetFlags {
    pub const NONE: SetFlags = SetFlags {
        version_spec: false,
        dont_encrypt: false,
    };

    pub const VERSION_SPEC: SetFlags = SetFlags {
        version_spec: true,
        dont_encrypt: false,
    };

    pub const DONT_ENCRYPT: SetFlags = SetFlags {
        version_spec: false,
        dont_encrypt: true,
    };
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub(crate) id: EntryId,
    pub(crate) name: String,
    pub(crate) value: Value,
    pub(crate) modified: bool,
    pub(crate) default_level: DefaultLevel,
    pub(crate) version_spec: bool,
    pub(crate) dont_encrypt: bool,
    /// The write line that renders this entry, if it came from a loaded line
    /// (or was given one since). Non-owning: the line may already be gone.
    pub(crate) write_line: Option<LineId>,
    /// Raw bytes of the source line, in the dictionary's encoding. Dropped
    /// as soon as the value changes so the writer re-renders it.
    pub(crate) source: Option<Vec<u8>>,
}

impl Entry {
    pub(crate) fn new(id: EntryId, name: String, value: Value, level: DefaultLevel) -> Self {
        Self {
            id,
            name,
            value,
            modified: false,
            default_level: level,
            version_spec: false,
            dont_encrypt: false,
            write_line: None,
            source: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn kind(&self) -> Kind {
        self.value.kind()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn default_level(&self) -> DefaultLevel {
        self.default_level
    }

    pub fn is_version_spec(&self) -> bool {
        self.version_spec
    }

    pub fn is_dont_encrypt(&self) -> bool {
        self.dont_encrypt
    }

    /// Whether the writer emits this entry at all.
    pub(crate) fn should_persist(&self) -> bool {
        self.modified || self.default_level == DefaultLevel::NotDefault
    }

    /// Replaces the value, keeping track of whether it actually changed.
    /// Returns true when it did.
    pub(crate) fn replace_value(&mut self, value: Value, mark_modified: bool) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.source = None;
        if mark_modified {
            self.modified = true;
        }
        true
    }
}
