//! dictstore - a typed configuration dictionary with round-trip fidelity
//! and optional encryption

#![forbid(unsafe_code)]

pub mod crypto;
pub mod diagnostics;
pub mod dictionary;
pub mod encoding;
mod envelope;
pub mod entry;
pub mod error;
pub mod file_ops;
pub mod keysafe;
pub mod linefmt;
mod load;
mod marshal;
pub mod narrow;
pub mod passphrase;
pub mod secretcrypt;
pub mod value;
pub mod varmor;
mod write;

pub use crypto::{CryptoProvider, Key, KeySafe, Keyring, MacAlgorithm};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use dictionary::{Dictionary, UpdateSummary};
pub use entry::{DefaultLevel, Entry, EntryId, SetFlags};
pub use envelope::{DATA_ENTRY, KEYSAFE_ENTRY};
pub use error::{DictError, ErrorCategory, ErrorKind, Result};
pub use keysafe::PassphraseKeySafe;
pub use load::LoadOptions;
pub use value::{DictValue, Kind, TriState, Value};
