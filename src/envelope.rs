//! The encryption envelope
//!
//! An encrypted dictionary file is an ordinary plaintext file whose last two
//! entries carry everything else:
//!
//! ```text
//! config.version = "8"
//! encryption.keySafe = "keysafe1:..."
//! encryption.data = "<base64 ciphertext>"
//! ```
//!
//! The dictionary moves between three states:
//!
//! - plaintext: no key-safe, no envelope fields;
//! - locked: envelope fields loaded, no key held;
//! - unlocked: key held, envelope fields replaced by the decrypted entries.
//!
//! The crypto itself is delegated to the injected [`CryptoProvider`].

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use log::debug;

use crate::crypto::{CryptoProvider, Keyring, MacAlgorithm};
use crate::dictionary::Dictionary;
use crate::entry::DefaultLevel;
use crate::error::{DictError, ErrorCategory, ErrorKind, Result};
use crate::load;

/// Holds the exported key-safe.
pub const KEYSAFE_ENTRY: &str = "encryption.keySafe";
/// Holds the base64 ciphertext of the encrypted entries.
pub const DATA_ENTRY: &str = "encryption.data";

pub(crate) const PAYLOAD_MAC: MacAlgorithm = MacAlgorithm::Poly1305;

pub(crate) fn is_envelope_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(KEYSAFE_ENTRY) || name.eq_ignore_ascii_case(DATA_ENTRY)
}

fn corrupt(msg: impl Into<String>) -> DictError {
    DictError::with_kind(ErrorCategory::User, ErrorKind::EnvelopeCorrupt, msg)
}

fn crypto_unavailable() -> DictError {
    DictError::with_kind(
        ErrorCategory::User,
        ErrorKind::CryptoUnavailable,
        "dictionary is encrypted but has no crypto provider",
    )
}

impl Dictionary {
    fn envelope_field(&self, name: &str) -> Option<String> {
        self.find_id(name)
            .and_then(|id| self.entries.get(&id))
            .map(|e| e.value.to_text())
    }

    fn has_envelope_fields(&self) -> bool {
        self.find_id(KEYSAFE_ENTRY).is_some() || self.find_id(DATA_ENTRY).is_some()
    }

    fn strip_envelope_fields(&mut self) {
        self.unset(KEYSAFE_ENTRY);
        self.unset(DATA_ENTRY);
    }

    pub(crate) fn provider(&self) -> Result<Arc<dyn CryptoProvider>> {
        self.crypto.clone().ok_or_else(crypto_unavailable)
    }

    /// True when the dictionary is, or will be written, encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.key_safe.is_some() || self.has_envelope_fields()
    }

    /// Encrypted content is present but has not been decrypted.
    pub fn is_locked(&self) -> bool {
        self.key.is_none() && self.has_envelope_fields()
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    /// Decrypts the envelope and merges its entries at `level`.
    ///
    /// Succeeds without doing anything if the dictionary is already unlocked
    /// or was never encrypted. On any failure the dictionary is left locked
    /// and unchanged.
    pub fn unlock(&mut self, keyring: &Keyring, level: DefaultLevel) -> Result<()> {
        if self.key.is_some() {
            return Ok(());
        }
        let (serialized, data) = match (
            self.envelope_field(KEYSAFE_ENTRY),
            self.envelope_field(DATA_ENTRY),
        ) {
            (None, None) => return Ok(()),
            (Some(serialized), Some(data)) => (serialized, data),
            (Some(_), None) => return Err(corrupt(format!("{} is missing", DATA_ENTRY))),
            (None, Some(_)) => return Err(corrupt(format!("{} is missing", KEYSAFE_ENTRY))),
        };

        let crypto = self.provider()?;
        let (key, key_safe) = crypto
            .unseal(keyring, &serialized)
            .map_err(|e| e.with_context("failed to unlock dictionary"))?;

        let ciphertext = STANDARD.decode(data.trim()).map_err(|e| {
            DictError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::EnvelopeCorrupt,
                format!("{} is not valid base64", DATA_ENTRY),
                e,
            )
        })?;
        let plaintext = crypto
            .decrypt_with_mac(&key, PAYLOAD_MAC, &ciphertext)
            .map_err(|e| e.with_context("failed to decrypt dictionary"))?;

        let staged = load::stage(&plaintext, self.encoding, None)
            .map_err(|e| e.with_context("decrypted content does not parse"))?;
        if staged.defines(KEYSAFE_ENTRY) || staged.defines(DATA_ENTRY) {
            return Err(corrupt("decrypted content contains a nested envelope"));
        }

        self.strip_envelope_fields();
        let duplicates = self.commit(staged, level, true);
        if !duplicates.is_empty() {
            debug!("decrypted content repeats {} names", duplicates.len());
        }
        self.key = Some(key);
        self.key_safe = Some(key_safe);
        debug!("dictionary unlocked");
        Ok(())
    }

    /// Drops the current key and, if `keyring` is given, seals a fresh one.
    ///
    /// The new key only reaches disk on the next write. Rekeying a locked
    /// dictionary discards its encrypted data; that is reported as a
    /// warning.
    pub fn rekey(&mut self, keyring: Option<&Keyring>) -> Result<()> {
        let sealed = match keyring {
            Some(keyring) => Some(self.provider()?.seal(keyring)?),
            None => None,
        };

        if self.is_locked() {
            self.diagnostics.warn(
                "dictionary.rekeyLocked",
                "rekeying a locked dictionary discards its encrypted entries",
            );
            self.strip_envelope_fields();
        }

        self.key = None;
        self.key_safe = None;
        if let Some((key, key_safe)) = sealed {
            self.key = Some(key);
            self.key_safe = Some(key_safe);
        }
        Ok(())
    }

    /// Gives this dictionary the key material of `source`, so a derived
    /// dictionary can be written with the same keys. Entries are untouched.
    pub fn copy_crypto_state(&mut self, source: &Dictionary) {
        self.key_safe = source.key_safe.clone();
        self.key = source.key.clone();
        if self.crypto.is_none() {
            self.crypto = source.crypto.clone();
        }
    }
}
