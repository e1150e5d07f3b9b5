//! The capability a dictionary uses for encryption
//!
//! The dictionary never does cryptography itself. It holds an opaque
//! [`KeySafe`] (a sealed copy of the data key) and, once unlocked, the
//! [`Key`], and asks a [`CryptoProvider`] to do everything else. Providers
//! are injected when the dictionary is built, so tests can substitute a
//! mock.

use std::fmt;

use zeroize::Zeroizing;

use crate::error::{DictError, ErrorCategory, ErrorKind, Result};
use crate::passphrase::PassphraseReader;

/// MAC used to authenticate the encrypted blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MacAlgorithm {
    Poly1305,
}

/// A decrypted data key. Wiped from memory when dropped.
#[derive(Clone)]
pub struct Key {
    bytes: Zeroizing<Vec<u8>>,
}

impl Key {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}

/// A sealed data key, only meaningful to the provider that made it.
#[derive(Clone)]
pub struct KeySafe {
    sealed: Zeroizing<Vec<u8>>,
}

impl KeySafe {
    pub fn from_bytes(sealed: Vec<u8>) -> Self {
        Self {
            sealed: Zeroizing::new(sealed),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.sealed
    }
}

impl fmt::Debug for KeySafe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeySafe({} bytes)", self.sealed.len())
    }
}

/// Credentials that can open a key-safe: a list of candidate passphrases.
#[derive(Clone, Default)]
pub struct Keyring {
    passphrases: Vec<Zeroizing<Vec<u8>>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_passphrase(passphrase: impl Into<Vec<u8>>) -> Self {
        let mut keyring = Self::new();
        keyring.add_passphrase(passphrase);
        keyring
    }

    /// Builds a keyring holding the single passphrase produced by `reader`.
    pub fn from_reader(reader: &mut dyn PassphraseReader) -> Result<Self> {
        let passphrase = reader.read_passphrase()?;
        Ok(Self {
            passphrases: vec![passphrase],
        })
    }

    pub fn add_passphrase(&mut self, passphrase: impl Into<Vec<u8>>) {
        self.passphrases.push(Zeroizing::new(passphrase.into()));
    }

    pub fn passphrases(&self) -> impl Iterator<Item = &[u8]> {
        self.passphrases.iter().map(|p| p.as_slice())
    }

    /// The passphrase used when sealing a new key-safe.
    pub fn primary(&self) -> Result<&[u8]> {
        self.passphrases.first().map(|p| p.as_slice()).ok_or_else(|| {
            DictError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "keyring holds no passphrase",
            )
        })
    }

    pub fn is_empty(&self) -> bool {
        self.passphrases.is_empty()
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keyring({} passphrases)", self.passphrases.len())
    }
}

/// Key management and authenticated encryption for encrypted dictionaries.
///
/// Calls are synchronous and may be slow (key derivation); the dictionary
/// treats each one as a single success-or-failure step.
pub trait CryptoProvider: Send + Sync {
    /// Creates a fresh data key and seals it with the keyring.
    fn seal(&self, keyring: &Keyring) -> Result<(Key, KeySafe)>;

    /// Opens a serialized key-safe with the keyring.
    fn unseal(&self, keyring: &Keyring, serialized: &str) -> Result<(Key, KeySafe)>;

    fn encrypt_with_mac(&self, key: &Key, mac: MacAlgorithm, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn decrypt_with_mac(
        &self,
        key: &Key,
        mac: MacAlgorithm,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>>;

    /// Serializes a key-safe into text that [`CryptoProvider::unseal`] accepts.
    fn export(&self, key_safe: &KeySafe) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passphrase::ConstantPassphraseReader;

    #[test]
    fn test_keyring_primary() {
        let mut keyring = Keyring::new();
        assert!(keyring.primary().is_err());
        keyring.add_passphrase(b"first".to_vec());
        keyring.add_passphrase("second");
        assert_eq!(keyring.primary().unwrap(), b"first");
        assert_eq!(keyring.passphrases().count(), 2);
    }

    #[test]
    fn test_keyring_from_reader() {
        let mut reader = ConstantPassphraseReader::new(b"pw".to_vec());
        let keyring = Keyring::from_reader(&mut reader).unwrap();
        assert_eq!(keyring.primary().unwrap(), b"pw");
    }

    #[test]
    fn test_debug_does_not_leak() {
        let key = Key::from_bytes(b"supersecret".to_vec());
        assert_eq!(format!("{:?}", key), "Key(..)");
        let keyring = Keyring::with_passphrase("hunter2");
        assert!(!format!("{:?}", keyring).contains("hunter2"));
    }
}
