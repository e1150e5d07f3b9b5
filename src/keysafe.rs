//! Passphrase-protected key-safes
//!
//! [`PassphraseKeySafe`] is the [`CryptoProvider`] shipped with the crate.
//! Sealing generates a random data key and seals it under a key derived
//! from the keyring's primary passphrase; the dictionary payload itself is
//! encrypted with the data key. Changing the passphrase therefore only
//! re-seals 32 bytes.

use log::debug;
use zeroize::Zeroizing;

use crate::crypto::{CryptoProvider, Key, KeySafe, Keyring, MacAlgorithm};
use crate::error::{DictError, ErrorCategory, ErrorKind, Result};
use crate::secretcrypt::{self, DEFAULT_LOG_N, KEY_LEN};
use crate::varmor;

#[derive(Debug, Clone)]
pub struct PassphraseKeySafe {
    log_n: u8,
}

impl PassphraseKeySafe {
    pub fn new() -> Self {
        Self {
            log_n: DEFAULT_LOG_N,
        }
    }

    /// Uses scrypt cost `2^log_n` for key-safes sealed by this provider.
    /// Existing key-safes record their own cost.
    pub fn with_cost(log_n: u8) -> Self {
        Self { log_n }
    }
}

impl Default for PassphraseKeySafe {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoProvider for PassphraseKeySafe {
    fn seal(&self, keyring: &Keyring) -> Result<(Key, KeySafe)> {
        let passphrase = keyring.primary()?;
        let data_key = Zeroizing::new(rand::random::<[u8; KEY_LEN]>());
        let sealed = secretcrypt::seal_with_passphrase(passphrase, &data_key[..], self.log_n)
            .map_err(|e| e.with_context("failed to seal key-safe"))?;
        debug!("sealed new key-safe (scrypt log_n {})", self.log_n);
        Ok((Key::from_bytes(data_key.to_vec()), KeySafe::from_bytes(sealed)))
    }

    fn unseal(&self, keyring: &Keyring, serialized: &str) -> Result<(Key, KeySafe)> {
        let sealed = varmor::unwrap(serialized.trim())
            .map_err(|e| e.with_context("failed to unarmor key-safe"))?;

        let mut last_err = None;
        for passphrase in keyring.passphrases() {
            match secretcrypt::open_with_passphrase(passphrase, &sealed) {
                Ok(data_key) => {
                    return Ok((Key::from_bytes(data_key.to_vec()), KeySafe::from_bytes(sealed)));
                }
                Err(e) if e.is(ErrorKind::AuthenticationFailed) => last_err = Some(e),
                Err(e) => return Err(e.with_context("failed to open key-safe")),
            }
        }

        Err(match last_err {
            Some(e) => e.with_context("no passphrase in the keyring opens the key-safe"),
            None => DictError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "keyring holds no passphrase",
            ),
        })
    }

    fn encrypt_with_mac(&self, key: &Key, mac: MacAlgorithm, plaintext: &[u8]) -> Result<Vec<u8>> {
        match mac {
            MacAlgorithm::Poly1305 => secretcrypt::seal_with_key(key.as_bytes(), plaintext),
        }
    }

    fn decrypt_with_mac(
        &self,
        key: &Key,
        mac: MacAlgorithm,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        match mac {
            MacAlgorithm::Poly1305 => secretcrypt::open_with_key(key.as_bytes(), ciphertext),
        }
    }

    fn export(&self, key_safe: &KeySafe) -> Result<String> {
        Ok(varmor::wrap(key_safe.as_bytes()))
    }
}
