//! Authenticated encryption primitives behind the bundled key-safe
//!
//! Two layers, both XSalsa20Poly1305 (NaCl secretbox):
//!
//! - passphrase sealing, used for key-safes: a key-encryption key is derived
//!   from the passphrase with scrypt. Binary format:
//!   - log_n: 1 byte (scrypt cost, so old key-safes stay openable)
//!   - salt: 8 bytes
//!   - nonce: 24 bytes
//!   - length: 8 bytes (big-endian signed int64)
//!   - sealed box: variable length (includes 16-byte Poly1305 MAC)
//! - raw-key sealing, used for the dictionary payload:
//!   - nonce: 24 bytes
//!   - sealed box: variable length

use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Nonce, XSalsa20Poly1305};
use scrypt::{Params, scrypt};
use std::mem::size_of;
use zeroize::Zeroizing;

use crate::error::{DictError, ErrorCategory, ErrorKind, Result};

/// Length of salt in bytes
pub(crate) const SALT_LEN: usize = 8;

/// Length of nonce in bytes
pub(crate) const NONCE_LEN: usize = 24;

/// Length of keys in bytes, both derived and raw
pub(crate) const KEY_LEN: usize = 32;

/// Default scrypt log2(N) (CPU/memory cost); N = 32768
pub const DEFAULT_LOG_N: u8 = 15;

/// Highest cost accepted from a sealed blob. scrypt needs `128 * r * 2^log_n`
/// bytes, so this caps a crafted key-safe at 256 MiB.
pub const MAX_LOG_N: u8 = DEFAULT_LOG_N + 3;

/// scrypt r parameter (block size)
const SCRYPT_R: u32 = 8;

/// scrypt p parameter (parallelization)
const SCRYPT_P: u32 = 1;

fn secretbox_error(msg: &str) -> DictError {
    DictError::with_kind(ErrorCategory::Internal, ErrorKind::SecretboxFailure, msg)
}

fn truncated(what: &str) -> DictError {
    DictError::with_kind(
        ErrorCategory::User,
        ErrorKind::TruncatedInput,
        format!("input likely truncated while reading {}", what),
    )
}

fn auth_failed() -> DictError {
    DictError::with_kind(
        ErrorCategory::User,
        ErrorKind::AuthenticationFailed,
        "corrupt input, tampered-with data, or bad passphrase",
    )
}

/// Derive a 32-byte key from a passphrase and salt using scrypt
fn derive_key(passphrase: &[u8], salt: &[u8; SALT_LEN], log_n: u8) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    if log_n > MAX_LOG_N {
        return Err(DictError::with_kind(
            ErrorCategory::User,
            ErrorKind::ScryptFailure,
            format!(
                "scrypt cost 2^{} exceeds the supported maximum 2^{}",
                log_n, MAX_LOG_N
            ),
        ));
    }
    let params = Params::new(log_n, SCRYPT_R, SCRYPT_P, KEY_LEN).map_err(|e| {
        DictError::with_kind(
            ErrorCategory::User,
            ErrorKind::ScryptFailure,
            format!("failed to create scrypt params: {}", e),
        )
    })?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    scrypt(passphrase, salt, &params, &mut key[..]).map_err(|e| {
        DictError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::ScryptFailure,
            format!("scrypt key derivation failed: {}", e),
        )
    })?;

    Ok(key)
}

/// Seal plaintext under a passphrase using random salt and nonce
pub fn seal_with_passphrase(passphrase: &[u8], plaintext: &[u8], log_n: u8) -> Result<Vec<u8>> {
    let salt: [u8; SALT_LEN] = rand::random();
    let nonce: [u8; NONCE_LEN] = rand::random();
    seal_with_passphrase_deterministic(passphrase, plaintext, log_n, &salt, &nonce)
}

/// Seal plaintext under a passphrase using provided salt and nonce
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `seal_with_passphrase()` which
/// generates random salt/nonce.
pub(crate) fn seal_with_passphrase_deterministic(
    passphrase: &[u8],
    plaintext: &[u8],
    log_n: u8,
    salt: &[u8; SALT_LEN],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let key = derive_key(passphrase, salt, log_n)?;
    let cipher = XSalsa20Poly1305::new(&(*key).into());

    let nonce_obj = Nonce::from(*nonce);
    let sealed_box = cipher
        .encrypt(&nonce_obj, plaintext)
        .map_err(|_| secretbox_error("encryption failed"))?;

    let sealed_box_len = sealed_box.len() as i64;
    let mut output =
        Vec::with_capacity(1 + SALT_LEN + NONCE_LEN + size_of::<i64>() + sealed_box.len());
    output.push(log_n);
    output.extend_from_slice(salt);
    output.extend_from_slice(nonce);
    output.extend_from_slice(&sealed_box_len.to_be_bytes()); // big-endian i64
    output.extend_from_slice(&sealed_box);

    Ok(output)
}

/// Open data produced by [`seal_with_passphrase`]
pub fn open_with_passphrase(passphrase: &[u8], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let mut pos = 0;

    let log_n = *sealed.first().ok_or_else(|| truncated("cost"))?;
    pos += 1;

    if sealed.len() < pos + SALT_LEN {
        return Err(truncated("salt"));
    }
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&sealed[pos..pos + SALT_LEN]);
    pos += SALT_LEN;

    if sealed.len() < pos + NONCE_LEN {
        return Err(truncated("nonce"));
    }
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&sealed[pos..pos + NONCE_LEN]);
    pos += NONCE_LEN;

    if sealed.len() < pos + size_of::<i64>() {
        return Err(truncated("sealed box"));
    }
    let mut length_bytes = [0u8; 8];
    length_bytes.copy_from_slice(&sealed[pos..pos + size_of::<i64>()]);
    let sealed_box_len = i64::from_be_bytes(length_bytes);
    pos += size_of::<i64>();

    if sealed_box_len < 0 {
        return Err(DictError::with_kind(
            ErrorCategory::User,
            ErrorKind::BinaryFormat,
            "negative sealed box length (when interpreted as a big-endian i64)",
        ));
    }

    // Check if length exceeds platform's maximum isize. *Valid* input
    // can fail this check if the platforms' isize is small.
    if sealed_box_len > isize::MAX as i64 {
        return Err(DictError::with_kind(
            ErrorCategory::User,
            ErrorKind::BinaryFormat,
            "sealed box length exceeds this system's max isize",
        ));
    }

    let sealed_box_len = sealed_box_len as usize;

    if sealed.len() < pos + sealed_box_len {
        return Err(DictError::with_kind(
            ErrorCategory::User,
            ErrorKind::TruncatedInput,
            "truncated or corrupt input; claimed length greater than available input",
        ));
    }
    let sealed_box = &sealed[pos..pos + sealed_box_len];
    pos += sealed_box_len;

    if pos < sealed.len() {
        return Err(DictError::with_kind(
            ErrorCategory::User,
            ErrorKind::TrailingData,
            "invalid input: unexpected data after sealed box",
        ));
    }

    let key = derive_key(passphrase, &salt, log_n)?;
    let cipher = XSalsa20Poly1305::new(&(*key).into());
    let nonce_obj = Nonce::from(nonce);
    let plaintext = cipher
        .decrypt(&nonce_obj, sealed_box)
        .map_err(|_| auth_failed())?;

    Ok(Zeroizing::new(plaintext))
}

fn cipher_for_key(key: &[u8]) -> Result<XSalsa20Poly1305> {
    XSalsa20Poly1305::new_from_slice(key).map_err(|_| {
        DictError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            format!("data key must be {} bytes, got {}", KEY_LEN, key.len()),
        )
    })
}

/// Seal plaintext under a raw 32-byte key with a random nonce
pub fn seal_with_key(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for_key(key)?;
    let nonce: [u8; NONCE_LEN] = rand::random();
    let sealed_box = cipher
        .encrypt(&Nonce::from(nonce), plaintext)
        .map_err(|_| secretbox_error("encryption failed"))?;

    let mut output = Vec::with_capacity(NONCE_LEN + sealed_box.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&sealed_box);
    Ok(output)
}

/// Open data produced by [`seal_with_key`]
pub fn open_with_key(key: &[u8], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = cipher_for_key(key)?;
    if sealed.len() < NONCE_LEN {
        return Err(truncated("nonce"));
    }
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&sealed[..NONCE_LEN]);
    let plaintext = cipher
        .decrypt(&Nonce::from(nonce), &sealed[NONCE_LEN..])
        .map_err(|_| auth_failed())?;
    Ok(Zeroizing::new(plaintext))
}
