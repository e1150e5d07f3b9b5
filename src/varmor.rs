//! Versioned armoring for exported key-safes
//!
//! A key-safe is stored as the value of the `encryption.keySafe` entry, so
//! its text form must survive the line format untouched. The armored form:
//! - Free of whitespace (including newlines)
//! - Free of quotes, `|` and `#`
//! - Versioned, so future key-safe layouts are recognized as such

use crate::error::{DictError, ErrorCategory, ErrorKind, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

const FAMILY: &str = "keysafe";
const CURRENT: &str = "keysafe1:";

fn armor_error(kind: ErrorKind, msg: &str) -> DictError {
    DictError::with_kind(ErrorCategory::User, kind, msg)
}

/// Armors an exported key-safe as `keysafe1:<base64url, unpadded>`.
pub fn wrap(body: &[u8]) -> String {
    let mut armored = String::from(CURRENT);
    URL_SAFE_NO_PAD.encode_string(body, &mut armored);
    armored
}

/// Recovers the key-safe bytes from [`wrap`] output.
pub fn unwrap(armored: &str) -> Result<Vec<u8>> {
    match armored.strip_prefix(CURRENT) {
        Some(encoded) => URL_SAFE_NO_PAD.decode(encoded).map_err(|e| {
            DictError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::ArmoringDecode,
                format!("key-safe is not valid base64url: {}", e),
                e,
            )
        }),
        None if armored.starts_with(FAMILY) && armored.len() > CURRENT.len() => Err(armor_error(
            ErrorKind::ArmoringFromFuture,
            "key-safe was written by a newer version",
        )),
        None if armored.len() < CURRENT.len() => Err(armor_error(
            ErrorKind::ArmoringInvalid,
            "key-safe is too short; likely truncated",
        )),
        None => Err(armor_error(
            ErrorKind::ArmoringInvalid,
            "value is not a key-safe",
        )),
    }
}
