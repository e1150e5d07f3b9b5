use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Filesystem trouble, a broken invariant, or anything else that is not
    /// clearly the caller's fault. Bad input can still end up here when the
    /// code cannot tell.
    Internal,

    /// The caller provided invalid input (malformed text, wrong passphrase,
    /// a value of the wrong kind) or asked for something impossible.
    User,
}

/// What went wrong, for callers that react to specific failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A line is neither a comment nor a `name = value` pair.
    Syntax,
    /// The same name was defined more than once in one load. The load kept
    /// the first definition and committed everything else.
    DuplicateName,
    /// Loaded bytes are not valid in the resolved encoding.
    EncodingInvalid,
    /// A string cannot be represented in the dictionary's encoding. Callers
    /// may switch the dictionary to UTF-8 and retry.
    EncodingUnrepresentable,
    /// Content declared an encoding different from the dictionary's.
    EncodingRedeclared,
    /// An encoding label is unknown or not usable for line-oriented text.
    UnknownEncoding,
    /// An entry has a kind other than the one requested.
    KindMismatch,
    /// No entry has the given name.
    NotFound,
    /// A name is empty, reserved, or contains characters the line format
    /// cannot carry.
    InvalidName,
    /// The envelope fields are present but cannot be decoded.
    EnvelopeCorrupt,
    /// A change needs encryption but the dictionary has not been unlocked.
    Locked,
    /// An encrypted dictionary was used without a crypto provider.
    CryptoUnavailable,
    /// An exported key-safe lacks the armor prefix.
    ArmoringInvalid,
    /// The armored key-safe is not valid base64url.
    ArmoringDecode,
    /// Input claimed to be a key-safe but used a future/unsupported version.
    ArmoringFromFuture,
    /// Length fields or binary layout are invalid.
    BinaryFormat,
    /// Sealed or marshaled data is shorter than its layout requires.
    TruncatedInput,
    /// Bytes follow the end of a sealed or marshaled payload.
    TrailingData,
    /// No passphrase in the keyring opens the key-safe, or the ciphertext
    /// was modified.
    AuthenticationFailed,
    /// Reading a passphrase failed.
    PassphraseUnavailable,
    /// scrypt rejected its parameters or failed to derive a key.
    ScryptFailure,
    /// XSalsa20Poly1305 rejected a key or failed to seal.
    SecretboxFailure,
    /// Unexpected state reached within dictionary logic.
    InternalInvariant,
    /// Reading or writing a file or stream failed.
    Io,
}

/// An error from any dictionary operation.
///
/// Displays as its message alone; the chain of causes is reachable through
/// [`StdError::source`].
#[derive(Debug, Error)]
#[error("{msg}")]
pub struct DictError {
    pub category: ErrorCategory,
    /// Set for every condition a caller can act on. Errors without a kind
    /// are only meant to be reported.
    pub kind: Option<ErrorKind>,
    #[source]
    cause: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

type Cause = Box<dyn StdError + Send + Sync + 'static>;

impl DictError {
    fn build(
        category: ErrorCategory,
        kind: Option<ErrorKind>,
        cause: Option<Cause>,
        msg: String,
    ) -> Self {
        Self {
            category,
            kind,
            cause,
            msg,
        }
    }

    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self::build(category, None, None, msg.into())
    }

    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::build(category, Some(kind), None, msg.into())
    }

    pub fn with_source(
        category: ErrorCategory,
        msg: impl Into<String>,
        cause: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::build(category, None, Some(Box::new(cause)), msg.into())
    }

    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        cause: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::build(category, Some(kind), Some(Box::new(cause)), msg.into())
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Puts `msg` in front of this error, which becomes the source. The
    /// category and kind stay the same.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let (category, kind) = (self.category, self.kind);
        Self::build(category, kind, Some(Box::new(self)), msg.into())
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == Some(kind)
    }
}

pub type Result<T> = std::result::Result<T, DictError>;
