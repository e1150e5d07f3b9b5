//! Where passphrases for key-safes come from

use crate::error::{DictError, ErrorCategory, ErrorKind, Result};
use std::io::{self, BufRead, IsTerminal, Write};
use zeroize::Zeroizing;

const DEFAULT_PROMPT: &str = "Passphrase (dictool): ";

/// A source of passphrases for building a [`crate::Keyring`].
pub trait PassphraseReader {
    /// Passphrases are raw bytes; they need not be UTF-8.
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>>;
}

/// Always hands out the same passphrase.
pub struct ConstantPassphraseReader {
    passphrase: Zeroizing<Vec<u8>>,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: Vec<u8>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(self.passphrase.clone())
    }
}

/// Reads one passphrase per line from the process's stdin, so
/// `printf 'old\nnew\n' | dictool --passphrase-stdin lock f` can supply
/// both the current and the new passphrase. Readers share stdin; each call
/// takes the next line.
#[derive(Debug, Default)]
pub struct StdinPassphraseReader;

impl StdinPassphraseReader {
    pub fn new() -> Self {
        Self
    }
}

impl PassphraseReader for StdinPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        read_line(&mut io::stdin().lock())
    }
}

/// Takes the next line of `reader` without its `\n` or `\r\n`. Running out
/// of input before any byte is an error.
fn read_line(reader: &mut dyn BufRead) -> Result<Zeroizing<Vec<u8>>> {
    let mut data = Zeroizing::new(Vec::new());
    let n = reader.read_until(b'\n', &mut data).map_err(|e| {
        DictError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to read passphrase: {}", e),
            e,
        )
    })?;
    if n == 0 {
        return Err(DictError::with_kind(
            ErrorCategory::User,
            ErrorKind::PassphraseUnavailable,
            "no passphrase left on stdin",
        ));
    }
    if data.last() == Some(&b'\n') {
        data.pop();
        if data.last() == Some(&b'\r') {
            data.pop();
        }
    }
    Ok(data)
}

/// Prompts on stderr and reads from the terminal without echo.
pub struct TerminalPassphraseReader {
    prompt: String,
}

impl TerminalPassphraseReader {
    pub fn new() -> Self {
        Self::with_prompt(DEFAULT_PROMPT)
    }

    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl Default for TerminalPassphraseReader {
    fn default() -> Self {
        Self::new()
    }
}

fn prompt_error(action: &str, e: io::Error) -> DictError {
    DictError::with_kind_and_source(
        ErrorCategory::Internal,
        ErrorKind::Io,
        format!("failed to {} prompt: {}", action, e),
        e,
    )
}

impl PassphraseReader for TerminalPassphraseReader {
    /// Only UTF-8 passphrases can be typed here; others have to come in
    /// through `--passphrase-stdin`.
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        if !io::stdin().is_terminal() {
            return Err(DictError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "stdin is not a terminal; use --passphrase-stdin",
            ));
        }

        let mut stderr = io::stderr();
        stderr
            .write_all(self.prompt.as_bytes())
            .map_err(|e| prompt_error("write", e))?;
        stderr.flush().map_err(|e| prompt_error("flush", e))?;

        let passphrase = rpassword::read_password().map_err(|e| {
            DictError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failed to read passphrase from terminal: {}", e),
                e,
            )
        })?;

        Ok(Zeroizing::new(passphrase.into_bytes()))
    }
}

/// Remembers the first passphrase `upstream` produces, so a session that
/// unlocks and then re-locks a file prompts once. Failures are not
/// remembered.
pub struct CachingPassphraseReader {
    upstream: Box<dyn PassphraseReader>,
    cached: Option<Zeroizing<Vec<u8>>>,
}

impl CachingPassphraseReader {
    pub fn new(upstream: Box<dyn PassphraseReader>) -> Self {
        Self {
            upstream,
            cached: None,
        }
    }
}

impl PassphraseReader for CachingPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        match &self.cached {
            Some(cached) => Ok(cached.clone()),
            None => {
                let passphrase = self.upstream.read_passphrase()?;
                self.cached = Some(passphrase.clone());
                Ok(passphrase)
            }
        }
    }
}
