//! Accumulated, non-fatal messages
//!
//! Soft failures (a duplicate name, a value that did not parse for its kind,
//! an update that had to be skipped) do not abort the operation. They are
//! appended here so a caller can run several operations and report
//! everything at once, and they are forwarded to the `log` facade.

use std::fmt;

use log::{Level, log};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn log_level(self) -> Level {
        match self {
            Severity::Info => Level::Info,
            Severity::Warning => Level::Warn,
            Severity::Error => Level::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable identifier such as `dictionary.duplicate`.
    pub id: &'static str,
    pub text: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.text, self.id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    messages: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, severity: Severity, id: &'static str, text: impl Into<String>) {
        let text = text.into();
        log!(severity.log_level(), "{} ({})", text, id);
        self.messages.push(Diagnostic { severity, id, text });
    }

    pub fn warn(&mut self, id: &'static str, text: impl Into<String>) {
        self.append(Severity::Warning, id, text);
    }

    pub fn error(&mut self, id: &'static str, text: impl Into<String>) {
        self.append(Severity::Error, id, text);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Returns everything accumulated so far and resets the sink.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.messages)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_take() {
        let mut d = Diagnostics::new();
        d.warn("dictionary.duplicate", "duplicate name 'a'");
        d.error("dictionary.notBool", "bad bool");
        assert_eq!(d.len(), 2);
        assert!(d.contains("dictionary.notBool"));

        let taken = d.take();
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].severity, Severity::Warning);
        assert_eq!(taken[1].to_string(), "bad bool (dictionary.notBool)");
        assert!(d.is_empty());
    }
}
