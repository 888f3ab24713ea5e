//! Composes the prefixed, CRLF-terminated response lines.

use crate::error::DmmError;

/// Builds `PASS, ...` / `FAIL 0xNN, ...` lines.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusComposer {
    success_prefix: String,
    error_prefix: String,
}

impl Default for StatusComposer {
    fn default() -> Self {
        Self::new("PASS", "FAIL")
    }
}

impl StatusComposer {
    pub fn new(success_prefix: impl Into<String>, error_prefix: impl Into<String>) -> Self {
        Self {
            success_prefix: success_prefix.into(),
            error_prefix: error_prefix.into(),
        }
    }

    pub fn success(&self, message: &str) -> String {
        format!("{}, {}\r\n", self.success_prefix, message)
    }

    /// Error line carrying the result code. `param` is the offending
    /// argument, quoted after the error text when non-empty.
    pub fn failure(&self, error: &DmmError, param: &str) -> String {
        if param.is_empty() {
            format!("{} 0x{:02X}, {}\r\n", self.error_prefix, error.code(), error)
        } else {
            format!(
                "{} 0x{:02X}, {}: \"{}\"\r\n",
                self.error_prefix,
                error.code(),
                error,
                param
            )
        }
    }

    /// Error line without a result code.
    pub fn plain_failure(&self, message: &str) -> String {
        format!("{}, {}\r\n", self.error_prefix, message)
    }

    pub fn compose<T>(&self, result: &Result<T, DmmError>, message: &str) -> String {
        match result {
            Ok(_) => self.success(message),
            Err(e) => self.failure(e, ""),
        }
    }
}
