//! Error types for the public interface of the crate.
//!
//! Internally we use `anyhow` everywhere (`Res<T>`). When an error crosses into the public
//! interface (commands, the MCP server) it is tagged with an `ErrorType` so that callers can decide
//! whether the failure is a store problem, a mirror problem, bad input and so on.

use serde::Serialize;
use std::fmt::{Debug, Display, Formatter};

/// The result type used inside the crate.
pub(crate) type Res<T> = anyhow::Result<T>;

/// The result type of the public interface.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The configuration directory or `config.json` is missing or invalid.
    Config,
    /// OAuth credentials or tokens are missing, invalid or cannot be refreshed.
    Auth,
    /// The transaction store failed. Operations that hit this abort.
    Persistence,
    /// The spreadsheet mirror failed as a whole (e.g. cannot be reached at all).
    Mirror,
    /// The interpretation gateway could not turn text into a transaction.
    Interpretation,
    /// Caller supplied input that is not acceptable.
    Validation,
    /// Something went wrong running a service such as the MCP server.
    Service,
}

serde_plain::derive_display_from_serialize!(ErrorType);

/// The public error type. It carries an `ErrorType` and the full `anyhow` context chain.
pub struct Error {
    error_type: ErrorType,
    inner: anyhow::Error,
}

impl Error {
    pub(crate) fn new(error_type: ErrorType, inner: impl Into<anyhow::Error>) -> Self {
        Self {
            error_type,
            inner: inner.into(),
        }
    }

    /// Creates a `Validation` error with the given message.
    pub(crate) fn validation(message: impl Display) -> Self {
        Self::new(ErrorType::Validation, anyhow::anyhow!("{message}"))
    }

    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {:#}", self.error_type, self.inner)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {:?}", self.error_type, self.inner)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

/// Converts internal results into public results by attaching an `ErrorType`.
pub(crate) trait IntoResult<T> {
    fn pub_result(self, error_type: ErrorType) -> Result<T>;
}

impl<T, E> IntoResult<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn pub_result(self, error_type: ErrorType) -> Result<T> {
        self.map_err(|e| Error::new(error_type, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_pub_result_keeps_context_chain() {
        let res: Res<()> = Err(anyhow::anyhow!("disk full")).context("Unable to save row");
        let err = res.pub_result(ErrorType::Persistence).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Persistence);
        let message = err.to_string();
        assert!(message.starts_with("persistence error"), "{message}");
        assert!(message.contains("Unable to save row"));
        assert!(message.contains("disk full"));
    }

    #[test]
    fn test_validation() {
        let err = Error::validation("bad month 'Foo'");
        assert_eq!(err.error_type(), ErrorType::Validation);
        assert!(err.to_string().contains("bad month 'Foo'"));
    }
}
