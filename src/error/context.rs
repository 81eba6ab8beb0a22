//! Context helpers for annotating errors with the failing operation.

use super::{AttachError, Result};

/// Attach a description of the failing operation to an error.
pub trait ResultExt<T> {
    /// Wrap the error with a fixed context string.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in `AttachError::WithContext`.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wrap the error with a lazily built context string.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in `AttachError::WithContext`.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|err| AttachError::WithContext {
            context: context.into(),
            source: Box::new(err),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|err| AttachError::WithContext {
            context: f().into(),
            source: Box::new(err),
        })
    }
}

/// Turn a missing value into a typed error.
pub trait OptionExt<T> {
    /// Convert `None` into the error produced by `f`.
    ///
    /// # Errors
    ///
    /// Returns the error built by `f` when the option is `None`.
    fn ok_or_error<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> AttachError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_error<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> AttachError,
    {
        self.ok_or_else(f)
    }
}
