use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Broad classification of an error.
///
/// Callers use this to distinguish contract violations from resource
/// exhaustion without matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Catch-all for invariant violations, decode failures, etc.
    Internal,
    /// An operation was called in a state that doesn't permit it (pushing to a
    /// finished operator, appending to a closed entry, ...).
    InvalidState,
    /// No conversion or evaluator exists for an element type.
    UnsupportedType,
    /// The memory accountant refused an allocation.
    MemoryLimitExceeded,
}

#[derive(Debug)]
pub struct DbError {
    inner: Box<DbErrorInner>,
}

#[derive(Debug)]
struct DbErrorInner {
    msg: String,
    kind: ErrorKind,
    source: Option<Box<dyn Error + Send + Sync>>,
    /// Extra key/value context, printed after the message.
    fields: Vec<(&'static str, String)>,
    backtrace: Backtrace,
}

impl DbError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Internal, msg)
    }

    pub fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        DbError {
            inner: Box::new(DbErrorInner {
                msg: msg.into(),
                kind,
                source: None,
                fields: Vec::new(),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::InvalidState, msg)
    }

    pub fn unsupported_type(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::UnsupportedType, msg)
    }

    pub fn memory_limit_exceeded(requested: usize, reserved: usize, limit: usize) -> Self {
        Self::with_kind(ErrorKind::MemoryLimitExceeded, "Memory limit exceeded")
            .with_field("requested_bytes", requested)
            .with_field("reserved_bytes", reserved)
            .with_field("limit_bytes", limit)
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    /// Attach a key/value pair to the error.
    pub fn with_field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.inner.fields.push((key, value.to_string()));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.inner.kind == kind
    }

    pub fn get_msg(&self) -> &str {
        self.inner.msg.as_str()
    }

    pub fn get_field(&self, key: &str) -> Option<&str> {
        self.inner
            .fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;
        for (key, value) in &self.inner.fields {
            write!(f, "\n  {key}: {value}")?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }
        if self.inner.backtrace.status() == BacktraceStatus::Captured {
            write!(f, "\nBacktrace: {}", self.inner.backtrace)?;
        }
        Ok(())
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<fmt::Error> for DbError {
    fn from(value: fmt::Error) -> Self {
        DbError::with_source("Format error", Box::new(value))
    }
}

impl From<std::io::Error> for DbError {
    fn from(value: std::io::Error) -> Self {
        DbError::with_source("IO error", Box::new(value))
    }
}

pub trait ResultExt<T, E> {
    /// Wrap an error with a static context message.
    fn context(self, msg: &'static str) -> Result<T, DbError>;
}

impl<T, E: Error + Send + Sync + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn context(self, msg: &'static str) -> Result<T, DbError> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(DbError::with_source(msg, Box::new(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_in_display() {
        let err = DbError::new("bad").with_field("idx", 4);
        assert_eq!("bad\n  idx: 4", err.to_string().lines().take(2).collect::<Vec<_>>().join("\n"));
        assert_eq!(Some("4"), err.get_field("idx"));
    }

    #[test]
    fn memory_limit_kind() {
        let err = DbError::memory_limit_exceeded(16, 8, 20);
        assert!(err.is_kind(ErrorKind::MemoryLimitExceeded));
        assert_eq!(Some("20"), err.get_field("limit_bytes"));
    }

    #[test]
    fn context_keeps_source() {
        let res: std::result::Result<(), fmt::Error> = Err(fmt::Error);
        let err = res.context("Failed to write").unwrap_err();
        assert_eq!("Failed to write", err.get_msg());
        assert_eq!(ErrorKind::Internal, err.kind());
        assert!(err.source().is_some());
    }
}
