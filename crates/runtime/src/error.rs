//! Embedding error taxonomy
//!
//! Every fallible embedding operation reports an [`Error`] with one of a
//! fixed set of [`ErrorKind`]s. Well-known checks use shared static
//! messages so the hot error path does not allocate; detailed errors carry
//! an owned message.
//!
//! Script-level failures (panics) are *not* errors in this sense: they are
//! exception values that unwind the coroutine stack and surface as error
//! results. The kinds below describe misuse of the embedding API and
//! resource exhaustion.

use std::borrow::Cow;

/// Fixed error code taxonomy exposed to embedders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Object not in the right state for this operation.
    BadState,
    /// Invalid argument (null handle, out-of-range number, ...).
    BadArg,
    /// Compilation input failed to parse or validate.
    BadSource,
    /// Operation not supported on this value's type.
    BadType,
    /// Key not present (record field, map key, exported name).
    BadKey,
    /// Module name already registered.
    ModuleExists,
    /// Referenced module not loaded.
    ModuleNotFound,
    /// Module does not expose that name.
    ExportNotFound,
    /// Index outside the container.
    OutOfBounds,
    /// Allocation failed or the max heap size was exceeded.
    Alloc,
    /// Invariant violation; indicates a bug in the runtime.
    Internal,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::BadState => "BAD_STATE",
            ErrorKind::BadArg => "BAD_ARG",
            ErrorKind::BadSource => "BAD_SOURCE",
            ErrorKind::BadType => "BAD_TYPE",
            ErrorKind::BadKey => "BAD_KEY",
            ErrorKind::ModuleExists => "MODULE_EXISTS",
            ErrorKind::ModuleNotFound => "MODULE_NOT_FOUND",
            ErrorKind::ExportNotFound => "EXPORT_NOT_FOUND",
            ErrorKind::OutOfBounds => "OUT_OF_BOUNDS",
            ErrorKind::Alloc => "ALLOC",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An embedding API error: a kind plus an optional detail message.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
}

impl Error {
    /// Error with a shared static message. Does not allocate.
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            message: Cow::Borrowed(message),
        }
    }

    /// Error with an owned detail message.
    pub fn detailed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Cow::Owned(message.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) const fn alloc() -> Self {
        Self::new(ErrorKind::Alloc, "out of memory: max heap size exceeded")
    }

    pub(crate) const fn bad_handle() -> Self {
        Self::new(
            ErrorKind::BadArg,
            "bad handle: value does not belong to this vm",
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

impl std::error::Error for Error {}

/// Result alias for embedding operations.
pub type VmResult<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_message_does_not_allocate() {
        let err = Error::new(ErrorKind::BadKey, "key not found");
        assert!(matches!(err.message, Cow::Borrowed(_)));
        assert_eq!(err.kind(), ErrorKind::BadKey);
    }

    #[test]
    fn test_display_includes_kind_name() {
        let err = Error::detailed(ErrorKind::OutOfBounds, "index 7 out of bounds for size 3");
        let text = err.to_string();
        assert!(text.starts_with("OUT_OF_BOUNDS:"));
        assert!(text.contains("index 7"));
    }
}
