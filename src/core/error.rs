use std::fmt;

/// Coarse failure category returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-supplied value failed an adapter or precheck.
    InputError,
    /// A referenced book_id / item_id / field name does not exist.
    NotFound,
    /// The requested mutation would violate a cache invariant.
    InvariantError,
    /// The Store driver failed (transient or permanent).
    StoreError,
    /// The FSM reported a missing file, hash mismatch, or unreadable format.
    FormatError,
    /// `sync()` was called on a read-only Row.
    RowReadOnlyError,
    /// Two writers touched the same book at Store level; should be
    /// impossible under the single write lock and is treated as a bug.
    Conflict,
    /// The Store rolled back due to a constraint violation it enforces.
    IntegrityError,
    /// Any other driver-boundary failure (serialization, internal bug, ...).
    Internal,
    Io,
}

/// Structured context a caller can inspect without parsing `context`.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub book_ids: Vec<i64>,
    pub field: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
    pub extra: ErrorContext,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error {
            kind,
            context: context.into(),
            extra: ErrorContext::default(),
        }
    }

    pub fn with_book_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.extra.book_ids = ids.into_iter().collect();
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.extra.field = Some(field.into());
        self
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotFound, context)
    }

    pub fn input(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InputError, context)
    }

    pub fn invariant(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvariantError, context)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::StoreError)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::Internal, format!("serialization error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
