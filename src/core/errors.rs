use thiserror::Error;

/// Errors surfaced by the storage and indexing core.
#[derive(Debug, Error)]
pub enum DbError {
    /// A page cannot accommodate the request. Heap tables recover by
    /// allocating a new page and indexes recover by splitting; it only
    /// escapes when a single record is too large for an empty page.
    #[error("not enough room in block")]
    NoRoom,

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no such file: {0}")]
    NoSuchFile(String),

    #[error("file already exists: {0}")]
    Exists(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("bad value: {0}")]
    BadValue(String),

    #[error("corrupt page: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Page-level outcome for record insertion and growth. `Full` is
/// control flow, not failure: every caller branches on it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("page full")]
    Full,

    #[error("page corrupt: {0}")]
    Corrupt(String),
}

impl From<PageError> for DbError {
    fn from(e: PageError) -> Self {
        match e {
            PageError::Full => DbError::NoRoom,
            PageError::Corrupt(msg) => DbError::Corrupt(msg),
        }
    }
}
