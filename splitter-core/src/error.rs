use thiserror::Error;

#[derive(Error, Debug)]
pub enum SplitterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error("invalid payload size: {0}")]
    InvalidPayloadSize(String),

    #[error("header nonce mismatch")]
    NonceMismatch,

    #[error("authentication failed")]
    Authentication,

    #[error("unexpected end of stream before final frame")]
    UnexpectedEof,

    #[error("unexpected data after final frame")]
    UnexpectedData,

    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    #[error("path cannot contain parent references: {0}")]
    PathParentReference(String),

    #[error("frame sequence counter exhausted")]
    SequenceOverflow,

    #[error("manifest encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SplitterError>;

impl SplitterError {
    /// Wraps the error so it can travel through an `io::Read` adapter.
    pub fn into_io(self) -> std::io::Error {
        match self {
            SplitterError::Io(e) => e,
            other => std::io::Error::other(other),
        }
    }

    /// Recovers the typed error after a byte copy through a codec adapter.
    pub fn from_io(err: std::io::Error) -> SplitterError {
        match err.downcast::<SplitterError>() {
            Ok(inner) => inner,
            Err(err) => SplitterError::Io(err),
        }
    }
}

impl From<SplitterError> for std::io::Error {
    fn from(err: SplitterError) -> Self {
        err.into_io()
    }
}
