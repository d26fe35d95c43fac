use thiserror::Error;

/// Errors returned by a [`ResourceStore`](crate::store::ResourceStore) call.
///
/// The discovery engine recovers from every one of these locally; they only
/// reach the caller when fetching the seed resource fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested resource does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The caller is not allowed to read the resource or kind
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The call did not answer within its time budget
    #[error("Store call timed out: {0}")]
    Timeout(String),

    /// Retryable failure (throttling, connection reset, ...)
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Anything else the backing system reported
    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Whether this outcome counts against the kind's circuit breaker.
    ///
    /// `NotFound` means the store answered, so it does not.
    pub fn trips_breaker(&self) -> bool {
        !matches!(self, StoreError::NotFound(_))
    }
}

/// Result type for store calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Main error type for platctx
#[derive(Error, Debug)]
pub enum PlatctxError {
    /// The seed resource could not be fetched; fatal for a discovery run
    #[error("Seed resource {seed} unavailable: {source}")]
    SeedUnavailable {
        seed: String,
        #[source]
        source: StoreError,
    },

    /// Store errors surfaced outside of a discovery run
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Relationship graph construction errors
    #[error("Invalid relationship graph: {0}")]
    InvalidGraph(String),

    /// Malformed discovery or resolve request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenient Result type using PlatctxError
pub type Result<T> = std::result::Result<T, PlatctxError>;
