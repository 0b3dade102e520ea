use thiserror::Error;

/// Errors surfaced by lock stores and the task mutex.
#[derive(Debug, Error)]
pub enum LockError {
    /// The backing key-value store could not be reached or answered with a
    /// failure. Acquisition treats this as "could not acquire"; callers must
    /// never proceed unprotected on the strength of a failed backend.
    #[error("Lock backend unavailable: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, LockError>;
