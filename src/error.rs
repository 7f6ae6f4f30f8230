//! Error taxonomy for code allocation and repair.
//!
//! Allocation-path errors are returned to the immediate caller as [`SeqError`];
//! repair-path errors are collected per row into the repair report instead.

use crate::code::FormatError;
use crate::store::StoreError;
use std::fmt;
use std::time::Duration;

/// Allocation and repair errors
#[derive(Debug)]
pub enum SeqError {
    /// The scope reference could not be resolved to a scope code (fatal)
    ScopeNotFound(String),
    /// The record store could not be reached or timed out (recoverable)
    QueryFailure(StoreError),
    /// The record store refused the operation, e.g. a missing counter table
    /// or a value its columns cannot hold (fatal)
    StoreRejected(StoreError),
    /// A segment does not fit its template (fatal)
    Format(FormatError),
    /// The caller's insert kept hitting the unique constraint on the code column
    DuplicateOnInsert { code: String, attempts: u32 },
    /// The caller-imposed deadline elapsed before an allocation completed
    DeadlineExceeded { elapsed: Duration },
    /// The repair lock for a table could not be acquired in time
    LockTimeout(String),
    /// Malformed request (e.g. bulk count beyond the sequence width)
    InvalidRequest(String),
}

impl SeqError {
    /// Whether retrying the whole operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SeqError::QueryFailure(_)
                | SeqError::DuplicateOnInsert { .. }
                | SeqError::DeadlineExceeded { .. }
                | SeqError::LockTimeout(_)
        )
    }
}

impl fmt::Display for SeqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqError::ScopeNotFound(scope) => write!(f, "Scope not found: {scope}"),
            SeqError::QueryFailure(e) => write!(f, "Record store query failed: {e}"),
            SeqError::StoreRejected(e) => write!(f, "Record store rejected the operation: {e}"),
            SeqError::Format(e) => write!(f, "Format error: {e}"),
            SeqError::DuplicateOnInsert { code, attempts } => write!(
                f,
                "Code {code} collided with an existing record after {attempts} attempt(s)"
            ),
            SeqError::DeadlineExceeded { elapsed } => {
                write!(f, "Allocation deadline exceeded after {}ms", elapsed.as_millis())
            }
            SeqError::LockTimeout(msg) => write!(f, "Repair lock timeout: {msg}"),
            SeqError::InvalidRequest(msg) => write!(f, "Invalid request: {msg}"),
        }
    }
}

impl std::error::Error for SeqError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SeqError::QueryFailure(e) | SeqError::StoreRejected(e) => Some(e),
            SeqError::Format(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FormatError> for SeqError {
    fn from(err: FormatError) -> Self {
        SeqError::Format(err)
    }
}

/// Transient store errors become [`SeqError::QueryFailure`], everything else
/// [`SeqError::StoreRejected`]
impl From<StoreError> for SeqError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            SeqError::QueryFailure(err)
        } else {
            SeqError::StoreRejected(err)
        }
    }
}
