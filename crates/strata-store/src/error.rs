//! Backing store errors.

use strata_common::types::PageId;
use thiserror::Error;

/// Result type for backing store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during backing store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Id 0 was used as an input.
    #[error("invalid page ID")]
    InvalidPageId,

    /// The page has no record in the store.
    #[error("page {0} not found in backing store")]
    NotFound(PageId),

    /// A transport or device failure.
    #[error("backing store I/O error: {0}")]
    Io(String),

    /// The supplied buffer does not match the store's page size.
    #[error("buffer length {got} does not match page size {expected}")]
    BufferSize {
        /// The store's configured page size.
        expected: usize,
        /// The length of the buffer that was supplied.
        got: usize,
    },
}
