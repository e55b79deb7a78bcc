//! Cache errors.

use strata_common::types::{PageId, SectionId};
use strata_store::StoreError;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Id 0 was used as an input.
    #[error("invalid page ID")]
    InvalidPageId,

    /// The page has no record in the backing store.
    #[error("page {0} not found")]
    NotFound(PageId),

    /// Every slot the page could occupy is pinned.
    #[error("section {section} has no evictable slot")]
    OutOfCapacity {
        /// The section that could not produce a victim.
        section: SectionId,
    },

    /// An operation referenced an unknown section.
    #[error("section {0} not found")]
    SectionNotFound(SectionId),

    /// A page or range mapping referenced a non-existent section.
    #[error("cannot map pages to non-existent section {0}")]
    InvalidMapping(SectionId),

    /// The default section cannot be removed.
    #[error("the default section cannot be removed")]
    RemoveDefaultSection,

    /// An invalid cache or section configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A backing store failure during read or write-back.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CacheError {
    /// Returns true if the error indicates a missing store record.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Store(StoreError::NotFound(_))
        )
    }
}
