//! Tree errors.

use strata_cache::CacheError;
use strata_common::types::PageId;
use thiserror::Error;

/// Result type for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Errors that can occur during tree operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The page cache failed underneath the tree.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The metadata page carries an unknown magic number.
    #[error("metadata page has bad magic {0:#010x}")]
    BadMagic(u32),

    /// The cache did not hand out the reserved metadata page id.
    #[error("expected the metadata page, got page {got}")]
    MetadataPage {
        /// The id the cache returned instead.
        got: PageId,
    },

    /// A node page carries an unknown tag.
    #[error("page {pid} has unknown node tag {tag}")]
    BadNodeTag {
        /// The page the node was read from.
        pid: PageId,
        /// The tag that was found.
        tag: u32,
    },

    /// A node page is shorter than its header claims.
    #[error("page {0} holds a truncated node")]
    TruncatedNode(PageId),

    /// A node does not fit in one page.
    #[error("node needs {needed} bytes but a page holds {available}")]
    NodeOverflow {
        /// Bytes the serialized node requires.
        needed: usize,
        /// Bytes available in a page.
        available: usize,
    },

    /// The tree configuration is invalid for the cache's page size.
    #[error("configuration error: {0}")]
    Config(&'static str),
}
