//! # strata-tree
//!
//! A disaggregated-memory B+ tree running against the Strata
//! sectioned page cache.
//!
//! Tree nodes are fixed-size pages behind the cache; a slow backing
//! store models far memory underneath. The tree contributes the
//! cache's **search-path prefetcher**: descents over already
//! materialized nodes predict the pages a lookup will need and hand
//! them to the cache as grouped, non-blocking hints.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_cache::{CacheConfig, SectionedCache};
//! use strata_store::{BackingStore, MemStore};
//! use strata_tree::BPlusTree;
//!
//! # fn main() -> Result<(), strata_tree::TreeError> {
//! let store = Arc::new(MemStore::new(4096));
//! let cache = Arc::new(SectionedCache::new(
//!     CacheConfig::new(16 * 1024 * 1024),
//!     store as Arc<dyn BackingStore>,
//! )?);
//!
//! let tree = BPlusTree::open(cache)?;
//! tree.insert(42, 4200)?;
//! assert_eq!(tree.get(42)?, vec![4200]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod cursor;
mod error;
mod node;
mod tree;

pub use config::TreeConfig;
pub use cursor::Cursor;
pub use error::{TreeError, TreeResult};
pub use tree::BPlusTree;
