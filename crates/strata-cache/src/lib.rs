//! # strata-cache
//!
//! A configurable, multi-section page cache for a disaggregated-memory
//! B+ tree.
//!
//! The cache absorbs page accesses in front of a slow backing store
//! and is carved into independently configured **sections**, each with
//! its own geometry, line size, associativity, and replacement policy:
//!
//! - **Direct-mapped / set-associative** sections use second-chance
//!   clock replacement over the ways of a set
//! - **Fully-associative** sections use LRU
//!
//! A routing layer steers each page id to a section based on per-page
//! or per-range mappings, so differently shaped access patterns
//! (random inner-node lookups vs. sequential leaf scans) can live in
//! differently tuned sections of the same memory budget.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_cache::{CacheConfig, SectionedCache};
//! use strata_store::{BackingStore, MemStore};
//!
//! # fn main() -> Result<(), strata_cache::CacheError> {
//! let store = Arc::new(MemStore::new(4096));
//! let cache = SectionedCache::new(
//!     CacheConfig::new(16 * 1024 * 1024),
//!     store as Arc<dyn BackingStore>,
//! )?;
//!
//! let mut page = cache.new_page()?;
//! page.with_mut(|buf| buf[0..4].copy_from_slice(b"root"));
//! cache.unpin_page(page, true);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod engine;
mod error;
mod lru;
mod optimizer;
mod page;
mod prefetch;
mod router;
mod section;
mod sets;
mod stats;

pub use config::{CacheConfig, SectionConfig, Structure};
pub use engine::SectionedCache;
pub use error::{CacheError, CacheResult};
pub use page::{Page, PageGuard};
pub use section::Section;
pub use stats::{SectionStats, SectionStatsSnapshot};
