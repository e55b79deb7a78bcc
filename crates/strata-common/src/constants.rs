//! System-wide constants for Strata.
//!
//! This module defines constants used across the cache and the tree.

// =============================================================================
// Page and Line Geometry
// =============================================================================

/// Default page size in bytes (4 KB).
///
/// Matches the far-memory transfer granularity the cache is modeled
/// around; every page buffer in the system has this size unless the
/// cache is constructed with a different one.
pub const DEFAULT_PAGE_SIZE: usize = 4 * 1024;

/// Minimum page size in bytes.
pub const MIN_PAGE_SIZE: usize = 512;

/// Default cache line size in bytes (4 KB).
///
/// A line is the budget unit of a section: `capacity_pages` is
/// `size_bytes / line_size`.
pub const DEFAULT_LINE_SIZE: usize = 4 * 1024;

/// Minimum number of lines a section may be resized down to.
///
/// The size optimizer never shrinks a section below two lines so the
/// section stays functional.
pub const MIN_SECTION_LINES: usize = 2;

/// Default associativity for set-associative sections.
pub const DEFAULT_ASSOCIATIVITY: usize = 8;

// =============================================================================
// Prefetch
// =============================================================================

/// Number of worker threads servicing prefetch hints.
pub const PREFETCH_WORKERS: usize = 2;

/// Key stride used by the range-scan cursor when prefetching ahead of
/// the next batch.
pub const ITER_PREFETCH_STRIDE: u64 = 100;

// =============================================================================
// Metadata Page
// =============================================================================

/// Magic number at the start of the tree's metadata page.
pub const META_PAGE_MAGIC: u32 = 0x00C0_FFEE;
