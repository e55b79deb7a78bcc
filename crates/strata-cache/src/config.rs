//! Cache and section configuration.

use strata_common::constants::{
    DEFAULT_ASSOCIATIVITY, DEFAULT_LINE_SIZE, DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE,
};

/// The geometry of a cache section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    /// One way per set; a page maps to exactly one slot.
    DirectMapped,
    /// A fixed number of ways per set with clock replacement.
    SetAssociative,
    /// A single LRU-ordered pool spanning the whole section.
    FullyAssociative,
}

/// Configuration for the cache engine.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Total memory budget across all sections, in bytes.
    pub total_bytes: usize,
    /// Size of every page buffer, in bytes.
    pub page_size: usize,
    /// Line size of the default section created at construction.
    pub default_line_size: usize,
}

impl CacheConfig {
    /// Creates a configuration with the given total budget.
    pub fn new(total_bytes: usize) -> Self {
        Self {
            total_bytes,
            page_size: DEFAULT_PAGE_SIZE,
            default_line_size: DEFAULT_LINE_SIZE,
        }
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the default section's line size.
    pub fn with_default_line_size(mut self, line_size: usize) -> Self {
        self.default_line_size = line_size;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.total_bytes == 0 {
            return Err("total_bytes must be > 0");
        }
        if self.page_size < MIN_PAGE_SIZE {
            return Err("page_size below minimum");
        }
        if self.default_line_size == 0 {
            return Err("default_line_size must be > 0");
        }
        if self.total_bytes < self.default_line_size {
            return Err("total_bytes smaller than one line");
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024)
    }
}

/// Configuration for one cache section.
#[derive(Debug, Clone)]
pub struct SectionConfig {
    /// Section size in bytes.
    pub size_bytes: usize,
    /// Line size in bytes; `capacity_pages = size_bytes / line_size`.
    pub line_size: usize,
    /// Cache geometry.
    pub structure: Structure,
    /// Number of ways. Forced to 1 for direct-mapped sections and
    /// ignored for fully-associative ones.
    pub associativity: usize,
}

impl SectionConfig {
    /// Creates a section configuration with the default associativity.
    pub fn new(size_bytes: usize, line_size: usize, structure: Structure) -> Self {
        Self {
            size_bytes,
            line_size,
            structure,
            associativity: DEFAULT_ASSOCIATIVITY,
        }
    }

    /// Sets the associativity.
    pub fn with_associativity(mut self, associativity: usize) -> Self {
        self.associativity = associativity;
        self
    }

    /// The number of ways actually used for this geometry.
    pub fn effective_associativity(&self) -> usize {
        match self.structure {
            Structure::DirectMapped => 1,
            Structure::SetAssociative => self.associativity.max(2),
            Structure::FullyAssociative => self.capacity_pages().max(1),
        }
    }

    /// The number of page slots this section can hold.
    pub fn capacity_pages(&self) -> usize {
        if self.line_size == 0 {
            0
        } else {
            self.size_bytes / self.line_size
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.line_size == 0 {
            return Err("line_size must be > 0");
        }
        if self.structure == Structure::SetAssociative && self.associativity < 2 {
            return Err("set-associative sections need at least 2 ways");
        }
        Ok(())
    }
}
