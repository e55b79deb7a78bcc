//! In-memory far-memory model.
//!
//! `MemStore` keeps page records in a hash map behind a mutex and
//! injects the configured latency on every access. It is the store
//! used throughout the test suites, where its read/write counters
//! make write-back behavior observable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use strata_common::types::PageId;

use crate::error::{StoreError, StoreResult};
use crate::latency::LatencyProfile;
use crate::BackingStore;

struct MemStoreInner {
    pages: HashMap<PageId, Box<[u8]>>,
    next_id: u32,
}

/// An in-memory backing store with simulated access latency.
pub struct MemStore {
    page_size: usize,
    latency: LatencyProfile,
    inner: Mutex<MemStoreInner>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemStore {
    /// Creates a store for pages of `page_size` bytes with no latency.
    pub fn new(page_size: usize) -> Self {
        Self::with_latency(page_size, LatencyProfile::NONE)
    }

    /// Creates a store with the given latency profile.
    pub fn with_latency(page_size: usize, latency: LatencyProfile) -> Self {
        Self {
            page_size,
            latency,
            inner: Mutex::new(MemStoreInner {
                pages: HashMap::new(),
                next_id: PageId::FIRST_DATA.as_u32(),
            }),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Returns the page size this store was created with.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the number of page records currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().pages.len()
    }

    /// Returns true if the store holds no page records.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pages.is_empty()
    }

    /// Returns true if the store has a record for `id`.
    pub fn contains(&self, id: PageId) -> bool {
        self.inner.lock().pages.contains_key(&id)
    }

    /// Total number of completed reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Total number of completed writes.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns a copy of the stored bytes for `id`, if present.
    pub fn snapshot(&self, id: PageId) -> Option<Vec<u8>> {
        self.inner.lock().pages.get(&id).map(|p| p.to_vec())
    }

    fn check_buf(&self, len: usize) -> StoreResult<()> {
        if len != self.page_size {
            return Err(StoreError::BufferSize {
                expected: self.page_size,
                got: len,
            });
        }
        Ok(())
    }
}

impl BackingStore for MemStore {
    fn allocate(&self) -> StoreResult<PageId> {
        let mut inner = self.inner.lock();
        let id = PageId::new(inner.next_id);
        inner.next_id += 1;
        inner
            .pages
            .insert(id, vec![0u8; self.page_size].into_boxed_slice());
        Ok(id)
    }

    fn read(&self, id: PageId, buf: &mut [u8]) -> StoreResult<()> {
        if !id.is_valid() {
            return Err(StoreError::InvalidPageId);
        }
        self.check_buf(buf.len())?;

        self.latency.simulate();

        let inner = self.inner.lock();
        let page = inner.pages.get(&id).ok_or(StoreError::NotFound(id))?;
        buf.copy_from_slice(page);
        drop(inner);

        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write(&self, id: PageId, buf: &[u8]) -> StoreResult<()> {
        if !id.is_valid() {
            return Err(StoreError::InvalidPageId);
        }
        self.check_buf(buf.len())?;

        self.latency.simulate();

        let mut inner = self.inner.lock();
        inner.pages.insert(id, buf.to_vec().into_boxed_slice());
        if id.as_u32() >= inner.next_id {
            inner.next_id = id.as_u32() + 1;
        }
        drop(inner);

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStore")
            .field("page_size", &self.page_size)
            .field("pages", &self.len())
            .field("reads", &self.reads())
            .field("writes", &self.writes())
            .finish()
    }
}
