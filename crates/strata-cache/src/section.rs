//! Cache sections.
//!
//! A section is one independently configured region of the cache: a
//! geometry (direct-mapped, set-associative, or fully-associative), a
//! line size that fixes its page capacity, replacement state, and its
//! own statistics. Sections own their resident pages exclusively; the
//! engine routes each page id to exactly one section.
//!
//! Lock discipline: the section lock is acquired before any page
//! lock, and hit paths release it before taking the page lock. A page
//! is pinned under the section lock, so the eviction scan (which also
//! runs under the section lock) can trust `pin_count == 0`.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use strata_common::types::{PageId, SectionId};
use strata_store::BackingStore;
use tracing::debug;

use crate::config::{SectionConfig, Structure};
use crate::error::{CacheError, CacheResult};
use crate::lru::LruStore;
use crate::page::{Page, PageGuard};
use crate::sets::SetStore;
use crate::stats::{SectionStats, SectionStatsSnapshot};

/// Geometry-specific slot storage.
#[derive(Debug)]
enum SectionStore {
    Sets(SetStore),
    Lru(LruStore),
}

impl SectionStore {
    fn build(structure: Structure, capacity_pages: usize, associativity: usize) -> Self {
        match structure {
            Structure::DirectMapped => Self::Sets(SetStore::new(capacity_pages, 1)),
            Structure::SetAssociative => Self::Sets(SetStore::new(capacity_pages, associativity)),
            Structure::FullyAssociative => Self::Lru(LruStore::new(capacity_pages)),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Sets(s) => s.len(),
            Self::Lru(l) => l.len(),
        }
    }

    fn contains(&self, id: PageId) -> bool {
        match self {
            Self::Sets(s) => s.contains(id),
            Self::Lru(l) => l.contains(id),
        }
    }

    fn peek(&self, id: PageId) -> Option<&Arc<Page>> {
        match self {
            Self::Sets(s) => s.peek(id),
            Self::Lru(l) => l.peek(id),
        }
    }

    fn get(&mut self, id: PageId) -> Option<Arc<Page>> {
        match self {
            Self::Sets(s) => s.get(id),
            Self::Lru(l) => l.get(id),
        }
    }

    fn remove(&mut self, id: PageId) {
        match self {
            Self::Sets(s) => {
                s.remove(id);
            }
            Self::Lru(l) => {
                l.remove(id);
            }
        }
    }

    fn pages(&self) -> Vec<Arc<Page>> {
        match self {
            Self::Sets(s) => s.pages().cloned().collect(),
            Self::Lru(l) => l.pages().cloned().collect(),
        }
    }
}

#[derive(Debug)]
struct SectionInner {
    size_bytes: usize,
    store: SectionStore,
}

/// Outcome of a slot allocation.
///
/// `Installed` pages are fresh, zero-filled slots the caller must
/// load; `Resident` pages were already present (another thread won
/// the race between the caller's miss and its allocation).
pub(crate) enum SectionSlot {
    Installed(PageGuard),
    Resident(PageGuard),
}

/// One region of the sectioned cache.
pub struct Section {
    id: SectionId,
    structure: Structure,
    line_size: usize,
    page_size: usize,
    associativity: usize,
    backing: Arc<dyn BackingStore>,
    inner: Mutex<SectionInner>,
    stats: SectionStats,
}

impl Section {
    pub(crate) fn new(
        id: SectionId,
        config: &SectionConfig,
        page_size: usize,
        backing: Arc<dyn BackingStore>,
    ) -> Self {
        let associativity = config.effective_associativity();
        let store = SectionStore::build(config.structure, config.capacity_pages(), associativity);
        Self {
            id,
            structure: config.structure,
            line_size: config.line_size,
            page_size,
            associativity,
            backing,
            inner: Mutex::new(SectionInner {
                size_bytes: config.size_bytes,
                store,
            }),
            stats: SectionStats::new(),
        }
    }

    /// Returns the section id.
    pub fn id(&self) -> SectionId {
        self.id
    }

    /// Returns the section's geometry.
    pub fn structure(&self) -> Structure {
        self.structure
    }

    /// Returns the line size in bytes.
    pub fn line_size(&self) -> usize {
        self.line_size
    }

    /// Returns the configured associativity.
    pub fn associativity(&self) -> usize {
        self.associativity
    }

    /// Returns the current section size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().size_bytes
    }

    /// Returns the number of pages the section can hold.
    pub fn capacity_pages(&self) -> usize {
        self.inner.lock().size_bytes / self.line_size
    }

    /// Returns the number of resident pages.
    pub fn page_count(&self) -> usize {
        self.inner.lock().store.len()
    }

    /// Returns true if `id` is resident, without touching recency.
    pub fn contains(&self, id: PageId) -> bool {
        self.inner.lock().store.contains(id)
    }

    /// Live statistics for this section.
    pub(crate) fn stats(&self) -> &SectionStats {
        &self.stats
    }

    /// Takes a statistics snapshot.
    pub fn stats_snapshot(&self) -> SectionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Resets the statistics.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Looks up `id`, returning a pinned, locked page on a hit.
    ///
    /// A miss records the access and returns `None` without loading;
    /// the engine is responsible for allocating and filling the slot.
    pub(crate) fn fetch(&self, id: PageId) -> Option<PageGuard> {
        let start = Instant::now();
        let page = {
            let mut inner = self.inner.lock();
            match inner.store.get(id) {
                Some(page) => {
                    page.pin();
                    Some(page)
                }
                None => None,
            }
        };

        match page {
            Some(page) => {
                let guard = PageGuard::acquire(page);
                self.stats.record_hit(start.elapsed());
                Some(guard)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Claims a slot for `id` and returns it pinned and locked.
    ///
    /// Dirty victims are written back before removal; a write-back
    /// failure leaves the victim resident (still dirty) and
    /// propagates. If every candidate slot is pinned the section is
    /// out of capacity.
    pub(crate) fn allocate(&self, id: PageId) -> CacheResult<SectionSlot> {
        let mut inner = self.inner.lock();

        if let Some(page) = inner.store.get(id) {
            page.pin();
            drop(inner);
            return Ok(SectionSlot::Resident(PageGuard::acquire(page)));
        }

        let page = self.install_locked(&mut inner, id)?;
        // Fresh page: nobody else can hold its lock yet, and the slot
        // must not become fetchable before the lock is held.
        let guard = PageGuard::acquire(page);
        drop(inner);
        Ok(SectionSlot::Installed(guard))
    }

    /// Best-effort load of `id` into this section.
    ///
    /// Already-resident pages are left untouched. Failures are
    /// dropped silently (the eventual real fetch will count the
    /// miss); nothing here touches the access counters.
    pub(crate) fn prefetch(&self, id: PageId) {
        let mut inner = self.inner.lock();
        if inner.store.contains(id) {
            return;
        }
        let page = match self.install_locked(&mut inner, id) {
            Ok(page) => page,
            Err(err) => {
                debug!(section = %self.id, page = %id, %err, "prefetch slot dropped");
                return;
            }
        };
        let mut buf = page.write_buf();
        drop(inner);

        let result = self.backing.read(id, &mut buf[..]);
        drop(buf);

        if let Err(err) = result {
            debug!(section = %self.id, page = %id, %err, "prefetch load dropped");
            self.discard(id, &page);
        }
        page.unpin();
    }

    /// Writes `page` back to the store if dirty and clears the flag.
    pub(crate) fn flush(&self, page: &Page) -> CacheResult<()> {
        if page.is_dirty() {
            let buf = page.read_buf();
            self.backing.write(page.id(), &buf[..])?;
            drop(buf);
            page.set_dirty(false);
        }
        Ok(())
    }

    /// Writes back every dirty resident page.
    pub(crate) fn flush_all(&self) -> CacheResult<()> {
        let inner = self.inner.lock();
        self.flush_all_locked(&inner)
    }

    /// Adjusts the section to `new_size_bytes`.
    ///
    /// Dirty pages are written back first, then the geometry is
    /// rebuilt empty at the new capacity. Callers must not hold pins
    /// into this section across a resize.
    pub(crate) fn resize(&self, new_size_bytes: usize) -> CacheResult<()> {
        let mut inner = self.inner.lock();
        if new_size_bytes == inner.size_bytes {
            return Ok(());
        }
        self.flush_all_locked(&inner)?;

        let capacity = new_size_bytes / self.line_size;
        inner.store = SectionStore::build(self.structure, capacity, self.associativity);
        inner.size_bytes = new_size_bytes;
        Ok(())
    }

    /// Drops the entry for `id` if it still holds exactly `page`.
    ///
    /// Used to undo a slot installation whose load failed.
    pub(crate) fn discard(&self, id: PageId, page: &Arc<Page>) {
        let mut inner = self.inner.lock();
        let same = inner
            .store
            .peek(id)
            .is_some_and(|resident| Arc::ptr_eq(resident, page));
        if same {
            inner.store.remove(id);
        }
    }

    fn flush_all_locked(&self, inner: &SectionInner) -> CacheResult<()> {
        for page in inner.store.pages() {
            self.flush(&page)?;
        }
        Ok(())
    }

    /// Installs a fresh zero-filled page for `id`, evicting if needed.
    /// The returned page carries one pin owned by the caller.
    fn install_locked(&self, inner: &mut SectionInner, id: PageId) -> CacheResult<Arc<Page>> {
        if inner.size_bytes / self.line_size == 0 {
            return Err(CacheError::OutOfCapacity { section: self.id });
        }

        match &mut inner.store {
            SectionStore::Sets(store) => {
                let set_idx = store.set_index(id);
                let way = match store.free_way(set_idx) {
                    Some(way) => way,
                    None => store
                        .find_victim(set_idx)
                        .ok_or(CacheError::OutOfCapacity { section: self.id })?,
                };
                if let Some(victim) = store.slot(set_idx, way) {
                    if victim.page.is_dirty() {
                        let buf = victim.page.read_buf();
                        self.backing.write(victim.id, &buf[..])?;
                        drop(buf);
                        victim.page.set_dirty(false);
                    }
                }
                let page = Arc::new(Page::new(id, self.page_size));
                page.pin();
                store.install(set_idx, way, Arc::clone(&page));
                Ok(page)
            }
            SectionStore::Lru(store) => {
                if store.is_full() {
                    let (victim_id, victim) = store
                        .find_victim()
                        .ok_or(CacheError::OutOfCapacity { section: self.id })?;
                    if victim.is_dirty() {
                        let buf = victim.read_buf();
                        self.backing.write(victim_id, &buf[..])?;
                        drop(buf);
                        victim.set_dirty(false);
                    }
                    store.remove(victim_id);
                }
                let page = Arc::new(Page::new(id, self.page_size));
                page.pin();
                store.insert(Arc::clone(&page));
                Ok(page)
            }
        }
    }
}

impl std::fmt::Debug for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Section")
            .field("id", &self.id)
            .field("structure", &self.structure)
            .field("size_bytes", &self.size_bytes())
            .field("line_size", &self.line_size)
            .field("pages", &self.page_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::MemStore;

    const PAGE: usize = 256;

    fn section(structure: Structure, lines: usize, assoc: usize) -> (Arc<Section>, Arc<MemStore>) {
        let store = Arc::new(MemStore::new(PAGE));
        let config = SectionConfig::new(lines * PAGE, PAGE, structure).with_associativity(assoc);
        let section = Arc::new(Section::new(
            SectionId::new(1),
            &config,
            PAGE,
            Arc::clone(&store) as Arc<dyn BackingStore>,
        ));
        (section, store)
    }

    fn install(section: &Section, id: u32) -> PageGuard {
        match section.allocate(PageId::new(id)).unwrap() {
            SectionSlot::Installed(g) | SectionSlot::Resident(g) => g,
        }
    }

    #[test]
    fn test_miss_then_hit() {
        let (section, _) = section(Structure::FullyAssociative, 4, 0);
        assert!(section.fetch(PageId::new(2)).is_none());

        let guard = install(&section, 2);
        drop(guard);

        assert!(section.fetch(PageId::new(2)).is_some());
        let snap = section.stats_snapshot();
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.accesses, snap.hits + snap.misses);
    }

    #[test]
    fn test_allocate_returns_resident_on_race() {
        let (section, _) = section(Structure::FullyAssociative, 4, 0);
        let first = install(&section, 2);
        drop(first);

        match section.allocate(PageId::new(2)).unwrap() {
            SectionSlot::Resident(_) => {}
            SectionSlot::Installed(_) => panic!("expected resident slot"),
        }
    }

    #[test]
    fn test_dirty_victim_written_back() {
        let (section, store) = section(Structure::FullyAssociative, 2, 0);
        {
            let mut guard = install(&section, 2);
            guard.with_mut(|buf| buf.fill(0xAA));
        }
        drop(install(&section, 3));
        // Capacity 2: installing a third page evicts id 2.
        drop(install(&section, 4));

        assert!(!section.contains(PageId::new(2)));
        assert_eq!(store.snapshot(PageId::new(2)).unwrap(), vec![0xAA; PAGE]);
    }

    #[test]
    fn test_all_pinned_is_out_of_capacity() {
        let (section, _) = section(Structure::FullyAssociative, 2, 0);
        let _a = install(&section, 2);
        let _b = install(&section, 3);

        let err = match section.allocate(PageId::new(4)) {
            Err(err) => err,
            Ok(_) => panic!("expected OutOfCapacity"),
        };
        assert!(matches!(err, CacheError::OutOfCapacity { .. }));
    }

    #[test]
    fn test_unpinned_pages_are_evictable() {
        let (section, _) = section(Structure::FullyAssociative, 2, 0);
        let _pinned = install(&section, 2);
        drop(install(&section, 3));

        // Page 3 is unpinned, so a new allocation must succeed.
        drop(install(&section, 4));
        assert!(section.contains(PageId::new(2)));
        assert!(!section.contains(PageId::new(3)));
    }

    #[test]
    fn test_direct_mapped_set_placement() {
        let (section, _) = section(Structure::DirectMapped, 8, 1);
        for id in [1u32, 9, 17] {
            drop(install(&section, id));
        }
        // All three ids collide in set 1; only the last survives.
        assert_eq!(section.page_count(), 1);
        assert!(section.contains(PageId::new(17)));
    }

    #[test]
    fn test_prefetch_loads_resident_page() {
        let (section, store) = section(Structure::FullyAssociative, 4, 0);
        store.write(PageId::new(7), &vec![0x55; PAGE]).unwrap();

        section.prefetch(PageId::new(7));
        assert!(section.contains(PageId::new(7)));

        let guard = section.fetch(PageId::new(7)).unwrap();
        assert_eq!(guard.data(), &vec![0x55; PAGE][..]);
    }

    #[test]
    fn test_prefetch_of_missing_page_is_dropped() {
        let (section, _) = section(Structure::FullyAssociative, 4, 0);
        section.prefetch(PageId::new(9));
        assert!(!section.contains(PageId::new(9)));
        assert_eq!(section.stats_snapshot().accesses, 0);
    }

    #[test]
    fn test_flush_clears_dirty() {
        let (section, store) = section(Structure::FullyAssociative, 2, 0);
        let mut guard = install(&section, 2);
        guard.with_mut(|buf| buf.fill(7));
        section.flush(guard.page()).unwrap();

        assert!(!guard.page().is_dirty());
        assert_eq!(store.snapshot(PageId::new(2)).unwrap(), vec![7; PAGE]);
    }

    #[test]
    fn test_resize_discards_and_flushes() {
        let (section, store) = section(Structure::FullyAssociative, 4, 0);
        {
            let mut guard = install(&section, 2);
            guard.with_mut(|buf| buf.fill(3));
        }
        section.resize(2 * PAGE).unwrap();

        assert_eq!(section.page_count(), 0);
        assert_eq!(section.capacity_pages(), 2);
        assert_eq!(store.snapshot(PageId::new(2)).unwrap(), vec![3; PAGE]);
    }

    #[test]
    fn test_discard_only_removes_same_page() {
        let (section, _) = section(Structure::FullyAssociative, 4, 0);
        let guard = install(&section, 2);
        let other = Arc::new(Page::new(PageId::new(2), PAGE));

        section.discard(PageId::new(2), &other);
        assert!(section.contains(PageId::new(2)));

        let page = Arc::clone(guard.page());
        drop(guard);
        section.discard(PageId::new(2), &page);
        assert!(!section.contains(PageId::new(2)));
    }
}
