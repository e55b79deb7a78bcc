//! The sectioned cache engine.
//!
//! `SectionedCache` is the public façade of the cache: it owns the
//! sections and the router, mints page ids, performs read-through on
//! misses, and coordinates global operations (section lifecycle,
//! flush-all, bulk statistics, miss-rate-driven resizing).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use strata_common::constants::PREFETCH_WORKERS;
use strata_common::types::{PageId, SectionId};
use strata_store::{BackingStore, StoreError};
use tracing::debug;

use crate::config::{CacheConfig, SectionConfig, Structure};
use crate::error::{CacheError, CacheResult};
use crate::optimizer::{self, SectionProfile};
use crate::page::PageGuard;
use crate::prefetch::PrefetchPool;
use crate::router::Router;
use crate::section::{Section, SectionSlot};
use crate::stats::SectionStatsSnapshot;

struct EngineState {
    sections: HashMap<SectionId, Arc<Section>>,
    router: Router,
    unallocated: usize,
    next_section_id: SectionId,
}

/// A configurable, multi-section page cache.
///
/// The cache is carved into independently configured sections; a
/// routing layer steers each page id to a section based on per-page
/// or per-range mappings. At construction the whole budget belongs to
/// a fully-associative default section; carve further sections out of
/// it by shrinking the default and calling
/// [`SectionedCache::create_section`].
pub struct SectionedCache {
    page_size: usize,
    total_bytes: usize,
    backing: Arc<dyn BackingStore>,
    state: RwLock<EngineState>,
    next_page_id: AtomicU32,
    prefetcher: PrefetchPool,
}

impl SectionedCache {
    /// Creates a cache over `backing` with the given configuration.
    pub fn new(config: CacheConfig, backing: Arc<dyn BackingStore>) -> CacheResult<Self> {
        config
            .validate()
            .map_err(|msg| CacheError::Config(msg.to_string()))?;

        let default_config = SectionConfig::new(
            config.total_bytes,
            config.default_line_size,
            Structure::FullyAssociative,
        );
        let default = Arc::new(Section::new(
            SectionId::DEFAULT,
            &default_config,
            config.page_size,
            Arc::clone(&backing),
        ));

        let mut sections = HashMap::new();
        sections.insert(SectionId::DEFAULT, default);

        Ok(Self {
            page_size: config.page_size,
            total_bytes: config.total_bytes,
            backing,
            state: RwLock::new(EngineState {
                sections,
                router: Router::new(SectionId::DEFAULT),
                unallocated: 0,
                next_section_id: SectionId::DEFAULT.next(),
            }),
            next_page_id: AtomicU32::new(PageId::META.as_u32()),
            prefetcher: PrefetchPool::new(PREFETCH_WORKERS),
        })
    }

    /// Returns the page buffer size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the total memory budget in bytes.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Returns the bytes not currently assigned to any section.
    pub fn unallocated_bytes(&self) -> usize {
        self.state.read().unallocated
    }

    /// Returns the number of resident pages across all sections.
    pub fn size(&self) -> usize {
        let sections: Vec<Arc<Section>> = self.state.read().sections.values().cloned().collect();
        sections.iter().map(|s| s.page_count()).sum()
    }

    // =========================================================================
    // Page operations
    // =========================================================================

    /// Allocates a fresh page and returns it pinned and locked.
    ///
    /// The first id handed out is the metadata page id; id 0 is never
    /// returned. The page is born dirty so its first eviction
    /// materializes it in the backing store.
    pub fn new_page(&self) -> CacheResult<PageGuard> {
        let id = PageId::new(self.next_page_id.fetch_add(1, Ordering::Relaxed));
        let section = self.section_for(id);
        let start = Instant::now();

        section.stats().record_miss();
        let guard = match section.allocate(id)? {
            SectionSlot::Installed(guard) | SectionSlot::Resident(guard) => guard,
        };
        guard.page().set_dirty(true);
        section.stats().record_miss_time(start.elapsed());
        Ok(guard)
    }

    /// Fetches page `id`, returning it pinned and locked.
    ///
    /// On a miss the page is loaded through the backing store;
    /// [`CacheError::NotFound`] is returned if the store has no
    /// record for `id`.
    pub fn fetch_page(&self, id: PageId) -> CacheResult<PageGuard> {
        if !id.is_valid() {
            return Err(CacheError::InvalidPageId);
        }
        let section = self.section_for(id);
        let start = Instant::now();

        if let Some(guard) = section.fetch(id) {
            return Ok(guard);
        }

        match section.allocate(id)? {
            SectionSlot::Resident(guard) => Ok(guard),
            SectionSlot::Installed(mut guard) => {
                let loaded = guard.with_buf_mut(|buf| self.backing.read(id, buf));
                match loaded {
                    Ok(()) => {
                        section.stats().record_miss_time(start.elapsed());
                        Ok(guard)
                    }
                    Err(err) => {
                        let page = Arc::clone(guard.page());
                        section.discard(id, &page);
                        drop(guard);
                        match err {
                            StoreError::NotFound(_) => Err(CacheError::NotFound(id)),
                            other => Err(other.into()),
                        }
                    }
                }
            }
        }
    }

    /// Adds a caller-managed pin to the guarded page.
    pub fn pin_page(&self, guard: &PageGuard) {
        guard.page().pin();
    }

    /// Releases the guard, ORing `dirty` into the page's dirty flag.
    pub fn unpin_page(&self, guard: PageGuard, dirty: bool) {
        guard.page().mark_dirty(dirty);
        drop(guard);
    }

    /// Writes the guarded page back to the store if it is dirty.
    pub fn flush_page(&self, guard: &PageGuard) -> CacheResult<()> {
        self.section_for(guard.id()).flush(guard.page())
    }

    /// Writes back every dirty page in every section.
    pub fn flush_all_pages(&self) -> CacheResult<()> {
        let sections: Vec<Arc<Section>> = self.state.read().sections.values().cloned().collect();
        for section in sections {
            section.flush_all()?;
        }
        Ok(())
    }

    /// Hints that page `id` will be needed soon.
    ///
    /// Never blocks on the backing store; failures are dropped.
    pub fn prefetch_page(&self, id: PageId) {
        self.prefetch_pages(&[id]);
    }

    /// Hints that `ids` will be needed soon, grouped by section so
    /// each worker batch amortizes one section's lock.
    pub fn prefetch_pages(&self, ids: &[PageId]) {
        let mut groups: HashMap<SectionId, (Arc<Section>, Vec<PageId>)> = HashMap::new();
        {
            let state = self.state.read();
            for &id in ids {
                if !id.is_valid() {
                    continue;
                }
                let section_id = state.router.lookup(id);
                let Some(section) = state.sections.get(&section_id) else {
                    continue;
                };
                groups
                    .entry(section_id)
                    .or_insert_with(|| (Arc::clone(section), Vec::new()))
                    .1
                    .push(id);
            }
        }
        for (_, (section, ids)) in groups {
            self.prefetcher.enqueue(section, ids);
        }
    }

    /// Blocks until every queued prefetch batch has been serviced.
    ///
    /// Prefetches are asynchronous hints; tests and benchmarks use
    /// this to observe their effects deterministically.
    pub fn drain_prefetches(&self) {
        self.prefetcher.wait_idle();
    }

    // =========================================================================
    // Section management
    // =========================================================================

    /// Creates a section, deducting its size from the unallocated
    /// budget. The granted size is clamped to what is available.
    pub fn create_section(&self, config: SectionConfig) -> CacheResult<SectionId> {
        config
            .validate()
            .map_err(|msg| CacheError::Config(msg.to_string()))?;

        let mut state = self.state.write();
        let granted = config.size_bytes.min(state.unallocated);
        let mut config = config;
        config.size_bytes = granted;

        let id = state.next_section_id;
        state.next_section_id = id.next();

        let section = Arc::new(Section::new(
            id,
            &config,
            self.page_size,
            Arc::clone(&self.backing),
        ));
        state.sections.insert(id, section);
        state.unallocated -= granted;

        debug!(section = %id, bytes = granted, ?config.structure, "section created");
        Ok(id)
    }

    /// Removes a section, reclaiming its bytes and clearing every
    /// router entry that references it. The default section cannot be
    /// removed.
    pub fn remove_section(&self, id: SectionId) -> CacheResult<()> {
        let mut state = self.state.write();
        if id == state.router.default_section() {
            return Err(CacheError::RemoveDefaultSection);
        }
        let section = state
            .sections
            .remove(&id)
            .ok_or(CacheError::SectionNotFound(id))?;

        section.flush_all()?;
        state.unallocated += section.size_bytes();
        state.router.clear_section(id);

        debug!(section = %id, "section removed");
        Ok(())
    }

    /// Resizes a section, moving the delta to or from the unallocated
    /// budget. Growth is clamped to what is available; the section's
    /// warm state is discarded.
    pub fn resize_section(&self, id: SectionId, new_size_bytes: usize) -> CacheResult<()> {
        let mut state = self.state.write();
        let section = state
            .sections
            .get(&id)
            .cloned()
            .ok_or(CacheError::SectionNotFound(id))?;

        let old = section.size_bytes();
        let granted = if new_size_bytes > old {
            old + (new_size_bytes - old).min(state.unallocated)
        } else {
            new_size_bytes
        };

        section.resize(granted)?;
        if granted >= old {
            state.unallocated -= granted - old;
        } else {
            state.unallocated += old - granted;
        }

        debug!(section = %id, from = old, to = granted, "section resized");
        Ok(())
    }

    /// Routes a single page to `section`.
    pub fn map_page_to_section(&self, id: PageId, section: SectionId) -> CacheResult<()> {
        let mut state = self.state.write();
        if !state.sections.contains_key(&section) {
            return Err(CacheError::InvalidMapping(section));
        }
        state.router.map_page(id, section);
        Ok(())
    }

    /// Routes the inclusive id range `[lo, hi]` to `section`.
    /// Overlapping prior ranges are trimmed (last writer wins).
    pub fn map_page_range_to_section(
        &self,
        lo: PageId,
        hi: PageId,
        section: SectionId,
    ) -> CacheResult<()> {
        let mut state = self.state.write();
        if !state.sections.contains_key(&section) {
            return Err(CacheError::InvalidMapping(section));
        }
        state.router.map_range(lo, hi, section);
        Ok(())
    }

    /// Resolves the section page `id` routes to.
    pub fn section_for_page(&self, id: PageId) -> SectionId {
        self.state.read().router.lookup(id)
    }

    /// Rebinds the fallback section for unmapped page ids.
    ///
    /// The previous default becomes removable; the new one is not.
    pub fn set_default_section(&self, section: SectionId) -> CacheResult<()> {
        let mut state = self.state.write();
        if !state.sections.contains_key(&section) {
            return Err(CacheError::SectionNotFound(section));
        }
        state.router.set_default(section);
        Ok(())
    }

    // =========================================================================
    // Statistics and optimization
    // =========================================================================

    /// Takes a statistics snapshot of one section.
    pub fn section_stats(&self, id: SectionId) -> CacheResult<SectionStatsSnapshot> {
        let state = self.state.read();
        state
            .sections
            .get(&id)
            .map(|s| s.stats_snapshot())
            .ok_or(CacheError::SectionNotFound(id))
    }

    /// Takes statistics snapshots of every section, ordered by id.
    pub fn get_all_section_stats(&self) -> Vec<(SectionId, SectionStatsSnapshot)> {
        let state = self.state.read();
        let mut stats: Vec<(SectionId, SectionStatsSnapshot)> = state
            .sections
            .iter()
            .map(|(&id, section)| (id, section.stats_snapshot()))
            .collect();
        stats.sort_by_key(|&(id, _)| id);
        stats
    }

    /// Resets the statistics of every section.
    pub fn reset_all_stats(&self) {
        let state = self.state.read();
        for section in state.sections.values() {
            section.reset_stats();
        }
    }

    /// Rebalances section sizes proportionally to their miss rates.
    ///
    /// The per-section snapshot is collected under the engine lock
    /// and the targets are applied outside it, shrinking sections
    /// before growing ones.
    pub fn optimize_section_sizes(&self) -> CacheResult<()> {
        let profiles: Vec<SectionProfile> = {
            let state = self.state.read();
            state
                .sections
                .values()
                .map(|section| SectionProfile {
                    id: section.id(),
                    size_bytes: section.size_bytes(),
                    line_size: section.line_size(),
                    stats: section.stats_snapshot(),
                })
                .collect()
        };

        let Some(plan) = optimizer::rebalance(&profiles, self.total_bytes) else {
            return Ok(());
        };
        for target in plan {
            self.resize_section(target.id, target.size_bytes)?;
        }
        Ok(())
    }

    fn section_for(&self, id: PageId) -> Arc<Section> {
        let state = self.state.read();
        let section_id = state.router.lookup(id);
        match state.sections.get(&section_id) {
            Some(section) => Arc::clone(section),
            None => {
                let default = state.router.default_section();
                Arc::clone(&state.sections[&default])
            }
        }
    }
}

impl std::fmt::Debug for SectionedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("SectionedCache")
            .field("total_bytes", &self.total_bytes)
            .field("page_size", &self.page_size)
            .field("sections", &state.sections.len())
            .field("unallocated", &state.unallocated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::MemStore;

    const PAGE: usize = 512;

    fn cache(lines: usize) -> (Arc<SectionedCache>, Arc<MemStore>) {
        let store = Arc::new(MemStore::new(PAGE));
        let config = CacheConfig::new(lines * PAGE)
            .with_page_size(PAGE)
            .with_default_line_size(PAGE);
        let cache = SectionedCache::new(config, Arc::clone(&store) as Arc<dyn BackingStore>)
            .map(Arc::new)
            .unwrap();
        (cache, store)
    }

    #[test]
    fn test_first_page_is_meta() {
        let (cache, _) = cache(8);
        let guard = cache.new_page().unwrap();
        assert_eq!(guard.id(), PageId::META);
        let second = cache.new_page().unwrap();
        assert_eq!(second.id(), PageId::FIRST_DATA);
    }

    #[test]
    fn test_fetch_rejects_invalid_id() {
        let (cache, _) = cache(8);
        assert!(matches!(
            cache.fetch_page(PageId::INVALID),
            Err(CacheError::InvalidPageId)
        ));
    }

    #[test]
    fn test_fetch_unknown_page_is_not_found() {
        let (cache, _) = cache(8);
        let err = cache.fetch_page(PageId::new(99)).unwrap_err();
        assert!(matches!(err, CacheError::NotFound(id) if id == PageId::new(99)));
        // The failed load must not leave a placeholder behind.
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_read_through_roundtrip() {
        let (cache, store) = cache(8);
        store.write(PageId::new(5), &vec![0x42; PAGE]).unwrap();

        let guard = cache.fetch_page(PageId::new(5)).unwrap();
        assert_eq!(guard.data(), &vec![0x42; PAGE][..]);
        cache.unpin_page(guard, false);

        // Second fetch hits.
        let _ = cache.fetch_page(PageId::new(5)).unwrap();
        let (_, stats) = cache.get_all_section_stats()[0];
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_unpin_dirty_survives_eviction() {
        let (cache, store) = cache(2);
        let a = {
            let mut guard = cache.new_page().unwrap();
            guard.with_mut(|buf| buf.fill(0xEE));
            let id = guard.id();
            cache.unpin_page(guard, true);
            id
        };
        // Fill the two slots and force `a` out.
        for _ in 0..2 {
            let guard = cache.new_page().unwrap();
            cache.unpin_page(guard, false);
        }

        assert_eq!(store.snapshot(a).unwrap(), vec![0xEE; PAGE]);
        let guard = cache.fetch_page(a).unwrap();
        assert_eq!(guard.data(), &vec![0xEE; PAGE][..]);
    }

    #[test]
    fn test_section_budget_accounting() {
        let (cache, _) = cache(16);
        assert_eq!(cache.unallocated_bytes(), 0);

        cache.resize_section(SectionId::DEFAULT, 8 * PAGE).unwrap();
        assert_eq!(cache.unallocated_bytes(), 8 * PAGE);

        let section = cache
            .create_section(SectionConfig::new(4 * PAGE, PAGE, Structure::DirectMapped))
            .unwrap();
        assert_eq!(cache.unallocated_bytes(), 4 * PAGE);

        cache.remove_section(section).unwrap();
        assert_eq!(cache.unallocated_bytes(), 8 * PAGE);
    }

    #[test]
    fn test_create_section_clamps_to_budget() {
        let (cache, _) = cache(16);
        cache.resize_section(SectionId::DEFAULT, 12 * PAGE).unwrap();

        let id = cache
            .create_section(SectionConfig::new(
                100 * PAGE,
                PAGE,
                Structure::FullyAssociative,
            ))
            .unwrap();
        assert_eq!(cache.unallocated_bytes(), 0);
        // Granted size is what was left, not what was asked.
        let snapshot = cache.section_stats(id);
        assert!(snapshot.is_ok());
    }

    #[test]
    fn test_default_section_cannot_be_removed() {
        let (cache, _) = cache(8);
        assert!(matches!(
            cache.remove_section(SectionId::DEFAULT),
            Err(CacheError::RemoveDefaultSection)
        ));
    }

    #[test]
    fn test_mapping_to_unknown_section_rejected() {
        let (cache, _) = cache(8);
        let missing = SectionId::new(9);
        assert!(matches!(
            cache.map_page_to_section(PageId::new(3), missing),
            Err(CacheError::InvalidMapping(_))
        ));
        assert!(matches!(
            cache.map_page_range_to_section(PageId::new(2), PageId::new(9), missing),
            Err(CacheError::InvalidMapping(_))
        ));
    }

    #[test]
    fn test_remove_section_reroutes_pages() {
        let (cache, _) = cache(16);
        cache.resize_section(SectionId::DEFAULT, 8 * PAGE).unwrap();
        let section = cache
            .create_section(SectionConfig::new(
                8 * PAGE,
                PAGE,
                Structure::FullyAssociative,
            ))
            .unwrap();
        cache
            .map_page_range_to_section(PageId::new(10), PageId::new(20), section)
            .unwrap();
        assert_eq!(cache.section_for_page(PageId::new(15)), section);

        cache.remove_section(section).unwrap();
        assert_eq!(cache.section_for_page(PageId::new(15)), SectionId::DEFAULT);
    }

    #[test]
    fn test_set_default_section() {
        let (cache, _) = cache(16);
        cache.resize_section(SectionId::DEFAULT, 8 * PAGE).unwrap();
        let section = cache
            .create_section(SectionConfig::new(
                8 * PAGE,
                PAGE,
                Structure::FullyAssociative,
            ))
            .unwrap();

        cache.set_default_section(section).unwrap();
        assert_eq!(cache.section_for_page(PageId::new(77)), section);

        // The old default is now removable, the new one is not.
        cache.remove_section(SectionId::DEFAULT).unwrap();
        assert!(matches!(
            cache.remove_section(section),
            Err(CacheError::RemoveDefaultSection)
        ));

        assert!(matches!(
            cache.set_default_section(SectionId::new(42)),
            Err(CacheError::SectionNotFound(_))
        ));
    }

    #[test]
    fn test_prefetch_then_fetch_hits() {
        let (cache, store) = cache(8);
        for id in 2..6u32 {
            store.write(PageId::new(id), &vec![id as u8; PAGE]).unwrap();
        }

        let ids: Vec<PageId> = (2..6).map(PageId::new).collect();
        cache.prefetch_pages(&ids);
        cache.drain_prefetches();
        cache.reset_all_stats();

        for id in 2..6u32 {
            let guard = cache.fetch_page(PageId::new(id)).unwrap();
            cache.unpin_page(guard, false);
        }
        let (_, stats) = cache.get_all_section_stats()[0];
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hits, 4);
    }

    #[test]
    fn test_pin_page_blocks_eviction() {
        let (cache, _) = cache(2);
        let guard = cache.new_page().unwrap();
        cache.pin_page(&guard);
        let id = guard.id();
        cache.unpin_page(guard, false);

        // One manual pin is still outstanding; the page cannot be
        // evicted even as new pages churn through the cache.
        for _ in 0..4 {
            let guard = cache.new_page().unwrap();
            cache.unpin_page(guard, false);
        }
        let section = cache.section_for(id);
        assert!(section.contains(id));
    }

    #[test]
    fn test_optimize_moves_budget_to_missing_section() {
        let (cache, store) = cache(32);
        cache.resize_section(SectionId::DEFAULT, 16 * PAGE).unwrap();
        let hot = cache
            .create_section(SectionConfig::new(
                4 * PAGE,
                PAGE,
                Structure::FullyAssociative,
            ))
            .unwrap();
        cache
            .map_page_range_to_section(PageId::new(100), PageId::new(199), hot)
            .unwrap();

        for id in 100..140u32 {
            store.write(PageId::new(id), &vec![0; PAGE]).unwrap();
        }
        // Default section stays warm on one page; the hot section
        // thrashes through 40 ids in 4 slots.
        store.write(PageId::new(50), &vec![0; PAGE]).unwrap();
        for _ in 0..3 {
            for id in 100..140u32 {
                let guard = cache.fetch_page(PageId::new(id)).unwrap();
                cache.unpin_page(guard, false);
            }
            let guard = cache.fetch_page(PageId::new(50)).unwrap();
            cache.unpin_page(guard, false);
        }

        let before = cache.section_stats(hot).unwrap();
        assert!(before.miss_rate() > 0.5);

        cache.optimize_section_sizes().unwrap();

        let state = cache.state.read();
        let hot_size = state.sections[&hot].size_bytes();
        let default_size = state.sections[&SectionId::DEFAULT].size_bytes();
        assert!(hot_size > default_size);
    }
}
