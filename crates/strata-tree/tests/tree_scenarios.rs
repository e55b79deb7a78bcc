//! End-to-end tree scenarios over the sectioned cache.

use std::sync::Arc;

use strata_cache::{CacheConfig, SectionedCache};
use strata_common::constants::META_PAGE_MAGIC;
use strata_common::types::PageId;
use strata_store::{BackingStore, MemStore};
use strata_tree::{BPlusTree, TreeConfig};

const PAGE: usize = 4096;

fn new_cache(total_pages: usize) -> (Arc<SectionedCache>, Arc<MemStore>) {
    let store = Arc::new(MemStore::new(PAGE));
    let config = CacheConfig::new(total_pages * PAGE)
        .with_page_size(PAGE)
        .with_default_line_size(PAGE);
    let cache = SectionedCache::new(config, Arc::clone(&store) as Arc<dyn BackingStore>)
        .map(Arc::new)
        .unwrap();
    (cache, store)
}

fn total_misses(cache: &SectionedCache) -> u64 {
    cache
        .get_all_section_stats()
        .iter()
        .map(|(_, s)| s.misses)
        .sum()
}

#[test]
fn empty_tree_lookups() {
    let (cache, _) = new_cache(64);
    let tree = BPlusTree::open(cache).unwrap();

    assert!(tree.is_empty());
    assert!(tree.get(7).unwrap().is_empty());

    let mut cursor = tree.cursor().unwrap();
    assert!(cursor.next().unwrap().is_none());
    assert!(cursor.is_end());
}

#[test]
fn insert_get_roundtrip() {
    let (cache, _) = new_cache(256);
    let tree = BPlusTree::open(cache).unwrap();

    for key in 0..500u64 {
        tree.insert(key, key * 3).unwrap();
    }
    assert_eq!(tree.len(), 500);

    for key in 0..500u64 {
        assert_eq!(tree.get(key).unwrap(), vec![key * 3]);
    }
    assert!(tree.get(500).unwrap().is_empty());
}

#[test]
fn duplicate_keys_accumulate() {
    let (cache, _) = new_cache(64);
    let tree = BPlusTree::open(cache).unwrap();

    for value in 0..5u64 {
        tree.insert(77, value).unwrap();
    }
    let mut values = tree.get(77).unwrap();
    values.sort_unstable();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
}

#[test]
fn roundtrip_survives_evictions() {
    // 16 cache pages against a tree of well over a hundred node pages
    // keeps the cache thrashing through the whole run.
    let (cache, _) = new_cache(16);
    let tree =
        BPlusTree::open_with_config(Arc::clone(&cache), TreeConfig::new(16)).unwrap();

    for key in 0..2_000u64 {
        tree.insert(key, key + 1).unwrap();
    }
    for key in 0..2_000u64 {
        assert_eq!(tree.get(key).unwrap(), vec![key + 1], "key {key}");
    }
    assert!(total_misses(&cache) > 0);
}

#[test]
fn range_scan_visits_everything_in_order() {
    let (cache, _) = new_cache(512);
    let tree =
        BPlusTree::open_with_config(Arc::clone(&cache), TreeConfig::new(16)).unwrap();

    for key in 0..10_000u64 {
        tree.insert(key, key * 2).unwrap();
    }

    let mut cursor = tree.cursor().unwrap();
    let mut expected = 0u64;
    while let Some((key, value)) = cursor.next().unwrap() {
        assert_eq!(key, expected);
        assert_eq!(value, key * 2);
        expected += 1;
    }
    assert_eq!(expected, 10_000);
    assert!(cursor.is_end());
    cache.drain_prefetches();
}

#[test]
fn cursor_positions_at_start_key() {
    let (cache, _) = new_cache(128);
    let tree = BPlusTree::open(cache).unwrap();

    for key in (0..100u64).map(|k| k * 10) {
        tree.insert(key, key).unwrap();
    }

    let mut cursor = tree.cursor_at(495).unwrap();
    assert_eq!(cursor.next().unwrap(), Some((500, 500)));
    assert_eq!(cursor.next().unwrap(), Some((510, 510)));
}

#[test]
fn prefetched_search_path_lookup_takes_no_misses() {
    let (cache, _) = new_cache(8192); // 32 MB comfortably holds the tree
    let tree = BPlusTree::open(Arc::clone(&cache)).unwrap();

    for key in 0..100_000u64 {
        tree.insert(key, key * 2).unwrap();
    }

    tree.prefetch_search_path(50_000);
    cache.drain_prefetches();
    cache.reset_all_stats();

    assert_eq!(tree.get(50_000).unwrap(), vec![100_000]);
    assert_eq!(total_misses(&cache), 0, "warm descent must not miss");
}

#[test]
fn reopened_tree_descends_on_cache_hits() {
    let (cache, _) = new_cache(8192);
    {
        let tree = BPlusTree::open(Arc::clone(&cache)).unwrap();
        for key in 0..100_000u64 {
            tree.insert(key, key * 2).unwrap();
        }
    }

    // A freshly opened tree has only the root materialized; its
    // descent reads inner nodes and the leaf through the cache.
    let tree = BPlusTree::open(Arc::clone(&cache)).unwrap();
    tree.prefetch_search_path(50_000);
    cache.drain_prefetches();
    cache.reset_all_stats();

    assert_eq!(tree.get(50_000).unwrap(), vec![100_000]);
    let stats = cache.get_all_section_stats();
    let hits: u64 = stats.iter().map(|(_, s)| s.hits).sum();
    let misses: u64 = stats.iter().map(|(_, s)| s.misses).sum();
    assert!(hits >= 2, "descent should hit inner and leaf pages");
    assert_eq!(misses, 0);
}

#[test]
fn tree_persists_through_the_store() {
    let store = {
        let (cache, store) = new_cache(256);
        let tree = BPlusTree::open(Arc::clone(&cache)).unwrap();
        for key in 0..1_000u64 {
            tree.insert(key, key + 7).unwrap();
        }
        tree.flush().unwrap();
        store
    };

    // A brand-new cache over the same store sees the whole tree.
    let config = CacheConfig::new(256 * PAGE)
        .with_page_size(PAGE)
        .with_default_line_size(PAGE);
    let cache = SectionedCache::new(config, Arc::clone(&store) as Arc<dyn BackingStore>)
        .map(Arc::new)
        .unwrap();
    let tree = BPlusTree::open(cache).unwrap();

    assert_eq!(tree.len(), 1_000);
    for key in (0..1_000u64).step_by(97) {
        assert_eq!(tree.get(key).unwrap(), vec![key + 7]);
    }
}

#[test]
fn metadata_page_layout() {
    let (cache, store) = new_cache(64);
    let tree = BPlusTree::open(Arc::clone(&cache)).unwrap();
    tree.insert(1, 1).unwrap();
    tree.insert(2, 2).unwrap();
    tree.flush().unwrap();

    let meta = store.snapshot(PageId::META).unwrap();
    let magic = u32::from_le_bytes(meta[0..4].try_into().unwrap());
    let root_pid = u32::from_le_bytes(meta[4..8].try_into().unwrap());
    let pairs = u32::from_le_bytes(meta[8..12].try_into().unwrap());

    assert_eq!(magic, META_PAGE_MAGIC);
    assert!(PageId::new(root_pid).is_valid());
    assert_eq!(pairs, 2);
}

#[test]
fn reopen_uses_persisted_root() {
    let (cache, _) = new_cache(256);
    {
        let tree = BPlusTree::open(Arc::clone(&cache)).unwrap();
        for key in 0..300u64 {
            tree.insert(key, key).unwrap();
        }
    }

    let tree = BPlusTree::open(cache).unwrap();
    assert_eq!(tree.len(), 300);
    assert_eq!(tree.get(299).unwrap(), vec![299]);
}
