//! The B+ tree over the sectioned page cache.
//!
//! The tree is a *client* of the cache: every node lives in a page,
//! fetched and written back through `fetch_page` / `new_page` with
//! dirty unpins. On top of the persisted pages the tree keeps an
//! in-memory materialization of the subtrees it has already
//! deserialized; the search-path prefetcher descends that
//! materialization to predict the pages a lookup will touch and hands
//! them to the cache as one grouped hint.
//!
//! Metadata lives in the reserved metadata page:
//! `[magic: u32][root_pid: u32][pair_count: u32]`, little-endian.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut};
use parking_lot::RwLock;
use strata_cache::SectionedCache;
use strata_common::constants::META_PAGE_MAGIC;
use strata_common::types::PageId;
use tracing::debug;

use crate::config::TreeConfig;
use crate::cursor::Cursor;
use crate::error::{TreeError, TreeResult};
use crate::node::{InnerNode, LeafNode, Node};

struct TreeState {
    root: Node,
}

/// A B+ tree storing `u64` keys and values in cache pages.
///
/// Lookups run under a shared lock; inserts take the exclusive lock
/// (single writer). Duplicate keys are permitted; [`BPlusTree::get`]
/// returns every stored value for a key.
pub struct BPlusTree {
    cache: Arc<SectionedCache>,
    order: usize,
    state: RwLock<TreeState>,
    num_pairs: AtomicU64,
}

impl BPlusTree {
    /// Opens the tree stored behind `cache`, bootstrapping an empty
    /// tree if the metadata page does not exist yet.
    pub fn open(cache: Arc<SectionedCache>) -> TreeResult<Self> {
        let config = TreeConfig::for_page_size(cache.page_size());
        Self::open_with_config(cache, config)
    }

    /// Opens the tree with an explicit configuration.
    pub fn open_with_config(cache: Arc<SectionedCache>, config: TreeConfig) -> TreeResult<Self> {
        config.validate(cache.page_size())?;

        match cache.fetch_page(PageId::META) {
            Ok(guard) => {
                let mut b = guard.data();
                let magic = b.get_u32_le();
                let root_pid = PageId::new(b.get_u32_le());
                let pairs = b.get_u32_le();
                cache.unpin_page(guard, false);

                match magic {
                    META_PAGE_MAGIC => {
                        let root = Self::read_node_from(&cache, root_pid)?;
                        debug!(%root_pid, pairs, "opened existing tree");
                        Ok(Self {
                            cache,
                            order: config.order,
                            state: RwLock::new(TreeState { root }),
                            num_pairs: AtomicU64::new(u64::from(pairs)),
                        })
                    }
                    0 => Self::bootstrap(cache, config),
                    other => Err(TreeError::BadMagic(other)),
                }
            }
            Err(err) if err.is_not_found() => {
                let meta = cache.new_page()?;
                if meta.id() != PageId::META {
                    return Err(TreeError::MetadataPage { got: meta.id() });
                }
                cache.unpin_page(meta, true);
                Self::bootstrap(cache, config)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn bootstrap(cache: Arc<SectionedCache>, config: TreeConfig) -> TreeResult<Self> {
        let guard = cache.new_page()?;
        let root = Node::Leaf(LeafNode::empty(guard.id()));
        cache.unpin_page(guard, true);

        let tree = Self {
            cache,
            order: config.order,
            state: RwLock::new(TreeState { root }),
            num_pairs: AtomicU64::new(0),
        };
        {
            let state = tree.state.read();
            tree.write_node(&state.root)?;
            tree.write_metadata(state.root.pid())?;
        }
        debug!(order = config.order, "bootstrapped empty tree");
        Ok(tree)
    }

    /// Returns the number of key/value pairs.
    pub fn len(&self) -> u64 {
        self.num_pairs.load(Ordering::Relaxed)
    }

    /// Returns true if the tree holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cache the tree runs against.
    pub fn cache(&self) -> &Arc<SectionedCache> {
        &self.cache
    }

    /// Inserts a key/value pair. Duplicate keys accumulate.
    pub fn insert(&self, key: u64, value: u64) -> TreeResult<()> {
        let mut state = self.state.write();

        if let Some((sep, right)) = self.insert_node(&mut state.root, key, value)? {
            let guard = self.cache.new_page()?;
            let new_root_pid = guard.id();
            self.cache.unpin_page(guard, true);

            let old_root = std::mem::replace(
                &mut state.root,
                Node::Leaf(LeafNode::empty(PageId::INVALID)),
            );
            let old_pid = old_root.pid();
            let right_pid = right.pid();
            state.root = Node::Inner(InnerNode {
                pid: new_root_pid,
                keys: vec![sep],
                child_pages: vec![old_pid, right_pid],
                children: vec![Some(Box::new(old_root)), Some(Box::new(right))],
            });
            self.write_node(&state.root)?;
        }

        self.num_pairs.fetch_add(1, Ordering::Relaxed);
        self.write_metadata(state.root.pid())?;
        Ok(())
    }

    /// Returns every value stored under `key`.
    ///
    /// The descent first emits a search-path prefetch hint, then
    /// walks materialized children where available and reads the
    /// rest through the cache without materializing them.
    pub fn get(&self, key: u64) -> TreeResult<Vec<u64>> {
        self.prefetch_search_path(key);

        let state = self.state.read();
        let mut out = Vec::new();
        self.collect_node(&state.root, key, &mut out)?;
        Ok(out)
    }

    /// Issues a prefetch hint for the probable search path of `key`.
    ///
    /// Descends materialized inner nodes only, collecting the routed
    /// child page and its immediate siblings at every step, and stops
    /// at the first child that is not materialized (the path cannot
    /// be predicted past a node that would itself need a fetch). The
    /// collected ids go to the cache as one grouped batch.
    pub fn prefetch_search_path(&self, key: u64) {
        let state = self.state.read();
        let mut ids: Vec<PageId> = Vec::new();
        let mut node = &state.root;

        while let Node::Inner(inner) = node {
            let idx = inner.child_index(key);
            push_valid(&mut ids, inner.child_pages[idx]);
            if idx > 0 {
                push_valid(&mut ids, inner.child_pages[idx - 1]);
            }
            if idx + 1 < inner.child_pages.len() {
                push_valid(&mut ids, inner.child_pages[idx + 1]);
            }
            match inner.children[idx].as_deref() {
                Some(child) => node = child,
                None => break,
            }
        }
        drop(state);

        if !ids.is_empty() {
            self.cache.prefetch_pages(&ids);
        }
    }

    /// Returns a cursor positioned at the smallest key.
    pub fn cursor(&self) -> TreeResult<Cursor<'_>> {
        Cursor::new(self, 0)
    }

    /// Returns a cursor positioned at the first key `>= key`.
    pub fn cursor_at(&self, key: u64) -> TreeResult<Cursor<'_>> {
        Cursor::new(self, key)
    }

    /// Writes every dirty page back to the backing store.
    pub fn flush(&self) -> TreeResult<()> {
        self.cache.flush_all_pages()?;
        Ok(())
    }

    /// Collects one leaf's pairs starting at `key`.
    ///
    /// Returns the pairs with key `>= key` stored in the leaf the
    /// descent lands in, plus the separator bounding the leaf from
    /// above (`None` at the rightmost edge) for batch continuation.
    pub(crate) fn collect_batch(&self, key: u64) -> TreeResult<(Vec<(u64, u64)>, Option<u64>)> {
        let state = self.state.read();
        let mut out = Vec::new();
        let next = self.batch_node(&state.root, key, None, &mut out)?;
        Ok((out, next))
    }

    fn collect_node(&self, node: &Node, key: u64, out: &mut Vec<u64>) -> TreeResult<()> {
        match node {
            Node::Leaf(leaf) => {
                leaf.values_for(key, out);
                Ok(())
            }
            Node::Inner(inner) => {
                let idx = inner.child_index(key);
                match inner.children[idx].as_deref() {
                    Some(child) => self.collect_node(child, key, out),
                    None => {
                        let child = self.read_node(inner.child_pages[idx])?;
                        self.collect_node(&child, key, out)
                    }
                }
            }
        }
    }

    fn batch_node(
        &self,
        node: &Node,
        key: u64,
        bound: Option<u64>,
        out: &mut Vec<(u64, u64)>,
    ) -> TreeResult<Option<u64>> {
        match node {
            Node::Leaf(leaf) => {
                let start = leaf.keys.partition_point(|&k| k < key);
                for i in start..leaf.keys.len() {
                    out.push((leaf.keys[i], leaf.values[i]));
                }
                Ok(bound)
            }
            Node::Inner(inner) => {
                let idx = inner.child_index(key);
                let bound = if idx < inner.keys.len() {
                    Some(inner.keys[idx])
                } else {
                    bound
                };
                match inner.children[idx].as_deref() {
                    Some(child) => self.batch_node(child, key, bound, out),
                    None => {
                        let child = self.read_node(inner.child_pages[idx])?;
                        self.batch_node(&child, key, bound, out)
                    }
                }
            }
        }
    }

    /// Recursive insert; returns the separator and right sibling when
    /// the node split.
    fn insert_node(&self, node: &mut Node, key: u64, value: u64) -> TreeResult<Option<(u64, Node)>> {
        match node {
            Node::Leaf(leaf) => {
                leaf.insert(key, value);
                if leaf.keys.len() > self.order {
                    let (sep, mut right) = leaf.split();
                    let guard = self.cache.new_page()?;
                    right.pid = guard.id();
                    self.cache.unpin_page(guard, true);

                    let right = Node::Leaf(right);
                    self.write_node(&right)?;
                    self.write_leaf(leaf)?;
                    Ok(Some((sep, right)))
                } else {
                    self.write_leaf(leaf)?;
                    Ok(None)
                }
            }
            Node::Inner(inner) => {
                let idx = inner.child_index(key);
                if inner.children[idx].is_none() {
                    let child = self.read_node(inner.child_pages[idx])?;
                    inner.children[idx] = Some(Box::new(child));
                }
                let child = match inner.children[idx].as_deref_mut() {
                    Some(child) => child,
                    None => return Err(TreeError::TruncatedNode(inner.pid)),
                };

                let Some((sep, right)) = self.insert_node(child, key, value)? else {
                    return Ok(None);
                };

                inner.keys.insert(idx, sep);
                inner.child_pages.insert(idx + 1, right.pid());
                inner.children.insert(idx + 1, Some(Box::new(right)));

                if inner.keys.len() > self.order {
                    let (sep2, mut right_inner) = inner.split();
                    let guard = self.cache.new_page()?;
                    right_inner.pid = guard.id();
                    self.cache.unpin_page(guard, true);

                    let right = Node::Inner(right_inner);
                    self.write_node(&right)?;
                    self.write_inner(inner)?;
                    return Ok(Some((sep2, right)));
                }

                self.write_inner(inner)?;
                Ok(None)
            }
        }
    }

    fn read_node(&self, pid: PageId) -> TreeResult<Node> {
        Self::read_node_from(&self.cache, pid)
    }

    fn read_node_from(cache: &SectionedCache, pid: PageId) -> TreeResult<Node> {
        let guard = cache.fetch_page(pid)?;
        let node = Node::read_from(pid, guard.data());
        cache.unpin_page(guard, false);
        node
    }

    fn write_node(&self, node: &Node) -> TreeResult<()> {
        self.write_page(node.pid(), |buf| node.write_to(buf))
    }

    fn write_leaf(&self, leaf: &LeafNode) -> TreeResult<()> {
        self.write_page(leaf.pid, |buf| leaf.write_to(buf))
    }

    fn write_inner(&self, inner: &InnerNode) -> TreeResult<()> {
        self.write_page(inner.pid, |buf| inner.write_to(buf))
    }

    fn write_page(
        &self,
        pid: PageId,
        write: impl FnOnce(&mut [u8]) -> TreeResult<()>,
    ) -> TreeResult<()> {
        let mut guard = self.cache.fetch_page(pid)?;
        let result = guard.with_mut(write);
        self.cache.unpin_page(guard, true);
        result
    }

    fn write_metadata(&self, root_pid: PageId) -> TreeResult<()> {
        let pairs = self.num_pairs.load(Ordering::Relaxed) as u32;
        self.write_page(PageId::META, |buf| {
            let mut b = buf;
            b.put_u32_le(META_PAGE_MAGIC);
            b.put_u32_le(root_pid.as_u32());
            b.put_u32_le(pairs);
            Ok(())
        })
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("order", &self.order)
            .field("pairs", &self.len())
            .field("root", &self.state.read().root.pid())
            .finish()
    }
}

fn push_valid(ids: &mut Vec<PageId>, pid: PageId) {
    if pid.is_valid() {
        ids.push(pid);
    }
}
