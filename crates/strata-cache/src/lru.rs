//! Fully-associative section storage.
//!
//! An arena-backed doubly-linked LRU list plus a `PageId → slot`
//! index. Hits and inserts go to the front in O(1); eviction walks
//! from the tail, skipping pinned entries.

use std::collections::HashMap;
use std::sync::Arc;

use strata_common::types::PageId;

use crate::page::Page;

#[derive(Debug)]
struct LruEntry {
    id: PageId,
    page: Arc<Page>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Fully-associative LRU storage.
#[derive(Debug)]
pub(crate) struct LruStore {
    capacity: usize,
    map: HashMap<PageId, usize>,
    slots: Vec<Option<LruEntry>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruStore {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub(crate) fn contains(&self, id: PageId) -> bool {
        self.map.contains_key(&id)
    }

    /// Looks up `id` without promoting the entry.
    pub(crate) fn peek(&self, id: PageId) -> Option<&Arc<Page>> {
        let idx = *self.map.get(&id)?;
        self.slots[idx].as_ref().map(|e| &e.page)
    }

    /// Looks up `id`; a hit moves the entry to the front.
    pub(crate) fn get(&mut self, id: PageId) -> Option<Arc<Page>> {
        let idx = *self.map.get(&id)?;
        self.unlink(idx);
        self.push_front(idx);
        self.slots[idx].as_ref().map(|e| Arc::clone(&e.page))
    }

    /// Inserts `page` at the front. The caller must have made room.
    pub(crate) fn insert(&mut self, page: Arc<Page>) {
        debug_assert!(!self.is_full(), "insert into full LRU store");
        let id = page.id();
        debug_assert!(!self.map.contains_key(&id));

        let entry = LruEntry {
            id,
            page,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(entry);
                idx
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.map.insert(id, idx);
        self.push_front(idx);
    }

    /// The least-recently-used unpinned entry, if any.
    pub(crate) fn find_victim(&self) -> Option<(PageId, Arc<Page>)> {
        let mut cursor = self.tail;
        while let Some(idx) = cursor {
            let entry = self.slots[idx].as_ref()?;
            if !entry.page.is_pinned() {
                return Some((entry.id, Arc::clone(&entry.page)));
            }
            cursor = entry.prev;
        }
        None
    }

    pub(crate) fn remove(&mut self, id: PageId) -> Option<Arc<Page>> {
        let idx = self.map.remove(&id)?;
        self.unlink(idx);
        let entry = self.slots[idx].take()?;
        self.free.push(idx);
        Some(entry.page)
    }

    /// Every resident page, most-recent first.
    pub(crate) fn pages(&self) -> impl Iterator<Item = &Arc<Page>> {
        LruIter {
            store: self,
            cursor: self.head,
        }
    }

    fn push_front(&mut self, idx: usize) {
        if let Some(entry) = self.slots[idx].as_mut() {
            entry.prev = None;
            entry.next = self.head;
        }
        if let Some(old_head) = self.head {
            if let Some(entry) = self.slots[old_head].as_mut() {
                entry.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_mut() {
            Some(entry) => {
                let links = (entry.prev, entry.next);
                entry.prev = None;
                entry.next = None;
                links
            }
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(entry) = self.slots[p].as_mut() {
                    entry.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(entry) = self.slots[n].as_mut() {
                    entry.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }
}

struct LruIter<'a> {
    store: &'a LruStore,
    cursor: Option<usize>,
}

impl<'a> Iterator for LruIter<'a> {
    type Item = &'a Arc<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let entry = self.store.slots[idx].as_ref()?;
        self.cursor = entry.next;
        Some(&entry.page)
    }
}
