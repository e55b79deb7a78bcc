//! Set-based section storage.
//!
//! Backs direct-mapped and set-associative sections. Pages land in
//! set `id mod num_sets` and compete for that set's ways; replacement
//! is a second-chance clock over the ways, with the hand persisted in
//! the store (one hand per section, never shared).

use std::sync::Arc;

use strata_common::types::PageId;

use crate::page::Page;

/// One way of one set.
#[derive(Debug)]
pub(crate) struct SetSlot {
    pub id: PageId,
    pub page: Arc<Page>,
    pub referenced: bool,
}

/// Direct-mapped / set-associative storage.
#[derive(Debug)]
pub(crate) struct SetStore {
    num_sets: usize,
    associativity: usize,
    sets: Vec<Vec<Option<SetSlot>>>,
    clock_hand: usize,
    len: usize,
}

impl SetStore {
    pub(crate) fn new(capacity_pages: usize, associativity: usize) -> Self {
        let associativity = associativity.clamp(1, capacity_pages.max(1));
        let num_sets = (capacity_pages / associativity).max(1);
        let sets = (0..num_sets)
            .map(|_| (0..associativity).map(|_| None).collect())
            .collect();
        Self {
            num_sets,
            associativity,
            sets,
            clock_hand: 0,
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn set_index(&self, id: PageId) -> usize {
        id.as_u32() as usize % self.num_sets
    }

    pub(crate) fn contains(&self, id: PageId) -> bool {
        self.way_of(id).is_some()
    }

    /// Looks up `id` without touching the reference bit.
    pub(crate) fn peek(&self, id: PageId) -> Option<&Arc<Page>> {
        let (set_idx, way) = self.way_of(id)?;
        self.sets[set_idx][way].as_ref().map(|s| &s.page)
    }

    /// Looks up `id`; on a hit the slot's reference bit is set.
    pub(crate) fn get(&mut self, id: PageId) -> Option<Arc<Page>> {
        let set_idx = self.set_index(id);
        for way in self.sets[set_idx].iter_mut().flatten() {
            if way.id == id {
                way.referenced = true;
                return Some(Arc::clone(&way.page));
            }
        }
        None
    }

    /// The first empty way in `id`'s set, if any.
    pub(crate) fn free_way(&self, set_idx: usize) -> Option<usize> {
        self.sets[set_idx].iter().position(Option::is_none)
    }

    /// Selects a victim way in `set_idx` with the clock sweep.
    ///
    /// Pinned slots are skipped; referenced slots lose their bit and
    /// get a second chance. Two full sweeps with no candidate means
    /// every way is pinned.
    pub(crate) fn find_victim(&mut self, set_idx: usize) -> Option<usize> {
        let assoc = self.associativity;
        let mut hand = self.clock_hand % assoc;
        let mut chosen = None;

        for _ in 0..2 * assoc {
            match &mut self.sets[set_idx][hand] {
                None => {
                    chosen = Some(hand);
                    break;
                }
                Some(slot) => {
                    if slot.page.is_pinned() {
                        hand = (hand + 1) % assoc;
                        continue;
                    }
                    if slot.referenced {
                        slot.referenced = false;
                        hand = (hand + 1) % assoc;
                        continue;
                    }
                    chosen = Some(hand);
                    break;
                }
            }
        }

        if let Some(h) = chosen {
            self.clock_hand = (h + 1) % assoc;
        }
        chosen
    }

    pub(crate) fn slot(&self, set_idx: usize, way: usize) -> Option<&SetSlot> {
        self.sets[set_idx][way].as_ref()
    }

    /// Installs `page` at `(set_idx, way)`, returning the displaced
    /// slot if the way was occupied.
    pub(crate) fn install(
        &mut self,
        set_idx: usize,
        way: usize,
        page: Arc<Page>,
    ) -> Option<SetSlot> {
        let id = page.id();
        debug_assert_eq!(set_idx, self.set_index(id));
        let old = self.sets[set_idx][way].replace(SetSlot {
            id,
            page,
            referenced: true,
        });
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    pub(crate) fn remove(&mut self, id: PageId) -> Option<SetSlot> {
        let (set_idx, way) = self.way_of(id)?;
        let old = self.sets[set_idx][way].take();
        if old.is_some() {
            self.len -= 1;
        }
        old
    }

    /// Every resident page, in set order.
    pub(crate) fn pages(&self) -> impl Iterator<Item = &Arc<Page>> {
        self.sets
            .iter()
            .flat_map(|set| set.iter().flatten().map(|slot| &slot.page))
    }

    fn way_of(&self, id: PageId) -> Option<(usize, usize)> {
        let set_idx = self.set_index(id);
        self.sets[set_idx]
            .iter()
            .position(|w| w.as_ref().is_some_and(|s| s.id == id))
            .map(|way| (set_idx, way))
    }
}
