//! Page-to-section routing.
//!
//! The router resolves a `PageId` to the section that may host it.
//! Lookup precedence: explicit per-page overrides, then range
//! mappings, then the default section.
//!
//! Range mappings are last-writer-wins over exactly the remapped
//! span: inserting a range trims every overlapping prior range down
//! to its non-overlapping remainder, so the stored ranges never
//! overlap and older mappings keep routing outside the new span.

use std::collections::{BTreeMap, HashMap};

use strata_common::types::{PageId, SectionId};

#[derive(Debug, Clone, Copy)]
struct RangeEntry {
    hi: u32,
    section: SectionId,
}

/// Maps page ids to section ids.
#[derive(Debug)]
pub(crate) struct Router {
    default_section: SectionId,
    points: HashMap<PageId, SectionId>,
    ranges: BTreeMap<u32, RangeEntry>,
}

impl Router {
    pub(crate) fn new(default_section: SectionId) -> Self {
        Self {
            default_section,
            points: HashMap::new(),
            ranges: BTreeMap::new(),
        }
    }

    pub(crate) fn default_section(&self) -> SectionId {
        self.default_section
    }

    /// Rebinds the fallback section for unmapped page ids.
    pub(crate) fn set_default(&mut self, section: SectionId) {
        self.default_section = section;
    }

    /// Routes a single page to `section`.
    pub(crate) fn map_page(&mut self, id: PageId, section: SectionId) {
        self.points.insert(id, section);
    }

    /// Routes the inclusive id range `[lo, hi]` to `section`.
    pub(crate) fn map_range(&mut self, lo: PageId, hi: PageId, section: SectionId) {
        let (lo, hi) = {
            let (a, b) = (lo.as_u32(), hi.as_u32());
            (a.min(b), a.max(b))
        };

        let overlapping: Vec<(u32, RangeEntry)> = self
            .ranges
            .range(..=hi)
            .filter(|(_, entry)| entry.hi >= lo)
            .map(|(&k, &entry)| (k, entry))
            .collect();

        for (old_lo, entry) in overlapping {
            self.ranges.remove(&old_lo);
            if old_lo < lo {
                self.ranges.insert(
                    old_lo,
                    RangeEntry {
                        hi: lo - 1,
                        section: entry.section,
                    },
                );
            }
            if entry.hi > hi {
                self.ranges.insert(
                    hi + 1,
                    RangeEntry {
                        hi: entry.hi,
                        section: entry.section,
                    },
                );
            }
        }

        self.ranges.insert(lo, RangeEntry { hi, section });
    }

    /// Resolves the section for `id`.
    pub(crate) fn lookup(&self, id: PageId) -> SectionId {
        if let Some(&section) = self.points.get(&id) {
            return section;
        }
        if let Some((_, entry)) = self.ranges.range(..=id.as_u32()).next_back() {
            if entry.hi >= id.as_u32() {
                return entry.section;
            }
        }
        self.default_section
    }

    /// Drops every mapping that routes to `section`.
    pub(crate) fn clear_section(&mut self, section: SectionId) {
        self.points.retain(|_, &mut s| s != section);
        self.ranges.retain(|_, entry| entry.section != section);
    }

    #[cfg(test)]
    fn range_count(&self) -> usize {
        self.ranges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(v: u32) -> PageId {
        PageId::new(v)
    }

    fn sec(v: u32) -> SectionId {
        SectionId::new(v)
    }

    #[test]
    fn test_default_fallback() {
        let router = Router::new(sec(0));
        assert_eq!(router.lookup(id(42)), sec(0));
    }

    #[test]
    fn test_precedence_point_over_range_over_default() {
        let mut router = Router::new(sec(0));
        router.map_range(id(100), id(199), sec(1));
        router.map_range(id(150), id(160), sec(2));
        router.map_page(id(155), sec(3));

        assert_eq!(router.lookup(id(120)), sec(1));
        assert_eq!(router.lookup(id(151)), sec(2));
        assert_eq!(router.lookup(id(155)), sec(3));
        assert_eq!(router.lookup(id(201)), sec(0));
    }

    #[test]
    fn test_remap_trims_overlapping_ranges() {
        let mut router = Router::new(sec(0));
        router.map_range(id(100), id(199), sec(1));
        router.map_range(id(150), id(160), sec(2));

        assert_eq!(router.lookup(id(149)), sec(1));
        assert_eq!(router.lookup(id(150)), sec(2));
        assert_eq!(router.lookup(id(160)), sec(2));
        assert_eq!(router.lookup(id(161)), sec(1));
        assert_eq!(router.range_count(), 3);
    }

    #[test]
    fn test_remap_swallows_contained_ranges() {
        let mut router = Router::new(sec(0));
        router.map_range(id(120), id(130), sec(1));
        router.map_range(id(140), id(150), sec(2));
        router.map_range(id(100), id(199), sec(3));

        for probe in [120, 130, 140, 150, 100, 199] {
            assert_eq!(router.lookup(id(probe)), sec(3));
        }
        assert_eq!(router.range_count(), 1);
    }

    #[test]
    fn test_reversed_bounds_accepted() {
        let mut router = Router::new(sec(0));
        router.map_range(id(20), id(10), sec(1));
        assert_eq!(router.lookup(id(15)), sec(1));
    }

    #[test]
    fn test_set_default_rebinds_fallback() {
        let mut router = Router::new(sec(0));
        router.set_default(sec(5));
        assert_eq!(router.default_section(), sec(5));
        assert_eq!(router.lookup(id(42)), sec(5));
    }

    #[test]
    fn test_clear_section_drops_mappings() {
        let mut router = Router::new(sec(0));
        router.map_page(id(7), sec(1));
        router.map_range(id(10), id(20), sec(1));
        router.map_range(id(30), id(40), sec(2));

        router.clear_section(sec(1));
        assert_eq!(router.lookup(id(7)), sec(0));
        assert_eq!(router.lookup(id(15)), sec(0));
        assert_eq!(router.lookup(id(35)), sec(2));
    }
}
