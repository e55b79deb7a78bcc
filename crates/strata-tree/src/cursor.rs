//! Batch range-scan cursor.
//!
//! The cursor consumes the tree one leaf batch at a time. When the
//! last pair of a batch is handed out and another batch remains, the
//! cursor prefetches the search path of the continuation key and of a
//! key one stride ahead, so the next descent finds its pages warm.
//! Exhaustion is reported through `is_end` / `Ok(None)`; cursors are
//! not comparable to each other.

use strata_common::constants::ITER_PREFETCH_STRIDE;

use crate::error::TreeResult;
use crate::tree::BPlusTree;

/// A forward cursor over the tree's key/value pairs.
pub struct Cursor<'a> {
    tree: &'a BPlusTree,
    batch: Vec<(u64, u64)>,
    pos: usize,
    next_key: Option<u64>,
    ended: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(tree: &'a BPlusTree, start_key: u64) -> TreeResult<Self> {
        let (batch, next_key) = tree.collect_batch(start_key)?;
        let mut cursor = Self {
            tree,
            batch,
            pos: 0,
            next_key,
            ended: false,
        };
        if cursor.batch.is_empty() {
            cursor.refill()?;
        }
        Ok(cursor)
    }

    /// Returns the next pair, or `None` once the scan is exhausted.
    pub fn next(&mut self) -> TreeResult<Option<(u64, u64)>> {
        if self.ended {
            return Ok(None);
        }
        if self.pos >= self.batch.len() {
            self.refill()?;
            if self.ended {
                return Ok(None);
            }
        }

        let pair = self.batch[self.pos];
        self.pos += 1;

        if self.pos == self.batch.len() && self.next_key.is_some() {
            self.prefetch_ahead();
        }
        Ok(Some(pair))
    }

    /// Returns true once the scan is exhausted.
    pub fn is_end(&self) -> bool {
        self.ended
    }

    fn refill(&mut self) -> TreeResult<()> {
        loop {
            let Some(key) = self.next_key.take() else {
                self.ended = true;
                return Ok(());
            };
            let (batch, next_key) = self.tree.collect_batch(key)?;
            self.next_key = next_key;
            if !batch.is_empty() {
                self.batch = batch;
                self.pos = 0;
                return Ok(());
            }
        }
    }

    fn prefetch_ahead(&self) {
        if let Some(key) = self.next_key {
            self.tree.prefetch_search_path(key);
            self.tree
                .prefetch_search_path(key.saturating_add(ITER_PREFETCH_STRIDE));
        }
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("pos", &self.pos)
            .field("batch_len", &self.batch.len())
            .field("next_key", &self.next_key)
            .field("ended", &self.ended)
            .finish()
    }
}
