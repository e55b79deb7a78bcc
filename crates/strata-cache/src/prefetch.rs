//! Prefetch worker pool.
//!
//! Prefetch hints must never block the caller on backing store
//! latency, so the engine hands `(section, ids)` batches to a small
//! pool of worker threads over an unbounded channel and returns
//! immediately. Batches arrive pre-grouped by section to amortize
//! section lock acquisition.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use strata_common::types::PageId;

use crate::section::Section;

struct PrefetchJob {
    section: Arc<Section>,
    ids: Vec<PageId>,
}

#[derive(Default)]
struct Inflight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Inflight {
    fn begin(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// A fixed pool of threads servicing prefetch batches.
pub(crate) struct PrefetchPool {
    tx: Option<Sender<PrefetchJob>>,
    workers: Vec<JoinHandle<()>>,
    inflight: Arc<Inflight>,
}

impl PrefetchPool {
    pub(crate) fn new(workers: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<PrefetchJob>();
        let inflight = Arc::new(Inflight::default());

        let workers = (0..workers.max(1))
            .map(|i| {
                let rx: Receiver<PrefetchJob> = rx.clone();
                let inflight = Arc::clone(&inflight);
                thread::Builder::new()
                    .name(format!("strata-prefetch-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            for &id in &job.ids {
                                job.section.prefetch(id);
                            }
                            inflight.finish();
                        }
                    })
                    .expect("failed to spawn prefetch worker")
            })
            .collect();

        Self {
            tx: Some(tx),
            workers,
            inflight,
        }
    }

    /// Queues a batch; returns without waiting for completion.
    pub(crate) fn enqueue(&self, section: Arc<Section>, ids: Vec<PageId>) {
        if ids.is_empty() {
            return;
        }
        self.inflight.begin();
        let job = PrefetchJob { section, ids };
        match &self.tx {
            Some(tx) if tx.send(job).is_ok() => {}
            _ => self.inflight.finish(),
        }
    }

    /// Blocks until every queued batch has been serviced.
    pub(crate) fn wait_idle(&self) {
        self.inflight.wait_idle();
    }
}

impl Drop for PrefetchPool {
    fn drop(&mut self) {
        drop(self.tx.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SectionConfig, Structure};
    use strata_common::types::SectionId;
    use strata_store::{BackingStore, MemStore};

    const PAGE: usize = 128;

    fn section(store: &Arc<MemStore>, lines: usize) -> Arc<Section> {
        let config = SectionConfig::new(lines * PAGE, PAGE, Structure::FullyAssociative);
        Arc::new(Section::new(
            SectionId::new(1),
            &config,
            PAGE,
            Arc::clone(store) as Arc<dyn BackingStore>,
        ))
    }

    #[test]
    fn test_batch_serviced_async() {
        let store = Arc::new(MemStore::new(PAGE));
        for id in 2..6u32 {
            store.write(PageId::new(id), &vec![id as u8; PAGE]).unwrap();
        }
        let section = section(&store, 8);

        let pool = PrefetchPool::new(2);
        let ids: Vec<PageId> = (2..6).map(PageId::new).collect();
        pool.enqueue(Arc::clone(&section), ids);
        pool.wait_idle();

        for id in 2..6u32 {
            assert!(section.contains(PageId::new(id)));
        }
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let store = Arc::new(MemStore::new(PAGE));
        let section = section(&store, 2);
        let pool = PrefetchPool::new(1);
        pool.enqueue(section, Vec::new());
        pool.wait_idle();
    }

    #[test]
    fn test_shutdown_joins_workers() {
        let store = Arc::new(MemStore::new(PAGE));
        store.write(PageId::new(2), &vec![1; PAGE]).unwrap();
        let section = section(&store, 2);

        let pool = PrefetchPool::new(2);
        pool.enqueue(Arc::clone(&section), vec![PageId::new(2)]);
        drop(pool);

        assert!(section.contains(PageId::new(2)));
    }
}
