//! Pages and page guards.
//!
//! A [`Page`] is a fixed-size byte buffer with an id, a dirty flag, a
//! pin count, and a reader/writer lock over its contents. Pages are
//! shared as `Arc<Page>` between the owning section and callers.
//!
//! A [`PageGuard`] is the RAII handle returned by `fetch_page` and
//! `new_page`: it holds one pin and an *upgradable* read lock on the
//! buffer. Readers use [`PageGuard::data`]; mutations promote to the
//! exclusive lock for the duration of a closure and downgrade back,
//! so concurrent readers observe coherent page content while a writer
//! exists.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockUpgradableReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use strata_common::types::PageId;

type Buf = Box<[u8]>;
type UpgradableGuard = ArcRwLockUpgradableReadGuard<RawRwLock, Buf>;

/// A fixed-size page buffer resident in one cache section.
pub struct Page {
    id: PageId,
    size: usize,
    dirty: AtomicBool,
    pin_count: AtomicU32,
    data: Arc<RwLock<Buf>>,
}

impl Page {
    /// Creates a zero-filled page.
    pub(crate) fn new(id: PageId, size: usize) -> Self {
        Self {
            id,
            size,
            dirty: AtomicBool::new(false),
            pin_count: AtomicU32::new(0),
            data: Arc::new(RwLock::new(vec![0u8; size].into_boxed_slice())),
        }
    }

    /// Returns the page id.
    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true if the buffer was modified since the last
    /// write-back.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// ORs `dirty` into the dirty flag.
    #[inline]
    pub fn mark_dirty(&self, dirty: bool) {
        if dirty {
            self.set_dirty(true);
        }
    }

    /// Increments the pin count and returns the new value.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpinned page {} with pin_count = 0", self.id);
        old - 1
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Returns true while at least one pin is outstanding.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Shared read access to the buffer, used for write-back.
    pub(crate) fn read_buf(&self) -> RwLockReadGuard<'_, Buf> {
        self.data.read()
    }

    /// Exclusive access to the buffer without going through a guard,
    /// used by prefetch loads.
    pub(crate) fn write_buf(&self) -> RwLockWriteGuard<'_, Buf> {
        self.data.write()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("dirty", &self.is_dirty())
            .field("pin_count", &self.pin_count())
            .finish()
    }
}

/// RAII handle to a pinned page with the upgradable lock held.
///
/// Dropping the guard releases the lock and then the pin.
pub struct PageGuard {
    page: Arc<Page>,
    buf: Option<UpgradableGuard>,
}

impl PageGuard {
    /// Takes the upgradable lock on an already-pinned page.
    ///
    /// The caller transfers ownership of one pin to the guard.
    pub(crate) fn acquire(page: Arc<Page>) -> Self {
        let buf = page.data.upgradable_read_arc();
        Self {
            page,
            buf: Some(buf),
        }
    }

    /// Returns the page id.
    #[inline]
    pub fn id(&self) -> PageId {
        self.page.id()
    }

    /// Returns the underlying page.
    #[inline]
    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    /// Read access to the page contents.
    pub fn data(&self) -> &[u8] {
        let guard = self.buf.as_ref().expect("page lock released");
        &guard[..]
    }

    /// Mutates the page contents under the exclusive lock.
    ///
    /// The lock is promoted for the duration of the closure and then
    /// downgraded back to upgradable; the page is marked dirty.
    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.page.set_dirty(true);
        self.with_buf_mut(f)
    }

    /// Mutates the page contents without touching the dirty flag.
    ///
    /// Used by the engine when filling a freshly allocated slot from
    /// the backing store.
    pub(crate) fn with_buf_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let guard = self.buf.take().expect("page lock released");
        let mut write = ArcRwLockUpgradableReadGuard::upgrade(guard);
        let out = f(&mut write[..]);
        self.buf = Some(ArcRwLockWriteGuard::downgrade_to_upgradable(write));
        out
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        drop(self.buf.take());
        self.page.unpin();
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("id", &self.id())
            .field("dirty", &self.page.is_dirty())
            .finish()
    }
}
