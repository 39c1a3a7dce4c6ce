use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use page_constants::PAGE_SIZE;

pub mod page_constants {
    // Size of a page on disk and of a frame in memory
    pub const PAGE_SIZE: usize = 1024 * 4;
}

pub type PageId = u32;
pub type FrameId = u32;

/// Marks an empty frame or an unassigned slot in an index page.
pub const INVALID_PAGE_ID: PageId = u32::MAX;

/// One slot of the buffer pool.
///
/// The bytes sit behind the frame's own latch. Page id and pin count are only
/// changed while the pool's bookkeeping lock is held, the atomics just let
/// readers peek without taking it.
///
/// `loading` is set while a read from disk fills the frame. A failed read
/// leaves the frame `load_failed` until its last pin is gone.
pub struct FrameHeader {
    pub frame_id: FrameId,
    page_id: AtomicU32,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    loading: AtomicBool,
    load_failed: AtomicBool,

    data: RwLock<Box<[u8]>>,
}

impl FrameHeader {
    pub fn new(frame_id: FrameId) -> Self {
        FrameHeader {
            frame_id,
            page_id: AtomicU32::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            load_failed: AtomicBool::new(false),
            data: RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id.load(Ordering::Acquire)
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Shared latch on the page bytes.
    pub fn read_data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Exclusive latch on the page bytes. Callers writing through a raw
    /// frame must report the change with `unpin_page(id, true)`.
    pub fn write_data(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id, Ordering::Release);
    }

    pub(crate) fn set_dirty(&self, is_dirty: bool) {
        self.is_dirty.store(is_dirty, Ordering::Release);
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::Release);
    }

    pub(crate) fn load_failed(&self) -> bool {
        self.load_failed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_load_failed(&self) {
        self.load_failed.store(true, Ordering::Release);
        self.set_loading(false);
    }

    // Returns the pin count after the increment
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn unpin(&self) -> u32 {
        self.pin_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Puts the header back into its free-list state. Bytes are reset by the
    /// caller, which already holds the latch.
    pub(crate) fn reset(&self) {
        self.set_page_id(INVALID_PAGE_ID);
        self.pin_count.store(0, Ordering::Release);
        self.set_dirty(false);
        self.set_loading(false);
        self.load_failed.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .field("loading", &self.is_loading())
            .field("load_failed", &self.load_failed())
            .finish()
    }
}
