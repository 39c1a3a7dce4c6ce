use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::{
    buffer::buffer_pool_manager::BufferPoolManager,
    storage::page::page::{FrameHeader, PageId},
};

/// Owns one pin on a page and gives it back to the pool when released or
/// dropped. Holds no latch; byte access through it latches per call.
pub struct BasicPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: Option<&'a FrameHeader>,
    page_id: PageId,
    is_dirty: bool,
}

impl<'a> BasicPageGuard<'a> {
    /// Adopts a pin the caller already holds on `frame`.
    pub fn new(bpm: &'a BufferPoolManager, frame: &'a FrameHeader) -> Self {
        BasicPageGuard {
            bpm,
            page_id: frame.page_id(),
            frame: Some(frame),
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn is_released(&self) -> bool {
        self.frame.is_none()
    }

    fn frame(&self) -> &'a FrameHeader {
        self.frame.expect("page guard used after release")
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.frame().read_data()
    }

    /// Latches the page exclusively for the lifetime of the returned guard and
    /// marks it dirty.
    pub fn data_mut(&mut self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.is_dirty = true;
        self.frame().write_data()
    }

    /// Unpins the page. Calling it again is a no-op.
    pub fn release(&mut self) {
        if self.frame.take().is_some() {
            self.bpm.unpin_page(self.page_id, self.is_dirty);
        }
    }

    /// Takes the shared latch, keeping the existing pin.
    pub fn upgrade_read(self) -> ReadPageGuard<'a> {
        let latch = self.frame().read_data();
        ReadPageGuard {
            latch: Some(latch),
            guard: self,
        }
    }

    /// Takes the exclusive latch, keeping the existing pin.
    pub fn upgrade_write(self) -> WritePageGuard<'a> {
        let latch = self.frame().write_data();
        WritePageGuard {
            latch: Some(latch),
            guard: self,
        }
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// A pinned page under its shared latch.
pub struct ReadPageGuard<'a> {
    latch: Option<RwLockReadGuard<'a, Box<[u8]>>>,
    guard: BasicPageGuard<'a>,
}

impl<'a> ReadPageGuard<'a> {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    pub fn data(&self) -> &[u8] {
        self.latch
            .as_deref()
            .expect("read guard used after release")
    }

    pub fn is_released(&self) -> bool {
        self.latch.is_none()
    }

    /// Drops the latch, then the pin. Idempotent.
    pub fn release(&mut self) {
        self.latch.take();
        self.guard.release();
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// A pinned page under its exclusive latch.
pub struct WritePageGuard<'a> {
    latch: Option<RwLockWriteGuard<'a, Box<[u8]>>>,
    guard: BasicPageGuard<'a>,
}

impl<'a> WritePageGuard<'a> {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    pub fn data(&self) -> &[u8] {
        self.latch
            .as_deref()
            .expect("write guard used after release")
    }

    /// Mutable bytes. The page is unpinned dirty once the guard goes away.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.guard.is_dirty = true;
        self.latch
            .as_deref_mut()
            .expect("write guard used after release")
    }

    pub fn is_released(&self) -> bool {
        self.latch.is_none()
    }

    /// Drops the latch, then the pin. Idempotent.
    pub fn release(&mut self) {
        self.latch.take();
        self.guard.release();
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
