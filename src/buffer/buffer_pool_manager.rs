use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, trace, warn};

use crate::{
    config::BufferPoolOptions,
    storage::{
        disk::{
            manager::DiskManager,
            scheduler::DiskScheduler,
        },
        page::{
            page::{page_constants::PAGE_SIZE, FrameHeader, FrameId, PageId, INVALID_PAGE_ID},
            page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard},
        },
    },
    utils::replacer::{LRUKReplacer, Replacer},
};

// Everything guarded by the pool lock
struct PoolState {
    // Resident pages and the frame holding each of them
    page_table: HashMap<PageId, FrameId>,

    // Frames holding no page
    free_list: VecDeque<FrameId>,

    // The replacer to find unpinned / candidate frames for eviction.
    replacer: LRUKReplacer,
}

/// Caches disk pages in a fixed set of frames.
///
/// Bookkeeping (page table, free list, replacer, pin counts and dirty flags)
/// sits behind one pool lock, page bytes behind a latch per frame. The pool
/// lock is never held while waiting on the disk: requests are queued under
/// it and awaited after it is released. An evicted dirty page keeps its
/// mapping until its write-back has landed, so a later fetch of it either
/// hits or reads what was written.
pub struct BufferPoolManager {
    pool_size: usize,
    next_page_id: AtomicU32,

    // The frame headers of the frames that this buffer pool manages
    frames: Box<[FrameHeader]>,

    state: Mutex<PoolState>,

    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(options: BufferPoolOptions, manager: Box<dyn DiskManager>) -> anyhow::Result<Self> {
        options.validate()?;

        let frames: Box<[FrameHeader]> = (0..options.pool_size)
            .map(|frame_id| FrameHeader::new(frame_id as FrameId))
            .collect();

        // Initially, every frame is in the free list.
        let free_list: VecDeque<FrameId> = (0..options.pool_size as FrameId).collect();

        debug!(
            pool_size = options.pool_size,
            replacer_k = options.replacer_k,
            "buffer pool created"
        );

        Ok(Self {
            pool_size: options.pool_size,
            next_page_id: AtomicU32::new(0),
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(options.pool_size),
                free_list,
                replacer: LRUKReplacer::new(options.pool_size, options.replacer_k),
            }),
            disk_scheduler: DiskScheduler::new(manager)?,
        })
    }

    /// Continues page id allocation after `next_page_id`, for pools reopened
    /// over an existing database file.
    pub fn with_next_page_id(self, next_page_id: PageId) -> Self {
        self.next_page_id.store(next_page_id, Ordering::Relaxed);
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Pin count of a resident page, `None` if the page is not in memory.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|frame_id| self.frame(*frame_id).pin_count())
    }

    fn frame(&self, frame_id: FrameId) -> &FrameHeader {
        &self.frames[frame_id as usize]
    }

    fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Finds a frame for a new resident page: the free list first, then a
    /// victim from the replacer. The frame comes back unmapped and unpinned,
    /// with the pool lock held again.
    ///
    /// A dirty victim stays mapped and pinned while its bytes are written
    /// back outside the pool lock. If that write fails the victim stays
    /// resident and dirty, and no frame is handed out.
    fn acquire_frame<'s>(
        &'s self,
        mut state: MutexGuard<'s, PoolState>,
    ) -> Option<(MutexGuard<'s, PoolState>, FrameId)> {
        loop {
            if let Some(frame_id) = state.free_list.pop_front() {
                return Some((state, frame_id));
            }

            let Some(frame_id) = state.replacer.evict() else {
                warn!("every frame in the buffer pool is pinned");
                return None;
            };
            let frame = self.frame(frame_id);
            let evicted_page_id = frame.page_id();

            if !frame.is_dirty() {
                state.page_table.remove(&evicted_page_id);
                debug!(frame_id, evicted_page_id, dirty = false, "evicted page");
                return Some((state, frame_id));
            }

            frame.pin();
            drop(state);
            let written = self.write_frame(evicted_page_id, frame);
            state = self.state.lock();

            let remaining = frame.unpin();
            if !written {
                frame.set_dirty(true);
                if remaining == 0 {
                    Self::mark_evictable(&mut state, frame_id);
                }
                error!(frame_id, evicted_page_id, "write-back failed, victim stays resident");
                return None;
            }

            if remaining == 0 && !frame.is_dirty() {
                // A hit during the write-back puts the frame back in the replacer
                if state.replacer.is_tracked(frame_id) {
                    state.replacer.set_evictable(frame_id, true);
                    state.replacer.remove(frame_id);
                }
                state.page_table.remove(&evicted_page_id);
                debug!(frame_id, evicted_page_id, dirty = true, "evicted page");
                return Some((state, frame_id));
            }

            // Pinned or dirtied again while the lock was released
            if remaining == 0 {
                Self::mark_evictable(&mut state, frame_id);
            }
        }
    }

    fn mark_evictable(state: &mut PoolState, frame_id: FrameId) {
        if !state.replacer.is_tracked(frame_id) {
            state.replacer.record_access(frame_id);
        }
        state.replacer.set_evictable(frame_id, true);
    }

    // Binds a frame to a page with a single pin. Caller holds the pool lock.
    fn install(&self, state: &mut PoolState, frame_id: FrameId, page_id: PageId) {
        let frame = self.frame(frame_id);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
    }

    // Copies the bytes out under a shared latch and waits for the write. The
    // dirty flag is cleared first so a concurrent writer sets it again.
    fn write_frame(&self, page_id: PageId, frame: &FrameHeader) -> bool {
        frame.set_dirty(false);
        let data: Box<[u8]> = frame.read_data().as_ref().into();

        match self.disk_scheduler.schedule_write(page_id, data).wait() {
            Ok(()) => true,
            Err(err) => {
                error!(page_id, error = %err, "failed to write page");
                false
            }
        }
    }

    /// Allocates a fresh page id and pins a zeroed frame for it.
    ///
    /// Returns `None` when every frame is pinned or a dirty victim could not
    /// be written back. No page id is consumed in that case.
    pub fn new_page(&self) -> Option<(PageId, &FrameHeader)> {
        let (mut state, frame_id) = self.acquire_frame(self.state.lock())?;
        let page_id = self.allocate_page();

        let frame = self.frame(frame_id);
        frame.write_data().fill(0);
        self.install(&mut state, frame_id, page_id);
        drop(state);

        trace!(page_id, frame_id, "new page");
        Some((page_id, frame))
    }

    /// Pins the page, reading it from disk if it is not resident.
    ///
    /// Returns `None` if the page cannot be brought in: every frame is
    /// pinned, a victim could not be written back, or the read failed. A
    /// fetch that finds the page still loading waits for the read and fails
    /// with it.
    pub fn fetch_page(&self, page_id: PageId) -> Option<&FrameHeader> {
        if page_id == INVALID_PAGE_ID {
            return None;
        }

        let state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            return self.pin_resident(state, page_id, frame_id);
        }

        let (mut state, frame_id) = self.acquire_frame(state)?;

        // The lock may have been released for a write-back
        if let Some(&resident) = state.page_table.get(&page_id) {
            self.frame(frame_id).reset();
            state.free_list.push_back(frame_id);
            return self.pin_resident(state, page_id, resident);
        }

        let frame = self.frame(frame_id);

        // Held until the bytes are in place. Anyone pinning the page in the
        // meantime sees it loading and blocks on this latch.
        let mut data = frame.write_data();
        self.install(&mut state, frame_id, page_id);
        frame.set_loading(true);

        let buffer = Arc::new(Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()));
        let read = self.disk_scheduler.schedule_read(page_id, Arc::clone(&buffer));
        drop(state);

        trace!(page_id, frame_id, "buffer pool miss");
        match read.wait() {
            Ok(()) => {
                data.copy_from_slice(&buffer.lock());
                frame.set_loading(false);
                Some(frame)
            }
            Err(err) => {
                error!(page_id, frame_id, error = %err, "failed to read page");
                data.fill(0);

                // Unmapped before the latch goes, so waiters see the failure
                // and nothing can flush these bytes under the page id
                {
                    let mut state = self.state.lock();
                    state.page_table.remove(&page_id);
                    frame.mark_load_failed();
                }
                drop(data);

                self.release_pin(frame_id, false);
                None
            }
        }
    }

    // Hit path. Waits out a load in flight and fails along with it.
    fn pin_resident(
        &self,
        mut state: MutexGuard<'_, PoolState>,
        page_id: PageId,
        frame_id: FrameId,
    ) -> Option<&FrameHeader> {
        let frame = self.frame(frame_id);
        frame.pin();
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
        let loading = frame.is_loading();
        drop(state);

        if loading {
            drop(frame.read_data());
            if frame.load_failed() {
                self.release_pin(frame_id, false);
                return None;
            }
        }

        trace!(page_id, frame_id, "buffer pool hit");
        Some(frame)
    }

    fn release_pin(&self, frame_id: FrameId, is_dirty: bool) {
        let mut state = self.state.lock();
        self.unpin_frame(&mut state, frame_id, is_dirty);
    }

    // Drops one pin. A frame whose load failed is no longer mapped, its last
    // pin hands it back to the free list.
    fn unpin_frame(&self, state: &mut PoolState, frame_id: FrameId, is_dirty: bool) {
        let frame = self.frame(frame_id);

        if frame.load_failed() {
            if frame.unpin() == 0 {
                state.replacer.set_evictable(frame_id, true);
                state.replacer.remove(frame_id);
                frame.reset();
                state.free_list.push_back(frame_id);
            }
            return;
        }

        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
    }

    /// Drops one pin on the page. `is_dirty` is OR-ed into the frame's dirty
    /// flag and never clears it.
    ///
    /// Returns `false` if the page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        if self.frame(frame_id).pin_count() == 0 {
            return false;
        }

        self.unpin_frame(&mut state, frame_id, is_dirty);
        true
    }

    /// Writes the page to disk regardless of its dirty flag and waits for the
    /// write to land. A page whose read from disk is still running is written
    /// once the read is done, and not at all if the read fails.
    ///
    /// Takes a shared latch on the page, so the calling thread must not hold
    /// a write guard on it.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        let (frame_id, frame) = {
            let mut state = self.state.lock();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                return false;
            };

            // Keep the page resident while its bytes are copied out
            let frame = self.frame(frame_id);
            frame.pin();
            state.replacer.set_evictable(frame_id, false);
            (frame_id, frame)
        };

        drop(frame.read_data());
        let flushed = !frame.load_failed() && self.write_frame(page_id, frame);

        self.release_pin(frame_id, !flushed);
        flushed
    }

    /// Flushes every resident page. Returns `false` if any write failed.
    pub fn flush_all_pages(&self) -> bool {
        let page_ids: Vec<PageId> = self.state.lock().page_table.keys().copied().collect();

        page_ids
            .into_iter()
            .map(|page_id| self.flush_page(page_id))
            .fold(true, |all, flushed| all && flushed)
    }

    /// Removes the page from the pool and releases its id on disk.
    ///
    /// Returns `false` only if the page is resident and pinned. Deleting a
    /// page that is not resident succeeds.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = self.frame(frame_id);
            if frame.pin_count() > 0 {
                return false;
            }

            state.page_table.remove(&page_id);
            state.replacer.remove(frame_id);
            frame.write_data().fill(0);
            frame.reset();
            state.free_list.push_back(frame_id);
        }

        // Ordered behind any write-back of the same page
        let deallocated = self.disk_scheduler.schedule_deallocate(page_id);
        drop(state);

        if let Err(err) = deallocated.wait() {
            warn!(page_id, error = %err, "disk manager failed to deallocate page");
        }

        debug!(page_id, "deleted page");
        true
    }

    pub fn fetch_page_basic(&self, page_id: PageId) -> Option<BasicPageGuard<'_>> {
        self.fetch_page(page_id)
            .map(|frame| BasicPageGuard::new(self, frame))
    }

    pub fn fetch_page_read(&self, page_id: PageId) -> Option<ReadPageGuard<'_>> {
        self.fetch_page_basic(page_id)
            .map(BasicPageGuard::upgrade_read)
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> Option<WritePageGuard<'_>> {
        self.fetch_page_basic(page_id)
            .map(BasicPageGuard::upgrade_write)
    }

    pub fn new_page_guarded(&self) -> Option<(PageId, BasicPageGuard<'_>)> {
        self.new_page()
            .map(|(page_id, frame)| (page_id, BasicPageGuard::new(self, frame)))
    }
}
