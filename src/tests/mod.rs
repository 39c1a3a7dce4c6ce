use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::bail;

use crate::{
    buffer::buffer_pool_manager::BufferPoolManager,
    config::BufferPoolOptions,
    storage::{
        disk::manager::{DiskManager, MemoryDiskManager},
        page::page::PageId,
    },
};

mod buffer_pool_test;
mod page_guard_test;

/// Pool over an in-memory store, returned together with a handle on the store.
pub fn memory_pool(pool_size: usize, replacer_k: usize) -> (Arc<BufferPoolManager>, MemoryDiskManager) {
    let store = MemoryDiskManager::new();
    let options = BufferPoolOptions::new(pool_size).with_replacer_k(replacer_k);
    let bpm = BufferPoolManager::new(options, Box::new(store.clone())).unwrap();
    (Arc::new(bpm), store)
}

/// In-memory store whose reads and writes can be made to fail, and whose
/// reads can be slowed down, on demand.
#[derive(Clone, Default)]
pub struct FaultyDiskManager {
    inner: MemoryDiskManager,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    read_delay_ms: Arc<AtomicU64>,
}

impl FaultyDiskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn delay_reads(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn store(&self) -> &MemoryDiskManager {
        &self.inner
    }
}

impl DiskManager for FaultyDiskManager {
    fn read_page(&mut self, page_id: PageId, page_data: &mut [u8]) -> anyhow::Result<()> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("injected read failure on page {}", page_id);
        }
        self.inner.read_page(page_id, page_data)
    }

    fn write_page(&mut self, page_id: PageId, page_data: &[u8]) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("injected write failure on page {}", page_id);
        }
        self.inner.write_page(page_id, page_data)
    }

    fn deallocate_page(&mut self, page_id: PageId) -> anyhow::Result<()> {
        self.inner.deallocate_page(page_id)
    }
}
