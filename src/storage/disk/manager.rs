use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{ensure, Context};
use dashmap::DashMap;
use tracing::trace;

use crate::storage::page::page::{page_constants::PAGE_SIZE, PageId, INVALID_PAGE_ID};

/// Block storage underneath the disk scheduler. Pages that were never
/// written read back as zeros.
pub trait DiskManager: Send {
    fn read_page(&mut self, page_id: PageId, page_data: &mut [u8]) -> anyhow::Result<()>;
    fn write_page(&mut self, page_id: PageId, page_data: &[u8]) -> anyhow::Result<()>;

    /// Tells the store a page id is no longer in use.
    fn deallocate_page(&mut self, page_id: PageId) -> anyhow::Result<()>;
}

fn check_request(page_id: PageId, len: usize) -> anyhow::Result<()> {
    ensure!(page_id != INVALID_PAGE_ID, "invalid page id");
    ensure!(
        len == PAGE_SIZE,
        "page buffer is {} bytes, expected {}",
        len,
        PAGE_SIZE
    );
    Ok(())
}

/// Keeps every page of the pool in one database file at `page_id * PAGE_SIZE`.
pub struct FileDiskManager {
    db_io: File,
    file_name: PathBuf,

    num_writes: u64,
    num_flushes: u64,
    num_deletes: u64,
}

impl FileDiskManager {
    pub fn new(file_name: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file_name = file_name.as_ref().to_path_buf();
        let db_io = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&file_name)
            .with_context(|| format!("failed to open db file {}", file_name.display()))?;

        Ok(FileDiskManager {
            db_io,
            file_name,
            num_writes: 0,
            num_flushes: 0,
            num_deletes: 0,
        })
    }

    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    pub fn num_writes(&self) -> u64 {
        self.num_writes
    }

    pub fn num_flushes(&self) -> u64 {
        self.num_flushes
    }

    pub fn num_deletes(&self) -> u64 {
        self.num_deletes
    }

    fn offset(page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&mut self, page_id: PageId, page_data: &mut [u8]) -> anyhow::Result<()> {
        check_request(page_id, page_data.len())?;

        let offset = Self::offset(page_id);
        let file_len = self
            .db_io
            .metadata()
            .context("failed to stat db file")?
            .len();

        // Reading past the end of the file yields a fresh page
        let available = file_len.saturating_sub(offset).min(PAGE_SIZE as u64) as usize;
        if available > 0 {
            self.db_io
                .seek(SeekFrom::Start(offset))
                .with_context(|| format!("I/O error while seeking page {}", page_id))?;
            self.db_io
                .read_exact(&mut page_data[..available])
                .with_context(|| format!("I/O error while reading page {}", page_id))?;
        }
        page_data[available..].fill(0);

        trace!(page_id, available, "read page");
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, page_data: &[u8]) -> anyhow::Result<()> {
        check_request(page_id, page_data.len())?;

        self.db_io
            .seek(SeekFrom::Start(Self::offset(page_id)))
            .with_context(|| format!("I/O error while seeking page {}", page_id))?;
        self.db_io
            .write_all(page_data)
            .with_context(|| format!("I/O error while writing page {}", page_id))?;
        self.num_writes += 1;

        self.db_io
            .flush()
            .with_context(|| format!("error flushing page {}", page_id))?;
        self.num_flushes += 1;

        trace!(page_id, "wrote page");
        Ok(())
    }

    fn deallocate_page(&mut self, page_id: PageId) -> anyhow::Result<()> {
        ensure!(page_id != INVALID_PAGE_ID, "invalid page id");
        // Page ids are never reused, so the slot in the file is simply abandoned
        self.num_deletes += 1;
        Ok(())
    }
}

/// Unbounded in-memory page store. Clones share the same pages, which lets a
/// test keep a handle after moving the manager into a buffer pool.
#[derive(Clone, Default)]
pub struct MemoryDiskManager {
    pages: Arc<DashMap<PageId, Box<[u8]>>>,
}

impl MemoryDiskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains_key(&page_id)
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// Copy of the stored bytes of a page, if it was ever written.
    pub fn page(&self, page_id: PageId) -> Option<Box<[u8]>> {
        self.pages.get(&page_id).map(|page| page.value().clone())
    }
}

impl DiskManager for MemoryDiskManager {
    fn read_page(&mut self, page_id: PageId, page_data: &mut [u8]) -> anyhow::Result<()> {
        check_request(page_id, page_data.len())?;

        match self.pages.get(&page_id) {
            Some(page) => page_data.copy_from_slice(page.value()),
            None => page_data.fill(0),
        }
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, page_data: &[u8]) -> anyhow::Result<()> {
        check_request(page_id, page_data.len())?;

        self.pages.insert(page_id, page_data.into());
        Ok(())
    }

    fn deallocate_page(&mut self, page_id: PageId) -> anyhow::Result<()> {
        self.pages.remove(&page_id);
        Ok(())
    }
}
