use std::{marker::PhantomData, sync::Arc};

use anyhow::{ensure, Context};
use tracing::{debug, warn};

use crate::{
    buffer::buffer_pool_manager::BufferPoolManager,
    config::HashTableOptions,
    error::{ConfigError, HashTableError},
    index::{
        codec::{KeyComparator, OrdComparator, Storable},
        hash_function::{Crc32Hasher, HashFunction},
    },
    storage::page::{
        hash_table_bucket_page::HashTableBucketPage,
        hash_table_directory_page::HashTableDirectoryPage,
        hash_table_header_page::HashTableHeaderPage,
        page::{PageId, INVALID_PAGE_ID},
        page_guard::WritePageGuard,
    },
};

/// Extendible hash index whose header, directory and bucket nodes all live
/// in buffer pool pages.
///
/// The top `header_max_depth` bits of a key's hash pick a directory, the low
/// `global_depth` bits of the same hash pick a bucket slot in it. Keys are
/// unique. Lookups crab down with shared latches, writers hold the
/// directory's exclusive latch for the whole operation.
pub struct DiskExtendibleHashTable<K, V, C = OrdComparator, H = Crc32Hasher> {
    bpm: Arc<BufferPoolManager>,
    cmp: C,
    hash_fn: H,
    header_page_id: PageId,
    options: HashTableOptions,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C, H> DiskExtendibleHashTable<K, V, C, H>
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
    H: HashFunction<K>,
{
    /// Creates an empty index with a freshly allocated header page.
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        cmp: C,
        hash_fn: H,
        options: HashTableOptions,
    ) -> Result<Self, HashTableError> {
        Self::validate(&options)?;

        let (header_page_id, header_guard) = bpm
            .new_page_guarded()
            .ok_or(HashTableError::OutOfFrames)?;
        let mut header_guard = header_guard.upgrade_write();
        HashTableHeaderPage::new(header_guard.data_mut()).init(options.header_max_depth);
        drop(header_guard);

        debug!(
            header_page_id,
            header_max_depth = options.header_max_depth,
            directory_max_depth = options.directory_max_depth,
            bucket_max_size = options.bucket_max_size,
            "created hash index"
        );

        Ok(Self {
            bpm,
            cmp,
            hash_fn,
            header_page_id,
            options,
            _marker: PhantomData,
        })
    }

    /// Attaches to an index created earlier over the same disk store. The
    /// header depth stored on the page takes precedence over `options`.
    pub fn open(
        bpm: Arc<BufferPoolManager>,
        header_page_id: PageId,
        cmp: C,
        hash_fn: H,
        options: HashTableOptions,
    ) -> Result<Self, HashTableError> {
        Self::validate(&options)?;

        let header_guard = bpm
            .fetch_page_read(header_page_id)
            .ok_or(HashTableError::OutOfFrames)?;
        let header_max_depth = HashTableHeaderPage::new(header_guard.data()).max_depth();
        drop(header_guard);

        Ok(Self {
            bpm,
            cmp,
            hash_fn,
            header_page_id,
            options: options.with_header_max_depth(header_max_depth),
            _marker: PhantomData,
        })
    }

    fn validate(options: &HashTableOptions) -> Result<(), HashTableError> {
        options.validate()?;

        let capacity = HashTableBucketPage::<&[u8], K, V>::capacity();
        if options.bucket_max_size > capacity {
            return Err(ConfigError::TooLarge {
                field: "bucket_max_size",
                value: options.bucket_max_size,
                limit: capacity,
            }
            .into());
        }
        Ok(())
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    pub fn options(&self) -> HashTableOptions {
        self.options
    }

    fn hash(&self, key: &K) -> u32 {
        self.hash_fn.hash(key)
    }

    /// Values stored under `key`. Empty when the key is absent or a page on
    /// the path could not be brought into the pool.
    pub fn get_value(&self, key: &K) -> Vec<V> {
        let hash = self.hash(key);

        let Some(header_guard) = self.bpm.fetch_page_read(self.header_page_id) else {
            warn!(page_id = self.header_page_id, "lookup could not fetch header page");
            return Vec::new();
        };
        let header = HashTableHeaderPage::new(header_guard.data());
        let directory_page_id =
            header.get_directory_page_id(header.hash_to_directory_index(hash));
        if directory_page_id == INVALID_PAGE_ID {
            return Vec::new();
        }

        let Some(directory_guard) = self.bpm.fetch_page_read(directory_page_id) else {
            warn!(page_id = directory_page_id, "lookup could not fetch directory page");
            return Vec::new();
        };
        drop(header_guard);

        let directory = HashTableDirectoryPage::new(directory_guard.data());
        let bucket_page_id = directory.get_bucket_page_id(directory.hash_to_bucket_index(hash));

        let Some(bucket_guard) = self.bpm.fetch_page_read(bucket_page_id) else {
            warn!(page_id = bucket_page_id, "lookup could not fetch bucket page");
            return Vec::new();
        };
        drop(directory_guard);

        let bucket = HashTableBucketPage::<_, K, V>::new(bucket_guard.data());
        bucket.lookup(key, &self.cmp).into_iter().collect()
    }

    /// Inserts a unique key, splitting buckets and growing the directory as
    /// needed. Returns `false` on any failure, see [`Self::try_insert`].
    pub fn insert(&self, key: &K, value: &V) -> bool {
        match self.try_insert(key, value) {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "insert rejected");
                false
            }
        }
    }

    pub fn try_insert(&self, key: &K, value: &V) -> Result<(), HashTableError> {
        let hash = self.hash(key);

        let mut header_guard = self
            .bpm
            .fetch_page_write(self.header_page_id)
            .ok_or(HashTableError::OutOfFrames)?;
        let header = HashTableHeaderPage::new(header_guard.data());
        let directory_idx = header.hash_to_directory_index(hash);
        let directory_page_id = header.get_directory_page_id(directory_idx);

        let directory_guard = if directory_page_id == INVALID_PAGE_ID {
            self.create_directory(&mut header_guard, directory_idx)?
        } else {
            self.bpm
                .fetch_page_write(directory_page_id)
                .ok_or(HashTableError::OutOfFrames)?
        };
        drop(header_guard);

        self.insert_into_directory(directory_guard, hash, key, value)
    }

    // Allocates a directory with a single empty bucket and hooks it into the
    // header. Nothing is linked unless both pages were allocated.
    fn create_directory<'a>(
        &'a self,
        header_guard: &mut WritePageGuard<'a>,
        directory_idx: u32,
    ) -> Result<WritePageGuard<'a>, HashTableError> {
        let (directory_page_id, directory_guard) = self
            .bpm
            .new_page_guarded()
            .ok_or(HashTableError::OutOfFrames)?;
        let mut directory_guard = directory_guard.upgrade_write();

        let Some((bucket_page_id, bucket_guard)) = self.bpm.new_page_guarded() else {
            drop(directory_guard);
            self.bpm.delete_page(directory_page_id);
            return Err(HashTableError::OutOfFrames);
        };
        let mut bucket_guard = bucket_guard.upgrade_write();
        HashTableBucketPage::<_, K, V>::new(bucket_guard.data_mut())
            .init(self.options.bucket_max_size);
        drop(bucket_guard);

        let mut directory = HashTableDirectoryPage::new(directory_guard.data_mut());
        directory.init(self.options.directory_max_depth);
        directory.set_bucket_page_id(0, bucket_page_id);
        directory.set_local_depth(0, 0);

        HashTableHeaderPage::new(header_guard.data_mut())
            .set_directory_page_id(directory_idx, directory_page_id);

        debug!(
            directory_idx,
            directory_page_id, bucket_page_id, "created directory"
        );
        Ok(directory_guard)
    }

    fn insert_into_directory(
        &self,
        mut directory_guard: WritePageGuard<'_>,
        hash: u32,
        key: &K,
        value: &V,
    ) -> Result<(), HashTableError> {
        loop {
            let directory = HashTableDirectoryPage::new(directory_guard.data());
            let bucket_idx = directory.hash_to_bucket_index(hash);
            let bucket_page_id = directory.get_bucket_page_id(bucket_idx);
            let local_depth = directory.get_local_depth(bucket_idx);
            let global_depth = directory.global_depth();
            let max_depth = directory.max_depth();

            let mut bucket_guard = self
                .bpm
                .fetch_page_write(bucket_page_id)
                .ok_or(HashTableError::OutOfFrames)?;

            let bucket = HashTableBucketPage::<_, K, V>::new(bucket_guard.data());
            if bucket.lookup(key, &self.cmp).is_some() {
                return Err(HashTableError::DuplicateKey);
            }
            if !bucket.is_full() {
                HashTableBucketPage::<_, K, V>::new(bucket_guard.data_mut())
                    .insert(key, value, &self.cmp);
                return Ok(());
            }

            // Every check that can fail runs before the directory is touched
            if local_depth == global_depth && global_depth >= max_depth {
                return Err(HashTableError::DirectoryFull { max_depth });
            }
            let (split_page_id, split_guard) = self
                .bpm
                .new_page_guarded()
                .ok_or(HashTableError::OutOfFrames)?;
            let mut split_guard = split_guard.upgrade_write();

            self.split_bucket(
                &mut directory_guard,
                &mut bucket_guard,
                &mut split_guard,
                bucket_idx,
                local_depth,
            );
            debug!(
                bucket_idx,
                bucket_page_id,
                split_page_id,
                local_depth = local_depth + 1,
                "split bucket"
            );
        }
    }

    // Splits the full bucket at `bucket_idx` into itself and `split_guard`'s
    // page. Slots agreeing with `bucket_idx` on the low `local_depth` bits now
    // have depth `local_depth + 1`; those with bit `local_depth` set move to
    // the new page together with the entries whose hash has that bit set.
    fn split_bucket(
        &self,
        directory_guard: &mut WritePageGuard<'_>,
        bucket_guard: &mut WritePageGuard<'_>,
        split_guard: &mut WritePageGuard<'_>,
        bucket_idx: u32,
        local_depth: u32,
    ) {
        let split_page_id = split_guard.page_id();
        let mut directory = HashTableDirectoryPage::new(directory_guard.data_mut());

        if local_depth == directory.global_depth() {
            directory.incr_global_depth();
            debug!(
                global_depth = directory.global_depth(),
                "grew directory"
            );
        }

        let high_bit = 1u32 << local_depth;
        let low_mask = high_bit - 1;
        let base = bucket_idx & low_mask;
        for idx in 0..directory.size() {
            if idx & low_mask == base {
                directory.incr_local_depth(idx);
                if idx & high_bit != 0 {
                    directory.set_bucket_page_id(idx, split_page_id);
                }
            }
        }

        let mut bucket = HashTableBucketPage::<_, K, V>::new(bucket_guard.data_mut());
        let mut split = HashTableBucketPage::<_, K, V>::new(split_guard.data_mut());
        split.init(self.options.bucket_max_size);

        let entries = bucket.entries();
        bucket.clear();
        for (key, value) in &entries {
            let target = if self.hash(key) & high_bit != 0 {
                &mut split
            } else {
                &mut bucket
            };
            target.insert(key, value, &self.cmp);
        }
    }

    /// Removes `key`, merging emptied buckets and shrinking the directory.
    /// Returns `false` if the key was not present.
    pub fn remove(&self, key: &K) -> bool {
        match self.try_remove(key) {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "remove rejected");
                false
            }
        }
    }

    pub fn try_remove(&self, key: &K) -> Result<(), HashTableError> {
        let hash = self.hash(key);

        let header_guard = self
            .bpm
            .fetch_page_read(self.header_page_id)
            .ok_or(HashTableError::OutOfFrames)?;
        let header = HashTableHeaderPage::new(header_guard.data());
        let directory_page_id =
            header.get_directory_page_id(header.hash_to_directory_index(hash));
        if directory_page_id == INVALID_PAGE_ID {
            return Err(HashTableError::KeyNotFound);
        }

        let mut directory_guard = self
            .bpm
            .fetch_page_write(directory_page_id)
            .ok_or(HashTableError::OutOfFrames)?;
        drop(header_guard);

        let directory = HashTableDirectoryPage::new(directory_guard.data());
        let bucket_idx = directory.hash_to_bucket_index(hash);
        let bucket_page_id = directory.get_bucket_page_id(bucket_idx);

        let mut bucket_guard = self
            .bpm
            .fetch_page_write(bucket_page_id)
            .ok_or(HashTableError::OutOfFrames)?;
        if HashTableBucketPage::<_, K, V>::new(bucket_guard.data())
            .lookup(key, &self.cmp)
            .is_none()
        {
            return Err(HashTableError::KeyNotFound);
        }
        HashTableBucketPage::<_, K, V>::new(bucket_guard.data_mut()).remove(key, &self.cmp);

        self.merge_buckets(&mut directory_guard, bucket_guard, bucket_idx);
        self.shrink_directory(&mut directory_guard);
        Ok(())
    }

    // Folds empty buckets into their split images for as long as the pair
    // shares a local depth, continuing from the surviving bucket.
    fn merge_buckets<'a>(
        &'a self,
        directory_guard: &mut WritePageGuard<'a>,
        mut bucket_guard: WritePageGuard<'a>,
        mut bucket_idx: u32,
    ) {
        loop {
            let directory = HashTableDirectoryPage::new(directory_guard.data());
            let local_depth = directory.get_local_depth(bucket_idx);
            if local_depth == 0 {
                break;
            }
            let image_idx = directory.get_split_image_index(bucket_idx);
            if directory.get_local_depth(image_idx) != local_depth {
                break;
            }
            let image_page_id = directory.get_bucket_page_id(image_idx);

            let bucket_empty = HashTableBucketPage::<_, K, V>::new(bucket_guard.data()).is_empty();
            let Some(image_guard) = self.bpm.fetch_page_write(image_page_id) else {
                warn!(page_id = image_page_id, "merge could not fetch split image");
                break;
            };
            let image_empty = HashTableBucketPage::<_, K, V>::new(image_guard.data()).is_empty();

            let (survivor_idx, survivor, emptied) = match (bucket_empty, image_empty) {
                (true, _) => (image_idx, image_guard, bucket_guard),
                (false, true) => (bucket_idx, bucket_guard, image_guard),
                (false, false) => break,
            };
            let survivor_page_id = survivor.page_id();
            let emptied_page_id = emptied.page_id();

            let mut directory = HashTableDirectoryPage::new(directory_guard.data_mut());
            for idx in 0..directory.size() {
                let page_id = directory.get_bucket_page_id(idx);
                if page_id == survivor_page_id || page_id == emptied_page_id {
                    directory.set_bucket_page_id(idx, survivor_page_id);
                    directory.decr_local_depth(idx);
                }
            }

            drop(emptied);
            if !self.bpm.delete_page(emptied_page_id) {
                warn!(
                    page_id = emptied_page_id,
                    "merged bucket is still pinned, page left allocated"
                );
            }
            debug!(
                survivor_page_id,
                emptied_page_id,
                local_depth = local_depth - 1,
                "merged buckets"
            );

            bucket_idx = survivor_idx;
            bucket_guard = survivor;
        }
    }

    fn shrink_directory(&self, directory_guard: &mut WritePageGuard<'_>) {
        if !HashTableDirectoryPage::new(directory_guard.data()).can_shrink() {
            return;
        }

        let mut directory = HashTableDirectoryPage::new(directory_guard.data_mut());
        while directory.can_shrink() {
            directory.decr_global_depth();
        }
        debug!(
            global_depth = directory.global_depth(),
            "shrank directory"
        );
    }

    /// Walks every directory and bucket reachable from the header and checks
    /// the structural invariants, including that every key sits in the
    /// bucket its hash selects.
    pub fn verify_integrity(&self) -> anyhow::Result<()> {
        let header_guard = self
            .bpm
            .fetch_page_read(self.header_page_id)
            .context("could not fetch header page")?;
        let header = HashTableHeaderPage::new(header_guard.data());

        for directory_idx in 0..header.max_size() {
            let directory_page_id = header.get_directory_page_id(directory_idx);
            if directory_page_id == INVALID_PAGE_ID {
                continue;
            }

            let directory_guard = self
                .bpm
                .fetch_page_read(directory_page_id)
                .with_context(|| format!("could not fetch directory page {}", directory_page_id))?;
            let directory = HashTableDirectoryPage::new(directory_guard.data());
            directory
                .verify_integrity()
                .with_context(|| format!("directory page {}", directory_page_id))?;

            for bucket_idx in 0..directory.size() {
                // Visit each bucket once, from its lowest slot
                let mask = directory.local_depth_mask(bucket_idx);
                if bucket_idx > mask {
                    continue;
                }

                let bucket_page_id = directory.get_bucket_page_id(bucket_idx);
                let bucket_guard = self
                    .bpm
                    .fetch_page_read(bucket_page_id)
                    .with_context(|| format!("could not fetch bucket page {}", bucket_page_id))?;
                let bucket = HashTableBucketPage::<_, K, V>::new(bucket_guard.data());

                ensure!(
                    bucket.size() <= bucket.max_size(),
                    "bucket page {} holds {} entries, max is {}",
                    bucket_page_id,
                    bucket.size(),
                    bucket.max_size()
                );
                for (key, _) in bucket.entries() {
                    let hash = self.hash(&key);
                    ensure!(
                        hash & mask == bucket_idx,
                        "key with hash {:#x} stored in bucket page {} at slot {}",
                        hash,
                        bucket_page_id,
                        bucket_idx
                    );
                    ensure!(
                        header.hash_to_directory_index(hash) == directory_idx,
                        "key with hash {:#x} stored under directory {}",
                        hash,
                        directory_idx
                    );
                }
            }
        }

        Ok(())
    }

    /// Logs the shape of the index at debug level.
    pub fn debug_dump(&self) {
        let Some(header_guard) = self.bpm.fetch_page_read(self.header_page_id) else {
            warn!("debug dump could not fetch header page");
            return;
        };
        let header = HashTableHeaderPage::new(header_guard.data());
        debug!(
            header_page_id = self.header_page_id,
            max_depth = header.max_depth(),
            "header"
        );

        for directory_idx in 0..header.max_size() {
            let directory_page_id = header.get_directory_page_id(directory_idx);
            if directory_page_id == INVALID_PAGE_ID {
                continue;
            }
            let Some(directory_guard) = self.bpm.fetch_page_read(directory_page_id) else {
                warn!(page_id = directory_page_id, "debug dump could not fetch directory");
                continue;
            };
            let directory = HashTableDirectoryPage::new(directory_guard.data());
            debug!(
                directory_idx,
                directory_page_id,
                global_depth = directory.global_depth(),
                "directory"
            );

            for bucket_idx in 0..directory.size() {
                let bucket_page_id = directory.get_bucket_page_id(bucket_idx);
                let size = self
                    .bpm
                    .fetch_page_read(bucket_page_id)
                    .map(|guard| {
                        let bucket = HashTableBucketPage::<_, K, V>::new(guard.data());
                        bucket.size()
                    });
                debug!(
                    bucket_idx,
                    bucket_page_id,
                    local_depth = directory.get_local_depth(bucket_idx),
                    size = ?size,
                    "bucket"
                );
            }
        }
    }
}
