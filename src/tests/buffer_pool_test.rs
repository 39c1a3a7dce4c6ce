#[cfg(test)]
pub mod test {
    use std::{sync::Arc, thread, time::Duration};

    use crate::{
        buffer::buffer_pool_manager::BufferPoolManager,
        config::BufferPoolOptions,
        storage::{
            disk::manager::FileDiskManager,
            page::page::{page_constants::PAGE_SIZE, PageId},
        },
        tests::{memory_pool, FaultyDiskManager},
    };

    fn write_bytes(bpm: &BufferPoolManager, page_id: PageId, bytes: &[u8]) {
        let frame = bpm.fetch_page(page_id).unwrap();
        frame.write_data()[..bytes.len()].copy_from_slice(bytes);
        assert!(bpm.unpin_page(page_id, true));
    }

    #[test]
    fn sample_test() {
        let (bpm, _store) = memory_pool(10, 5);

        let (page_zero, frame) = bpm.new_page().unwrap();
        assert_eq!(page_zero, 0);
        frame.write_data()[..5].copy_from_slice(b"Hello");

        // Fill up the pool.
        for _ in 1..10 {
            assert!(bpm.new_page().is_some());
        }

        // Every frame is pinned, no new page fits.
        for _ in 10..20 {
            assert!(bpm.new_page().is_none());
        }

        // Unpinning {0, 1, 2, 3, 4} and pinning four new pages leaves one
        // frame for reading page 0 back.
        for page_id in 0..5 {
            assert!(bpm.unpin_page(page_id, true));
        }
        for _ in 0..4 {
            assert!(bpm.new_page().is_some());
        }

        let frame = bpm.fetch_page(page_zero).unwrap();
        assert_eq!(&frame.read_data()[..5], b"Hello");

        // With page 0 unpinned and another page allocated, every frame is
        // pinned again and page 0 cannot come back.
        assert!(bpm.unpin_page(page_zero, true));
        assert!(bpm.new_page().is_some());
        assert!(bpm.fetch_page(page_zero).is_none());
    }

    #[test]
    fn binary_data_survives_eviction() {
        let (bpm, store) = memory_pool(3, 2);

        // Zero bytes in the middle must not truncate anything
        let mut pattern = vec![0u8; PAGE_SIZE];
        for (idx, byte) in pattern.iter_mut().enumerate() {
            *byte = if idx % 7 == 0 { 0 } else { (idx % 251) as u8 };
        }

        let (page_id, frame) = bpm.new_page().unwrap();
        frame.write_data().copy_from_slice(&pattern);
        assert!(bpm.unpin_page(page_id, true));

        // Cycle enough pages through the pool to evict the first one
        for _ in 0..6 {
            let (other, _) = bpm.new_page().unwrap();
            assert!(bpm.unpin_page(other, false));
        }
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert_eq!(store.page(page_id).unwrap().as_ref(), pattern.as_slice());

        let frame = bpm.fetch_page(page_id).unwrap();
        assert_eq!(frame.read_data().as_ref(), pattern.as_slice());
        assert!(!frame.is_dirty());
        assert!(bpm.unpin_page(page_id, false));
    }

    #[test]
    fn unpin_rules() {
        let (bpm, _store) = memory_pool(2, 2);
        let (page_id, _) = bpm.new_page().unwrap();

        assert!(bpm.fetch_page(page_id).is_some());
        assert_eq!(bpm.get_pin_count(page_id), Some(2));

        assert!(bpm.unpin_page(page_id, false));
        assert!(bpm.unpin_page(page_id, false));
        assert_eq!(bpm.get_pin_count(page_id), Some(0));

        // No double unpin, no unpin of a page that is not resident
        assert!(!bpm.unpin_page(page_id, false));
        assert!(!bpm.unpin_page(42, false));
    }

    #[test]
    fn unpin_never_clears_dirty() {
        let (bpm, store) = memory_pool(1, 2);
        let (page_id, frame) = bpm.new_page().unwrap();
        frame.write_data()[0] = 9;
        assert!(bpm.fetch_page(page_id).is_some());

        assert!(bpm.unpin_page(page_id, true));
        assert!(bpm.unpin_page(page_id, false));
        assert!(frame.is_dirty());

        // Evicting the page must write it back
        let (other, _) = bpm.new_page().unwrap();
        assert_ne!(other, page_id);
        assert_eq!(store.page(page_id).unwrap()[0], 9);
    }

    #[test]
    fn clean_victims_are_not_written() {
        let (bpm, store) = memory_pool(1, 2);
        let (page_id, _) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(page_id, false));

        let (other, _) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(other, false));
        assert!(!store.contains(page_id));

        // A page never written reads back as zeros
        let frame = bpm.fetch_page(page_id).unwrap();
        assert!(frame.read_data().iter().all(|b| *b == 0));
    }

    #[test]
    fn exhaustion_does_not_consume_page_ids() {
        let (bpm, _store) = memory_pool(2, 2);
        let (first, _) = bpm.new_page().unwrap();
        let (second, _) = bpm.new_page().unwrap();
        assert_eq!((first, second), (0, 1));

        assert!(bpm.new_page().is_none());
        assert!(bpm.new_page().is_none());

        assert!(bpm.unpin_page(first, false));
        let (third, _) = bpm.new_page().unwrap();
        assert_eq!(third, 2);
    }

    #[test]
    fn eviction_follows_lru_k() {
        let (bpm, _store) = memory_pool(3, 2);

        let ids: Vec<PageId> = (0..3).map(|_| bpm.new_page().unwrap().0).collect();
        for page_id in &ids {
            assert!(bpm.unpin_page(*page_id, false));
        }

        // Pages 0 and 2 get a second access, page 1 keeps an infinite
        // backward distance and is the victim.
        for page_id in [ids[0], ids[2]] {
            assert!(bpm.fetch_page(page_id).is_some());
            assert!(bpm.unpin_page(page_id, false));
        }

        let (fresh, _) = bpm.new_page().unwrap();
        assert_eq!(bpm.get_pin_count(ids[1]), None);
        assert_eq!(bpm.get_pin_count(ids[0]), Some(0));
        assert_eq!(bpm.get_pin_count(ids[2]), Some(0));
        assert!(bpm.unpin_page(fresh, false));
    }

    #[test]
    fn flush_writes_regardless_of_dirty_flag() {
        let (bpm, store) = memory_pool(4, 2);
        let (page_id, frame) = bpm.new_page().unwrap();
        frame.write_data()[..3].copy_from_slice(&[1, 2, 3]);

        // Still pinned and never marked dirty
        assert!(bpm.flush_page(page_id));
        assert_eq!(&store.page(page_id).unwrap()[..3], &[1, 2, 3]);
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert!(!frame.is_dirty());

        assert!(!bpm.flush_page(1234));
    }

    #[test]
    fn flush_all_pages_persists_every_resident_page() {
        let (bpm, store) = memory_pool(4, 2);
        for byte in 0..4u8 {
            let (page_id, frame) = bpm.new_page().unwrap();
            frame.write_data()[0] = byte + 1;
            assert!(bpm.unpin_page(page_id, true));
        }

        assert!(bpm.flush_all_pages());
        for page_id in 0..4 {
            assert_eq!(store.page(page_id).unwrap()[0], page_id as u8 + 1);
        }
    }

    #[test]
    fn failed_flush_keeps_page_dirty() {
        let disk = FaultyDiskManager::new();
        let bpm = BufferPoolManager::new(BufferPoolOptions::new(2), Box::new(disk.clone())).unwrap();

        let (page_id, frame) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(page_id, true));

        disk.fail_writes(true);
        assert!(!bpm.flush_page(page_id));
        assert!(frame.is_dirty());
        assert_eq!(bpm.get_pin_count(page_id), Some(0));

        disk.fail_writes(false);
        assert!(bpm.flush_page(page_id));
        assert!(!frame.is_dirty());
    }

    #[test]
    fn delete_page_frees_the_frame() {
        let (bpm, store) = memory_pool(2, 2);
        let (page_id, _) = bpm.new_page().unwrap();
        write_bytes(&bpm, page_id, b"gone");
        assert!(bpm.flush_page(page_id));
        assert!(store.contains(page_id));

        assert!(bpm.fetch_page(page_id).is_some());
        assert!(!bpm.delete_page(page_id));
        assert!(bpm.unpin_page(page_id, false));
        assert!(bpm.unpin_page(page_id, false));

        assert_eq!(bpm.free_frame_count(), 1);
        assert!(bpm.delete_page(page_id));
        assert_eq!(bpm.free_frame_count(), 2);
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert!(!store.contains(page_id));

        // Not resident at all
        assert!(bpm.delete_page(77));
    }

    #[test]
    fn failed_read_returns_the_frame() {
        let disk = FaultyDiskManager::new();
        let bpm = BufferPoolManager::new(BufferPoolOptions::new(1), Box::new(disk.clone())).unwrap();

        let (first, _) = bpm.new_page().unwrap();
        write_bytes(&bpm, first, &[4, 4]);
        assert!(bpm.unpin_page(first, false));
        let (second, _) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(second, false));

        disk.fail_reads(true);
        assert!(bpm.fetch_page(first).is_none());
        assert_eq!(bpm.get_pin_count(first), None);
        assert_eq!(bpm.free_frame_count(), 1);

        disk.fail_reads(false);
        let frame = bpm.fetch_page(first).unwrap();
        assert_eq!(&frame.read_data()[..2], &[4, 4]);
    }

    #[test]
    fn concurrent_fetch_fails_with_the_read_it_waited_on() {
        let disk = FaultyDiskManager::new();
        let bpm = Arc::new(
            BufferPoolManager::new(BufferPoolOptions::new(1), Box::new(disk.clone())).unwrap(),
        );

        let (page_id, frame) = bpm.new_page().unwrap();
        frame.write_data().fill(0xAB);
        assert!(bpm.unpin_page(page_id, true));
        let (other, _) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(other, false));
        assert_eq!(disk.store().page(page_id).unwrap()[0], 0xAB);

        disk.delay_reads(Duration::from_millis(200));
        disk.fail_reads(true);

        let loader = {
            let bpm = Arc::clone(&bpm);
            thread::spawn(move || bpm.fetch_page(page_id).is_some())
        };
        thread::sleep(Duration::from_millis(50));
        let waiter = {
            let bpm = Arc::clone(&bpm);
            thread::spawn(move || {
                bpm.fetch_page_read(page_id).map(|guard| {
                    let first = guard.data()[0];
                    thread::sleep(Duration::from_millis(200));
                    first
                })
            })
        };

        assert!(!loader.join().unwrap());
        assert_eq!(waiter.join().unwrap(), None);
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert_eq!(bpm.free_frame_count(), 1);

        // Nothing resident under the page id, so nothing overwrites it
        assert!(bpm.flush_all_pages());
        assert_eq!(disk.store().page(page_id).unwrap()[0], 0xAB);

        disk.delay_reads(Duration::ZERO);
        disk.fail_reads(false);
        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert!(guard.data().iter().all(|b| *b == 0xAB));
    }

    #[test]
    fn failed_write_back_keeps_the_victim_resident() {
        let disk = FaultyDiskManager::new();
        let bpm = BufferPoolManager::new(BufferPoolOptions::new(1), Box::new(disk.clone())).unwrap();

        let (page_id, frame) = bpm.new_page().unwrap();
        frame.write_data()[..3].copy_from_slice(&[7, 8, 9]);
        assert!(bpm.unpin_page(page_id, true));

        disk.fail_writes(true);
        assert!(bpm.new_page().is_none());
        assert!(bpm.fetch_page(page_id + 1).is_none());
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        assert!(frame.is_dirty());
        assert!(!disk.store().contains(page_id));

        // Still served from memory
        let hit = bpm.fetch_page(page_id).unwrap();
        assert_eq!(&hit.read_data()[..3], &[7, 8, 9]);
        assert!(bpm.unpin_page(page_id, false));

        disk.fail_writes(false);
        let (other, _) = bpm.new_page().unwrap();
        assert_eq!(other, page_id + 1);
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert_eq!(&disk.store().page(page_id).unwrap()[..3], &[7, 8, 9]);
    }

    #[test]
    fn file_backed_pool_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");

        let page_ids: Vec<PageId> = {
            let manager = FileDiskManager::new(&path).unwrap();
            let bpm = BufferPoolManager::new(BufferPoolOptions::new(3), Box::new(manager)).unwrap();

            let ids: Vec<PageId> = (0..8u8)
                .map(|byte| {
                    let (page_id, frame) = bpm.new_page().unwrap();
                    frame.write_data().fill(byte);
                    assert!(bpm.unpin_page(page_id, true));
                    page_id
                })
                .collect();
            assert!(bpm.flush_all_pages());
            ids
        };

        let manager = FileDiskManager::new(&path).unwrap();
        let bpm = BufferPoolManager::new(BufferPoolOptions::new(2), Box::new(manager))
            .unwrap()
            .with_next_page_id(page_ids.len() as PageId);

        for (byte, page_id) in page_ids.iter().enumerate() {
            let frame = bpm.fetch_page(*page_id).unwrap();
            assert!(frame.read_data().iter().all(|b| *b == byte as u8));
            assert!(bpm.unpin_page(*page_id, false));
        }

        let (next, _) = bpm.new_page().unwrap();
        assert_eq!(next, 8);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let disk = FaultyDiskManager::new();
        assert!(BufferPoolManager::new(BufferPoolOptions::new(0), Box::new(disk)).is_err());
    }
}
