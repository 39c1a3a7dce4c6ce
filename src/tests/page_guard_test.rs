#[cfg(test)]
pub mod test {
    use crate::tests::memory_pool;

    #[test]
    fn basic_guard_unpins_on_drop() {
        let (bpm, _store) = memory_pool(5, 2);

        let (page_id, guard) = bpm.new_page_guarded().unwrap();
        assert_eq!(guard.page_id(), page_id);
        assert_eq!(bpm.get_pin_count(page_id), Some(1));

        drop(guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn moved_guard_unpins_once() {
        let (bpm, _store) = memory_pool(5, 2);
        let (page_id, guard) = bpm.new_page_guarded().unwrap();

        let moved = guard;
        assert_eq!(bpm.get_pin_count(page_id), Some(1));

        let mut guards = vec![moved];
        assert_eq!(bpm.get_pin_count(page_id), Some(1));

        guards.clear();
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn release_is_idempotent() {
        let (bpm, _store) = memory_pool(5, 2);
        let (page_id, _) = bpm.new_page().unwrap();
        assert!(bpm.fetch_page(page_id).is_some());
        assert_eq!(bpm.get_pin_count(page_id), Some(2));

        let mut guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(3));

        guard.release();
        guard.release();
        assert!(guard.is_released());
        assert_eq!(bpm.get_pin_count(page_id), Some(2));

        drop(guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(2));
    }

    #[test]
    fn upgrade_keeps_the_pin() {
        let (bpm, _store) = memory_pool(5, 2);
        let (page_id, basic) = bpm.new_page_guarded().unwrap();

        let mut write = basic.upgrade_write();
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        write.data_mut()[..4].copy_from_slice(b"rust");
        drop(write);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));

        let basic = bpm.fetch_page_basic(page_id).unwrap();
        let read = basic.upgrade_read();
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert_eq!(&read.data()[..4], b"rust");
    }

    #[test]
    fn read_guards_share_a_page() {
        let (bpm, _store) = memory_pool(5, 2);
        let (page_id, basic) = bpm.new_page_guarded().unwrap();
        drop(basic);

        let first = bpm.fetch_page_read(page_id).unwrap();
        let second = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(2));
        assert_eq!(first.data(), second.data());

        drop(first);
        drop(second);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn write_guard_marks_page_dirty() {
        let (bpm, store) = memory_pool(1, 2);
        let (page_id, basic) = bpm.new_page_guarded().unwrap();
        drop(basic);

        {
            let mut guard = bpm.fetch_page_write(page_id).unwrap();
            guard.data_mut()[0] = 42;
        }

        // Forcing the page out must write the change back
        let (_, other) = bpm.new_page_guarded().unwrap();
        drop(other);
        assert_eq!(store.page(page_id).unwrap()[0], 42);

        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn read_only_access_leaves_page_clean() {
        let (bpm, store) = memory_pool(1, 2);
        let (page_id, basic) = bpm.new_page_guarded().unwrap();
        drop(basic);

        {
            let guard = bpm.fetch_page_write(page_id).unwrap();
            assert_eq!(guard.data()[0], 0);
        }

        let (_, other) = bpm.new_page_guarded().unwrap();
        drop(other);
        assert!(!store.contains(page_id));
    }

    #[test]
    fn basic_guard_latches_per_access() {
        let (bpm, store) = memory_pool(1, 2);
        let (page_id, mut basic) = bpm.new_page_guarded().unwrap();

        basic.data_mut()[1] = 7;
        assert_eq!(basic.data()[1], 7);
        drop(basic);

        let (_, other) = bpm.new_page_guarded().unwrap();
        drop(other);
        assert_eq!(store.page(page_id).unwrap()[1], 7);
    }

    #[test]
    fn sequential_write_guards_do_not_deadlock() {
        let (bpm, _store) = memory_pool(2, 2);
        let (page_id, basic) = bpm.new_page_guarded().unwrap();
        drop(basic);

        for round in 0..10u8 {
            let mut guard = bpm.fetch_page_write(page_id).unwrap();
            guard.data_mut()[0] = round;
            guard.release();
        }

        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[0], 9);
    }

    #[test]
    fn guards_exhaust_the_pool() {
        let (bpm, _store) = memory_pool(2, 2);
        let (first, a) = bpm.new_page_guarded().unwrap();
        let (_, b) = bpm.new_page_guarded().unwrap();

        assert!(bpm.new_page_guarded().is_none());
        drop(a);
        drop(b);

        let (_, c) = bpm.new_page_guarded().unwrap();
        assert!(bpm.fetch_page_write(first).is_some());
        drop(c);
    }
}
