use std::collections::VecDeque;

use hashlink::LinkedHashMap;

use crate::storage::page::page::FrameId;

/// Eviction policy consulted by the buffer pool on every pin/unpin transition.
/// All calls happen under the pool's bookkeeping lock.
pub trait Replacer {
    fn evict(&mut self) -> Option<FrameId>;
    fn record_access(&mut self, frame_id: FrameId);
    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool);
    fn remove(&mut self, frame_id: FrameId);
    fn size(&self) -> usize;
}

#[derive(Debug)]
struct LRUKNode {
    // Last k access timestamps, oldest at the front
    history: VecDeque<usize>,
    is_evictable: bool,
}

impl LRUKNode {
    fn new(k: usize) -> Self {
        LRUKNode {
            history: VecDeque::with_capacity(k),
            is_evictable: false,
        }
    }

    fn push_timestamp(&mut self, timestamp: usize, k: usize) {
        if self.history.len() == k {
            self.history.pop_front();
        }
        self.history.push_back(timestamp);
    }

    // For a node with k accesses this is the k-th most recent one
    fn earliest_timestamp(&self) -> usize {
        *self
            .history
            .front()
            .expect("tracked frame without access history")
    }
}

/// LRU-K replacement.
///
/// A frame with fewer than `k` recorded accesses has an infinite backward
/// k-distance and is always chosen before any frame with a full history.
/// Within either class the frame whose earliest retained access is oldest
/// goes first, which for full histories is the largest backward k-distance.
pub struct LRUKReplacer {
    node_store: LinkedHashMap<FrameId, LRUKNode>,
    current_timestamp: usize,
    evictable_size: usize,
    replacer_size: usize,
    k: usize,
}

impl LRUKReplacer {
    pub fn new(number_of_frames: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K replacer needs k >= 1");

        LRUKReplacer {
            node_store: LinkedHashMap::with_capacity(number_of_frames),
            current_timestamp: 0,
            evictable_size: 0,
            replacer_size: number_of_frames,
            k,
        }
    }

    /// Whether the frame currently has a history entry.
    pub fn is_tracked(&self, frame_id: FrameId) -> bool {
        self.node_store.contains_key(&frame_id)
    }

    fn check_frame_id(&self, frame_id: FrameId) {
        assert!(
            (frame_id as usize) < self.replacer_size,
            "frame id {} is out of range for a replacer of {} frames",
            frame_id,
            self.replacer_size
        );
    }
}

impl Replacer for LRUKReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        if self.evictable_size == 0 {
            return None;
        }

        let k = self.k;
        let victim = self
            .node_store
            .iter()
            .filter(|(_, node)| node.is_evictable)
            .min_by_key(|(_, node)| (node.history.len() >= k, node.earliest_timestamp()))
            .map(|(frame_id, _)| *frame_id)?;

        self.node_store.remove(&victim);
        self.evictable_size -= 1;
        Some(victim)
    }

    fn record_access(&mut self, frame_id: FrameId) {
        self.check_frame_id(frame_id);

        let timestamp = self.current_timestamp;
        let k = self.k;
        self.node_store
            .entry(frame_id)
            .or_insert_with(|| LRUKNode::new(k))
            .push_timestamp(timestamp, k);

        self.current_timestamp += 1;
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        self.check_frame_id(frame_id);

        // Untracked frames stay implicitly non-evictable
        if let Some(node) = self.node_store.get_mut(&frame_id) {
            if node.is_evictable != evictable {
                match evictable {
                    true => self.evictable_size += 1,
                    false => self.evictable_size -= 1,
                }
                node.is_evictable = evictable;
            }
        }
    }

    fn remove(&mut self, frame_id: FrameId) {
        self.check_frame_id(frame_id);

        let Some(node) = self.node_store.get(&frame_id) else {
            return;
        };
        assert!(
            node.is_evictable,
            "cannot remove non-evictable frame {} from the replacer",
            frame_id
        );

        self.node_store.remove(&frame_id);
        self.evictable_size -= 1;
    }

    fn size(&self) -> usize {
        self.evictable_size
    }
}
