use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

use crate::common::types::FrameId;
use crate::storage::buffer::replacer::Replacer;

struct LruInner {
    /// Recency order, most recent at the front
    recency: VecDeque<FrameId>,
    evictable: HashSet<FrameId>,
}

/// Plain LRU replacement: evict the least recently accessed evictable frame.
pub struct LruReplacer {
    inner: Mutex<LruInner>,
}

impl LruReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                recency: VecDeque::with_capacity(num_frames),
                evictable: HashSet::with_capacity(num_frames),
            }),
        }
    }
}

impl Replacer for LruReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.recency.iter().position(|&id| id == frame_id) {
            inner.recency.remove(pos);
        }
        inner.recency.push_front(frame_id);
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        if !inner.recency.contains(&frame_id) {
            return;
        }
        if evictable {
            inner.evictable.insert(frame_id);
        } else {
            inner.evictable.remove(&frame_id);
        }
    }

    fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.recency.iter().position(|&id| id == frame_id) {
            inner.recency.remove(pos);
        }
        inner.evictable.remove(&frame_id);
    }

    fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let victim = inner
            .recency
            .iter()
            .rev()
            .copied()
            .find(|id| inner.evictable.contains(id))?;
        if let Some(pos) = inner.recency.iter().position(|&id| id == victim) {
            inner.recency.remove(pos);
        }
        inner.evictable.remove(&victim);
        Some(victim)
    }

    fn size(&self) -> usize {
        self.inner.lock().evictable.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recent_first() {
        let replacer = LruReplacer::new(4);
        for frame in [1, 2, 3] {
            replacer.record_access(frame);
            replacer.set_evictable(frame, true);
        }
        // refresh frame 1: it is now the most recent
        replacer.record_access(1);

        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_non_evictable_skipped() {
        let replacer = LruReplacer::new(3);
        for frame in [1, 2] {
            replacer.record_access(frame);
            replacer.set_evictable(frame, true);
        }
        replacer.set_evictable(1, false);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_remove_forgets_frame() {
        let replacer = LruReplacer::new(2);
        replacer.record_access(1);
        replacer.set_evictable(1, true);
        replacer.remove(1);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }
}
