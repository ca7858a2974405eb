use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::types::FrameId;
use crate::storage::buffer::replacer::Replacer;

/// Per-frame access history: up to the K most recent timestamps from the
/// replacer's logical clock, oldest at the front.
struct FrameHistory {
    timestamps: VecDeque<u64>,
    evictable: bool,
}

struct ReplacerInner {
    histories: HashMap<FrameId, FrameHistory>,
    current_timestamp: u64,
    evictable_count: usize,
}

/// LRU-K page replacement policy.
///
/// A frame with fewer than K recorded accesses has infinite backward
/// k-distance and is evicted first (classical LRU among those, by first
/// recorded access). Otherwise the frame whose K-th most recent access is
/// oldest wins. Ties break toward the smallest frame id so eviction order
/// is deterministic.
pub struct LruKReplacer {
    k: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            inner: Mutex::new(ReplacerInner {
                histories: HashMap::with_capacity(num_frames),
                current_timestamp: 0,
                evictable_count: 0,
            }),
        }
    }

    /// Record an access to `frame_id` at the next logical timestamp. New
    /// frames enter as non-evictable.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let now = inner.current_timestamp;
        let history = inner
            .histories
            .entry(frame_id)
            .or_insert_with(|| FrameHistory {
                timestamps: VecDeque::with_capacity(self.k),
                evictable: false,
            });
        history.timestamps.push_back(now);
        if history.timestamps.len() > self.k {
            history.timestamps.pop_front();
        }
    }

    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        let Some(history) = inner.histories.get_mut(&frame_id) else {
            debug_assert!(false, "set_evictable on unrecorded frame {frame_id}");
            return;
        };
        match (history.evictable, evictable) {
            (false, true) => {
                history.evictable = true;
                inner.evictable_count += 1;
            }
            (true, false) => {
                history.evictable = false;
                inner.evictable_count -= 1;
            }
            _ => {}
        }
    }

    /// Drop a frame's history entirely. Only valid for evictable frames.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(history) = inner.histories.get(&frame_id) {
            debug_assert!(history.evictable, "remove on non-evictable frame {frame_id}");
            if history.evictable {
                inner.evictable_count -= 1;
            }
            inner.histories.remove(&frame_id);
        }
    }

    /// Pick and forget a victim, or `None` when nothing is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let mut victim: Option<(bool, u64, FrameId)> = None;
        for (&frame_id, history) in inner.histories.iter() {
            if !history.evictable {
                continue;
            }
            // For a full history the front is the K-th most recent access;
            // for a short one it is the first access ever recorded.
            let finite = history.timestamps.len() >= self.k;
            let front = *history.timestamps.front().expect("recorded frame");
            let rank = (finite, front, frame_id);
            if victim.map_or(true, |best| rank < best) {
                victim = Some(rank);
            }
        }
        let (_, _, frame_id) = victim?;
        inner.histories.remove(&frame_id);
        inner.evictable_count -= 1;
        Some(frame_id)
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&self, frame_id: FrameId) {
        LruKReplacer::record_access(self, frame_id);
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        LruKReplacer::set_evictable(self, frame_id, evictable);
    }

    fn remove(&self, frame_id: FrameId) {
        LruKReplacer::remove(self, frame_id);
    }

    fn evict(&self) -> Option<FrameId> {
        LruKReplacer::evict(self)
    }

    fn size(&self) -> usize {
        LruKReplacer::size(self)
    }
}
