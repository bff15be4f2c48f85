use linked_hash_map::LinkedHashMap;
use crate::common::types::FrameId;

/// LRU (Least Recently Used) page replacement policy.
///
/// Tracks the frames that are eligible for eviction, ordered by how recently
/// they became unpinned. The insertion-ordered map gives O(1) victim
/// selection, pinning, and unpinning.
pub struct LruReplacer {
    frames: LinkedHashMap<FrameId, ()>,
}

impl LruReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            frames: LinkedHashMap::with_capacity(pool_size),
        }
    }

    /// Remove and return the least recently unpinned frame, if any.
    pub fn victim(&mut self) -> Option<FrameId> {
        self.frames.pop_front().map(|(frame_id, ())| frame_id)
    }

    /// Stop tracking a frame because it is in use again. No-op if the frame
    /// is not tracked.
    pub fn pin(&mut self, frame_id: FrameId) {
        self.frames.remove(&frame_id);
    }

    /// Start tracking a frame at the most-recent end. No-op if the frame is
    /// already tracked, so repeated unpins do not refresh its position.
    pub fn unpin(&mut self, frame_id: FrameId) {
        if !self.frames.contains_key(&frame_id) {
            self.frames.insert(frame_id, ());
        }
    }

    /// Number of frames currently eligible for eviction.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
