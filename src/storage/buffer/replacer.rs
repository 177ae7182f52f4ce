//! Page replacement policies for the buffer pool.

use std::collections::{HashMap, VecDeque};

use super::frame::FrameId;

/// Trait for page replacement policies.
///
/// The replacer tracks frames and selects victims for eviction when the
/// buffer pool runs out of free frames. Only frames marked evictable are
/// candidates; the pool marks a frame non-evictable whenever it is pinned.
///
/// Operational misuse is reported by return value (`evict` returning
/// `None`, `remove` of an absent frame being a no-op). Contract violations
/// (an out-of-range frame id, toggling an untracked frame, removing a
/// non-evictable frame) panic.
pub trait Replacer: Send {
    /// Records an access to a frame at the current timestamp, creating its
    /// tracking node if absent.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is outside the replacer's capacity.
    fn record_access(&mut self, frame_id: FrameId);

    /// Marks a frame evictable or non-evictable. Idempotent when the flag
    /// does not change.
    ///
    /// # Panics
    ///
    /// Panics if the frame is not tracked.
    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool);

    /// Stops tracking a frame outright. No-op if the frame is untracked.
    ///
    /// # Panics
    ///
    /// Panics if the frame is tracked but not evictable.
    fn remove(&mut self, frame_id: FrameId);

    /// Selects, removes, and returns a victim frame, or `None` when no
    /// frame is evictable.
    fn evict(&mut self) -> Option<FrameId>;

    /// Number of evictable frames.
    fn size(&self) -> usize;
}

/// Tracking node for one frame.
struct LruKNode {
    /// Access timestamps, oldest first, truncated to the most recent K.
    history: VecDeque<u64>,
    is_evictable: bool,
}

/// LRU-K page replacement policy.
///
/// For a frame with access timestamps `t₁ ≤ … ≤ tₘ` at current time `T`,
/// the backward K-distance is `T − t_{m−k+1}` (the K-th most recent
/// access), or `+∞` when fewer than K accesses exist. `evict` picks the
/// frame with the largest K-distance; among `+∞` frames it prefers the one
/// with the oldest first access.
///
/// Timestamps are a logical counter bumped on every `record_access`, so
/// the policy is deterministic and independent of wall-clock time.
pub struct LruKReplacer {
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
    /// Number of evictable nodes.
    curr_size: usize,
    /// Capacity: frame ids must be below this.
    replacer_size: usize,
    k: usize,
}

impl LruKReplacer {
    /// Creates a replacer tracking up to `num_frames` frames with the given
    /// `k` parameter.
    ///
    /// # Panics
    ///
    /// Panics if `k` is zero.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            node_store: HashMap::new(),
            current_timestamp: 0,
            curr_size: 0,
            replacer_size: num_frames,
            k,
        }
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&mut self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.replacer_size,
            "frame id {} out of range (replacer capacity {})",
            frame_id.as_usize(),
            self.replacer_size
        );

        self.current_timestamp += 1;
        let timestamp = self.current_timestamp;
        let k = self.k;
        let node = self.node_store.entry(frame_id).or_insert_with(|| LruKNode {
            history: VecDeque::with_capacity(k),
            is_evictable: false,
        });

        node.history.push_back(timestamp);
        if node.history.len() > k {
            node.history.pop_front();
        }
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let Some(node) = self.node_store.get_mut(&frame_id) else {
            panic!("set_evictable on untracked frame {}", frame_id.as_usize());
        };

        if node.is_evictable != evictable {
            node.is_evictable = evictable;
            if evictable {
                self.curr_size += 1;
            } else {
                self.curr_size -= 1;
            }
        }
    }

    fn remove(&mut self, frame_id: FrameId) {
        let Some(node) = self.node_store.get(&frame_id) else {
            return;
        };
        assert!(
            node.is_evictable,
            "remove of non-evictable frame {}",
            frame_id.as_usize()
        );
        self.node_store.remove(&frame_id);
        self.curr_size -= 1;
    }

    fn evict(&mut self) -> Option<FrameId> {
        if self.curr_size == 0 {
            return None;
        }

        // With the history truncated to the last K entries, the front is t₁
        // for short histories and the K-th most recent access otherwise, so
        // both selection rules reduce to the smallest front timestamp,
        // with infinite-distance (short-history) nodes taking priority.
        let mut victim: Option<(FrameId, bool, u64)> = None;
        for (&frame_id, node) in &self.node_store {
            if !node.is_evictable {
                continue;
            }
            let is_inf = node.history.len() < self.k;
            let ts = *node.history.front().expect("tracked frame has history");

            let better = match victim {
                None => true,
                Some((_, best_inf, best_ts)) => {
                    (is_inf && !best_inf) || (is_inf == best_inf && ts < best_ts)
                }
            };
            if better {
                victim = Some((frame_id, is_inf, ts));
            }
        }

        let (frame_id, _, _) = victim.expect("curr_size > 0 implies an evictable node");
        self.node_store.remove(&frame_id);
        self.curr_size -= 1;
        Some(frame_id)
    }

    fn size(&self) -> usize {
        self.curr_size
    }
}
