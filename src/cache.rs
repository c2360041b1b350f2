//! Bounded LRU cache of segment list positions.

use std::collections::VecDeque;

/// A bounded least-recently-used set of segment list positions.
///
/// The canonical segment list owns the segments; the cache only tracks
/// which cold segments currently hold decoded buffers. Inserting into a
/// full cache reports the evicted position so the caller can release
/// that segment's buffers.
#[derive(Debug)]
pub(crate) struct SegmentCache {
    capacity: usize,
    /// Positions ordered least- to most-recently used.
    order: VecDeque<usize>,
}

impl SegmentCache {
    /// Create a cache holding at most `capacity` positions. Capacity is
    /// validated upstream and is never 0.
    pub fn new(capacity: usize) -> Self {
        SegmentCache {
            capacity,
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Record `pos` as most recently used.
    ///
    /// Returns the evicted position when the insert pushed out the
    /// least-recently-used entry.
    pub fn insert(&mut self, pos: usize) -> Option<usize> {
        if let Some(existing) = self.order.iter().position(|&p| p == pos) {
            self.order.remove(existing);
            self.order.push_back(pos);
            return None;
        }
        let evicted = if self.order.len() == self.capacity {
            self.order.pop_front()
        } else {
            None
        };
        self.order.push_back(pos);
        evicted
    }

    /// Iterate the cached positions, least recently used first.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().copied()
    }

    /// Forget all cached positions.
    pub fn clear(&mut self) {
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_until_full() {
        let mut cache = SegmentCache::new(2);
        assert_eq!(cache.insert(0), None);
        assert_eq!(cache.insert(1), None);
        assert_eq!(cache.iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = SegmentCache::new(2);
        cache.insert(0);
        cache.insert(1);
        assert_eq!(cache.insert(2), Some(0));
        assert_eq!(cache.iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_reinsert_refreshes_order() {
        let mut cache = SegmentCache::new(2);
        cache.insert(0);
        cache.insert(1);
        assert_eq!(cache.insert(0), None);
        // 1 is now least recently used and goes first.
        assert_eq!(cache.insert(2), Some(1));
    }

    #[test]
    fn test_capacity_one() {
        let mut cache = SegmentCache::new(1);
        assert_eq!(cache.insert(3), None);
        assert_eq!(cache.insert(4), Some(3));
        assert_eq!(cache.insert(5), Some(4));
    }

    #[test]
    fn test_clear() {
        let mut cache = SegmentCache::new(2);
        cache.insert(0);
        cache.insert(1);
        cache.clear();
        assert_eq!(cache.iter().count(), 0);
        assert_eq!(cache.insert(2), None);
    }
}
