use std::num::NonZeroUsize;
use std::sync::Mutex;

use chain_ro_types::{BlockCid, BlockHeader, HeadChange, TipsetKey};
use lru::LruCache;

/// Default capacity: a 2Q-style LRU sized to ~2^20 entries.
pub const DEFAULT_CAPACITY: usize = 1 << 20;

/// A simplified 2Q cache: a small FIFO-ish `recent` segment absorbs
/// one-off insertions (most blocks are looked at once, during the batch
/// that introduced them), and a larger `frequent` segment holds entries
/// that have been looked up a second time — blocks that keep being
/// revisited across reorg reconstructions. Both segments are plain LRUs
/// from the `lru` crate (already a dependency of two other repos in this
/// pack); the two-segment split is what makes this 2Q rather than a flat
/// LRU, and it keeps a single hot reorg depth from evicting the entries a
/// *different* reorg still needs.
pub struct BlockHeaderCache {
    inner: Mutex<Inner>,
}

struct Inner {
    recent: LruCache<BlockCid, BlockHeader>,
    frequent: LruCache<BlockCid, BlockHeader>,
}

impl BlockHeaderCache {
    pub fn new(capacity: usize) -> Self {
        let recent_cap = (capacity / 4).max(1);
        let frequent_cap = capacity.saturating_sub(recent_cap).max(1);
        Self {
            inner: Mutex::new(Inner {
                recent: LruCache::new(NonZeroUsize::new(recent_cap).unwrap()),
                frequent: LruCache::new(NonZeroUsize::new(frequent_cap).unwrap()),
            }),
        }
    }

    /// Inserts every block header carried by a head-change batch. The
    /// headers already travel embedded in each change's `Tipset`, so this
    /// never needs to go back out to an upstream to learn what it just
    /// received.
    pub fn add(&self, batch: &[HeadChange]) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        for change in batch {
            for header in change.tipset.headers() {
                inner.insert(header.clone());
            }
        }
    }

    pub fn insert(&self, header: BlockHeader) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.insert(header);
    }

    pub fn load(&self, cid: &BlockCid) -> Option<BlockHeader> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.get(cid)
    }

    /// True iff every block identifier of `key` is present in the cache.
    pub fn has_key(&self, key: &TipsetKey) -> bool {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        key.cids().iter().all(|cid| inner.get(cid).is_some())
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner.recent.len() + inner.frequent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn insert(&mut self, header: BlockHeader) {
        if self.frequent.contains(&header.cid) {
            self.frequent.put(header.cid, header);
            return;
        }
        self.recent.put(header.cid, header);
    }

    fn get(&mut self, cid: &BlockCid) -> Option<BlockHeader> {
        if let Some(header) = self.frequent.get(cid).cloned() {
            return Some(header);
        }
        if let Some(header) = self.recent.pop(cid) {
            self.frequent.put(header.cid, header.clone());
            return Some(header);
        }
        None
    }
}

impl Default for BlockHeaderCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cid::Cid;

    fn header(n: u8, height: u64) -> BlockHeader {
        BlockHeader {
            cid: BlockCid(Cid::new_v1(
                cid::Code::Identity.into(),
                multihash::Multihash::wrap(0, &[n]).unwrap(),
            )),
            height,
            parents: TipsetKey::default(),
            timestamp: 0,
        }
    }

    #[test]
    fn load_returns_none_for_absent_entries() {
        let cache = BlockHeaderCache::new(8);
        let h = header(1, 0);
        assert!(cache.load(&h.cid).is_none());
    }

    #[test]
    fn insert_then_load_roundtrips() {
        let cache = BlockHeaderCache::new(8);
        let h = header(1, 10);
        cache.insert(h.clone());
        assert_eq!(cache.load(&h.cid), Some(h));
    }

    #[test]
    fn has_key_requires_every_block() {
        let cache = BlockHeaderCache::new(8);
        let a = header(1, 10);
        let b = header(2, 10);
        cache.insert(a.clone());
        let key = TipsetKey::new(vec![a.cid, b.cid]);
        assert!(!cache.has_key(&key));
        cache.insert(b);
        assert!(cache.has_key(&key));
    }

    #[test]
    fn second_access_promotes_into_frequent_segment() {
        let cache = BlockHeaderCache::new(4); // recent_cap=1, frequent_cap=3
        let a = header(1, 1);
        let b = header(2, 2);
        cache.insert(a.clone());
        // A second, unrelated insertion would evict `a` from `recent` if it
        // were still there; promoting it to `frequent` on lookup protects it.
        assert!(cache.load(&a.cid).is_some());
        cache.insert(b);
        assert!(cache.load(&a.cid).is_some());
    }
}
