use std::collections::BTreeSet;

use cid::Cid;
use serde::{Deserialize, Serialize};

/// Content address of a single block header.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockCid(pub Cid);

impl std::fmt::Debug for BlockCid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for BlockCid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The canonical identifier of a tipset: the sorted set of its block
/// identifiers. Equality of tipsets is defined in terms of this key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct TipsetKey(Vec<BlockCid>);

impl TipsetKey {
    /// Build a key from an arbitrary set of block cids, normalising order so
    /// that two tipsets with the same blocks in different arrival order
    /// compare equal.
    pub fn new(mut cids: Vec<BlockCid>) -> Self {
        cids.sort_unstable();
        cids.dedup();
        Self(cids)
    }

    pub fn cids(&self) -> &[BlockCid] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for TipsetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// A block header as observed from an upstream. Only the fields the core
/// subsystem needs to reconstruct tipsets and walk parent chains are kept;
/// everything else (messages, signatures, proofs) is the concern of the
/// forwarded `ChainGetBlock` response, not this cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub cid: BlockCid,
    pub height: u64,
    pub parents: TipsetKey,
    pub timestamp: u64,
}

/// `{height, set-of-block-identifiers, parent-tipset-key, min-timestamp}`,
/// plus the full headers of its member blocks. Carrying the headers
/// themselves (not just their identifiers) lets a `HeadChange` batch feed
/// the block-header cache directly, with no follow-up `ChainGetBlock`
/// round trip needed to learn what it just received.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tipset {
    key: TipsetKey,
    height: u64,
    parents: TipsetKey,
    min_timestamp: u64,
    headers: Vec<BlockHeader>,
}

impl Tipset {
    pub fn new(mut blocks: Vec<BlockHeader>) -> Option<Self> {
        let first = blocks.first()?;
        let height = first.height;
        let parents = first.parents.clone();
        let min_timestamp = blocks.iter().map(|b| b.timestamp).min()?;
        if blocks
            .iter()
            .any(|b| b.height != height || b.parents != parents)
        {
            return None;
        }
        blocks.sort_unstable_by_key(|b| b.cid);
        blocks.dedup_by_key(|b| b.cid);
        let key = TipsetKey::new(blocks.iter().map(|b| b.cid).collect());
        Some(Self {
            key,
            height,
            parents,
            min_timestamp,
            headers: blocks,
        })
    }

    pub fn key(&self) -> &TipsetKey {
        &self.key
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn parents(&self) -> &TipsetKey {
        &self.parents
    }

    pub fn min_timestamp(&self) -> u64 {
        self.min_timestamp
    }

    pub fn blocks(&self) -> &[BlockCid] {
        self.key.cids()
    }

    /// The full headers of this tipset's member blocks, in the same order
    /// as `blocks()`.
    pub fn headers(&self) -> &[BlockHeader] {
        &self.headers
    }
}

/// Distinct cids referenced across a batch, used by the block-header cache
/// to size its insertion in one pass.
pub fn distinct_cids<'a>(tipsets: impl IntoIterator<Item = &'a Tipset>) -> BTreeSet<BlockCid> {
    tipsets
        .into_iter()
        .flat_map(|ts| ts.blocks().iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(n: u8) -> BlockCid {
        BlockCid(Cid::new_v1(
            cid::Code::Identity.into(),
            multihash::Multihash::wrap(0, &[n]).unwrap(),
        ))
    }

    fn header(cid_byte: u8, height: u64, parents: Vec<BlockCid>) -> BlockHeader {
        BlockHeader {
            cid: cid(cid_byte),
            height,
            parents: TipsetKey::new(parents),
            timestamp: 1000 + height,
        }
    }

    #[test]
    fn key_equality_ignores_arrival_order() {
        let a = TipsetKey::new(vec![cid(1), cid(2)]);
        let b = TipsetKey::new(vec![cid(2), cid(1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn tipset_rejects_mismatched_heights() {
        let blocks = vec![header(1, 10, vec![]), header(2, 11, vec![])];
        assert!(Tipset::new(blocks).is_none());
    }

    #[test]
    fn tipset_min_timestamp_is_minimum_across_blocks() {
        let mut b1 = header(1, 10, vec![]);
        let mut b2 = header(2, 10, vec![]);
        b1.timestamp = 500;
        b2.timestamp = 100;
        let ts = Tipset::new(vec![b1, b2]).unwrap();
        assert_eq!(ts.min_timestamp(), 100);
    }
}
