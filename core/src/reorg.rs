use async_trait::async_trait;
use chain_ro_types::Tipset;

use crate::error::ReorgError;

/// Maximum number of parent-walk steps `reorg_ops` will take on either
/// side before giving up. Chosen generously relative to typical reorg
/// depths (single digits); a real deployment would size this to the
/// chain's practical finality window.
pub const MAX_REORG_DEPTH: u64 = 500;

/// Resolves a tipset key to the full tipset, walking the chain backward.
/// Implemented by the node agent via `loadTipSet`: consult the
/// block-header cache first, else fetch from the upstream.
#[async_trait]
pub trait TipsetResolver: Send + Sync {
    async fn load_tipset(&self, key: &chain_ro_types::TipsetKey) -> anyhow::Result<Tipset>;
}

/// Given `from` and `to` tipsets, walk both chains backward one step at a
/// time from whichever side has the greater height until heights match,
/// then advance both until the tipset keys coincide (the common
/// ancestor). Returns `(revert, apply)`: `revert` is tipsets popped from
/// `from`'s side in the order popped (from `from` toward the ancestor);
/// `apply` is tipsets popped from `to`'s side, reversed (ancestor-to-`to`
/// order).
pub async fn reorg_ops(
    resolver: &dyn TipsetResolver,
    from: &Tipset,
    to: &Tipset,
) -> Result<(Vec<Tipset>, Vec<Tipset>), ReorgError> {
    if from.key() == to.key() {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut left = from.clone();
    let mut right = to.clone();
    let mut revert = Vec::new();
    let mut apply = Vec::new();
    let mut steps = 0u64;

    // Equalise heights first.
    while left.height() > right.height() {
        revert.push(left.clone());
        left = step_back(resolver, &left).await?;
        steps += 1;
        if steps > MAX_REORG_DEPTH {
            return Err(ReorgError::NoCommonAncestor {
                max_depth: MAX_REORG_DEPTH,
            });
        }
    }
    while right.height() > left.height() {
        apply.push(right.clone());
        right = step_back(resolver, &right).await?;
        steps += 1;
        if steps > MAX_REORG_DEPTH {
            return Err(ReorgError::NoCommonAncestor {
                max_depth: MAX_REORG_DEPTH,
            });
        }
    }

    // Now walk both back together until the keys coincide.
    while left.key() != right.key() {
        revert.push(left.clone());
        apply.push(right.clone());
        left = step_back(resolver, &left).await?;
        right = step_back(resolver, &right).await?;
        steps += 1;
        if steps > MAX_REORG_DEPTH {
            return Err(ReorgError::NoCommonAncestor {
                max_depth: MAX_REORG_DEPTH,
            });
        }
    }

    apply.reverse();
    Ok((revert, apply))
}

async fn step_back(resolver: &dyn TipsetResolver, ts: &Tipset) -> Result<Tipset, ReorgError> {
    resolver
        .load_tipset(ts.parents())
        .await
        .map_err(|_| ReorgError::NoCommonAncestor {
            max_depth: MAX_REORG_DEPTH,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_ro_types::{BlockCid, BlockHeader, TipsetKey};
    use cid::Cid;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn cid(n: u8) -> BlockCid {
        BlockCid(Cid::new_v1(
            cid::Code::Identity.into(),
            multihash::Multihash::wrap(0, &[n]).unwrap(),
        ))
    }

    fn tipset(id: u8, height: u64, parent: TipsetKey) -> Tipset {
        let header = BlockHeader {
            cid: cid(id),
            height,
            parents: parent,
            timestamp: height,
        };
        Tipset::new(vec![header]).unwrap()
    }

    struct FakeChain {
        by_key: Mutex<HashMap<TipsetKey, Tipset>>,
    }

    #[async_trait]
    impl TipsetResolver for FakeChain {
        async fn load_tipset(&self, key: &TipsetKey) -> anyhow::Result<Tipset> {
            self.by_key
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such tipset"))
        }
    }

    /// Builds a single linear chain `genesis -> t1 -> t2 -> ... -> tN` and
    /// returns `(resolver, tipsets)`.
    fn linear_chain(ids: &[u8]) -> (FakeChain, Vec<Tipset>) {
        let mut by_key = HashMap::new();
        let mut parent = TipsetKey::default();
        let mut tipsets = Vec::new();
        for (height, id) in ids.iter().enumerate() {
            let ts = tipset(*id, height as u64, parent.clone());
            by_key.insert(ts.key().clone(), ts.clone());
            parent = ts.key().clone();
            tipsets.push(ts);
        }
        (
            FakeChain {
                by_key: Mutex::new(by_key),
            },
            tipsets,
        )
    }

    #[tokio::test]
    async fn identical_tipsets_produce_no_changes() {
        let (chain, ts) = linear_chain(&[1, 2, 3]);
        let head = ts.last().unwrap();
        let (revert, apply) = reorg_ops(&chain, head, head).await.unwrap();
        assert!(revert.is_empty());
        assert!(apply.is_empty());
    }

    #[tokio::test]
    async fn straight_extension_only_applies() {
        let (chain, ts) = linear_chain(&[1, 2, 3]);
        let (revert, apply) = reorg_ops(&chain, &ts[0], &ts[2]).await.unwrap();
        assert!(revert.is_empty());
        assert_eq!(apply, vec![ts[1].clone(), ts[2].clone()]);
    }

    #[tokio::test]
    async fn fork_reverts_then_applies_in_order() {
        // Shared prefix: genesis(0) -> common(1). Then two forks:
        // common -> a2 -> a3 (from)   common -> b2 (to)
        let mut by_key = HashMap::new();
        let genesis = tipset(0, 0, TipsetKey::default());
        by_key.insert(genesis.key().clone(), genesis.clone());
        let common = tipset(1, 1, genesis.key().clone());
        by_key.insert(common.key().clone(), common.clone());
        let a2 = tipset(2, 2, common.key().clone());
        by_key.insert(a2.key().clone(), a2.clone());
        let a3 = tipset(3, 3, a2.key().clone());
        by_key.insert(a3.key().clone(), a3.clone());
        let b2 = tipset(4, 2, common.key().clone());
        by_key.insert(b2.key().clone(), b2.clone());

        let chain = FakeChain {
            by_key: Mutex::new(by_key),
        };

        let (revert, apply) = reorg_ops(&chain, &a3, &b2).await.unwrap();
        assert_eq!(revert, vec![a3.clone(), a2.clone()]);
        assert_eq!(apply, vec![b2.clone()]);
    }
}
