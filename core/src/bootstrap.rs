use chain_ro_types::{Tipset, Weight};

use crate::rpc::UpstreamRpc;

/// One upstream's answer to the startup `ChainHead`/`ChainTipSetWeight`
/// probe, paired with the address that produced it.
pub struct InitialHeadCandidate {
    pub source: String,
    pub tipset: Tipset,
    pub weight: Weight,
}

/// Contacts every configured upstream in parallel once, fetching
/// `ChainHead` and `ChainTipSetWeight`; the heaviest reply is the initial
/// canonical head. Fails if no upstream replies.
pub async fn pick_initial_head(
    upstreams: &[(String, &dyn UpstreamRpc)],
) -> anyhow::Result<InitialHeadCandidate> {
    let probes = upstreams.iter().map(|(address, client)| async move {
        let headers = client.chain_head().await.ok()?;
        let tipset = Tipset::new(headers)?;
        let weight = client.chain_tipset_weight(tipset.key()).await.ok()?;
        Some(InitialHeadCandidate {
            source: address.clone(),
            tipset,
            weight,
        })
    });

    let results = futures::future::join_all(probes).await;
    results
        .into_iter()
        .flatten()
        .max_by(|a, b| a.weight.cmp(&b.weight))
        .ok_or_else(|| anyhow::anyhow!("no configured upstream produced an initial head"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chain_ro_types::{BlockCid, BlockHeader, HeadChange, TipsetKey};
    use cid::Cid;

    struct FixedUpstream {
        height: u64,
        weight: u64,
        fail: bool,
    }

    #[async_trait]
    impl UpstreamRpc for FixedUpstream {
        async fn chain_head(&self) -> anyhow::Result<Vec<BlockHeader>> {
            if self.fail {
                anyhow::bail!("down");
            }
            Ok(vec![BlockHeader {
                cid: BlockCid(Cid::new_v1(
                    cid::Code::Identity.into(),
                    multihash::Multihash::wrap(0, &[self.height as u8]).unwrap(),
                )),
                height: self.height,
                parents: TipsetKey::default(),
                timestamp: 0,
            }])
        }

        async fn chain_get_block(&self, _cid: &BlockCid) -> Result<BlockHeader, crate::error::UpstreamCallError> {
            unimplemented!()
        }

        async fn chain_tipset_weight(&self, _key: &TipsetKey) -> anyhow::Result<Weight> {
            Ok(Weight::from(self.weight))
        }

        async fn chain_notify(
            &self,
        ) -> anyhow::Result<Box<dyn futures::Stream<Item = Vec<HeadChange>> + Send + Unpin>> {
            unimplemented!()
        }

        async fn raw_call(
            &self,
            _method: &str,
            _params: serde_json::Value,
        ) -> Result<serde_json::Value, crate::error::UpstreamCallError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn picks_heaviest_reachable_upstream() {
        let a = FixedUpstream {
            height: 1,
            weight: 100,
            fail: false,
        };
        let b = FixedUpstream {
            height: 2,
            weight: 150,
            fail: false,
        };
        let upstreams: Vec<(String, &dyn UpstreamRpc)> =
            vec![("a".to_string(), &a), ("b".to_string(), &b)];
        let picked = pick_initial_head(&upstreams).await.unwrap();
        assert_eq!(picked.source, "b");
    }

    #[tokio::test]
    async fn fails_when_every_upstream_is_unreachable() {
        let a = FixedUpstream {
            height: 1,
            weight: 100,
            fail: true,
        };
        let upstreams: Vec<(String, &dyn UpstreamRpc)> = vec![("a".to_string(), &a)];
        assert!(pick_initial_head(&upstreams).await.is_err());
    }
}
