use std::collections::HashMap;
use std::sync::Arc;

use chain_ro_types::{HeadChange, Priority, Tipset, Weight};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use crate::candidate::HeadCandidate;
use crate::reorg::{reorg_ops, TipsetResolver};
use crate::selector::Selector;
use crate::pubsub::Topic;

struct State {
    head: Option<Tipset>,
    weight: Weight,
    catch_up_set: Vec<String>,
}

/// Holds the canonical head and arbitrates between disagreeing upstreams.
/// All state mutation happens on the single consumer loop driven by
/// `run`; `head()`/`weight()`/`catch_up_set()` take the read lock for
/// concurrent readers (the selector doesn't read this state directly,
/// but request handlers answering `ChainHead` do).
pub struct Coordinator {
    state: RwLock<State>,
    selector: Arc<Selector>,
    topic: Arc<Topic>,
}

impl Coordinator {
    pub fn new(selector: Arc<Selector>, topic: Arc<Topic>) -> Self {
        Self {
            state: RwLock::new(State {
                head: None,
                weight: Weight::zero(),
                catch_up_set: Vec::new(),
            }),
            selector,
            topic,
        }
    }

    /// Installs the initial canonical head at startup, bypassing the
    /// replacement rule since there is no current head to reconcile
    /// against.
    pub async fn install_initial_head(&self, tipset: Tipset, weight: Weight, source: String) {
        let mut state = self.state.write().await;
        state.head = Some(tipset);
        state.weight = weight;
        state.catch_up_set = vec![source.clone()];
        drop(state);
        self.selector
            .set_priority(Priority::CatchUpPriority, [source])
            .await;
    }

    pub async fn head(&self) -> Option<Tipset> {
        self.state.read().await.head.clone()
    }

    pub async fn weight(&self) -> Weight {
        self.state.read().await.weight.clone()
    }

    pub async fn catch_up_set(&self) -> Vec<String> {
        self.state.read().await.catch_up_set.clone()
    }

    pub async fn has_head(&self) -> bool {
        self.state.read().await.head.is_some()
    }

    /// Demotes an upstream that reported a transient error (connect or
    /// subscribe failure) to `ErrPriority`. An upstream in the catch-up
    /// set is no longer caught up once it's erroring, so it's also pulled
    /// out of that set here rather than left to linger alongside its
    /// demoted priority.
    pub async fn handle_error(&self, address: String) {
        {
            let mut state = self.state.write().await;
            state.catch_up_set.retain(|a| a != &address);
        }
        self.selector
            .set_priority(Priority::ErrPriority, [address])
            .await;
    }

    /// Compares an incoming candidate against the current head and either
    /// installs it as the new head, folds its source into the catch-up
    /// set (if it agrees with the current head), or drops it (if it's
    /// strictly lighter).
    pub async fn handle_candidate(&self, candidate: HeadCandidate, resolver: &dyn TipsetResolver) {
        let weights = self.selector.list_weight().await;
        if weights.get(&candidate.source).copied().unwrap_or(0) == 0 {
            return; // admin-blocked
        }

        let (current_head, current_weight) = {
            let state = self.state.read().await;
            (state.head.clone(), state.weight.clone())
        };

        let supersedes = match &current_head {
            None => true,
            Some(head) => {
                candidate.weight > current_weight
                    || (candidate.weight == current_weight
                        && candidate.tipset.blocks().len() > head.blocks().len())
            }
        };

        if supersedes {
            self.install_new_head(candidate, current_head, resolver).await;
            return;
        }

        if let Some(head) = &current_head {
            if candidate.tipset.key() == head.key() {
                self.join_catch_up(candidate.source).await;
            }
            // else: strictly lighter head, ignored.
        }
    }

    async fn install_new_head(
        &self,
        candidate: HeadCandidate,
        current_head: Option<Tipset>,
        resolver: &dyn TipsetResolver,
    ) {
        let events = match &current_head {
            None => vec![HeadChange::apply(candidate.tipset.clone())],
            Some(head) => {
                if head.key() == candidate.tipset.key() {
                    // Never publish a revert/apply pair when the
                    // installed tipset is already equal to the incoming
                    // one by key.
                    Vec::new()
                } else {
                    match reorg_ops(resolver, head, &candidate.tipset).await {
                        Ok((revert, apply)) => {
                            if revert.is_empty() && apply.is_empty() {
                                return;
                            }
                            crate::metrics::REORGS_DETECTED.inc();
                            revert
                                .into_iter()
                                .map(HeadChange::revert)
                                .chain(apply.into_iter().map(HeadChange::apply))
                                .collect()
                        }
                        Err(e) => {
                            error!(error = %e, "reorg reconstruction failed, discarding candidate");
                            return;
                        }
                    }
                }
            }
        };

        {
            let mut state = self.state.write().await;
            state.head = Some(candidate.tipset.clone());
            state.weight = candidate.weight.clone();
            state.catch_up_set = vec![candidate.source.clone()];
        }
        crate::metrics::HEAD_INSTALLED.inc();

        let previously_catch_up = self
            .selector
            .addresses_of_priority(Priority::CatchUpPriority)
            .await;
        self.selector
            .set_priority(Priority::DelayPriority, previously_catch_up)
            .await;
        self.selector
            .set_priority(Priority::CatchUpPriority, [candidate.source])
            .await;

        if !events.is_empty() {
            self.topic.publish(events).await;
        }
    }

    async fn join_catch_up(&self, source: String) {
        let mut state = self.state.write().await;
        if !state.catch_up_set.contains(&source) {
            state.catch_up_set.push(source.clone());
        }
        drop(state);
        self.selector
            .set_priority(Priority::CatchUpPriority, [source])
            .await;
    }

    /// Single-consumer loop over candidates and error notifications. All
    /// state mutation happens on this task, so no additional lock is
    /// needed beyond the one guarding concurrent readers.
    pub async fn run(
        self: Arc<Self>,
        mut candidates: mpsc::Receiver<HeadCandidate>,
        mut errors: mpsc::Receiver<String>,
        resolvers: HashMap<String, Arc<dyn TipsetResolver>>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                candidate = candidates.recv() => {
                    match candidate {
                        Some(c) => {
                            // Each candidate resolves reorg ancestors
                            // through its own source upstream.
                            match resolvers.get(&c.source) {
                                Some(resolver) => self.handle_candidate(c, resolver.as_ref()).await,
                                None => warn!(source = %c.source, "candidate from an unregistered upstream"),
                            }
                        }
                        None => break,
                    }
                }
                address = errors.recv() => {
                    match address {
                        Some(a) => self.handle_error(a).await,
                        None => break,
                    }
                }
            }
        }
        info!("coordinator shutting down");
        self.topic.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_ro_types::{BlockCid, BlockHeader, TipsetKey};
    use cid::Cid;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

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

    fn multi_block_tipset(ids: &[u8], height: u64, parent: TipsetKey) -> Tipset {
        let headers = ids
            .iter()
            .map(|id| BlockHeader {
                cid: cid(*id),
                height,
                parents: parent.clone(),
                timestamp: height,
            })
            .collect();
        Tipset::new(headers).unwrap()
    }

    struct NullResolver;
    #[async_trait::async_trait]
    impl TipsetResolver for NullResolver {
        async fn load_tipset(&self, _key: &TipsetKey) -> anyhow::Result<Tipset> {
            Err(anyhow::anyhow!("not used in this test"))
        }
    }

    struct FakeChain(StdMutex<HashMap<TipsetKey, Tipset>>);
    #[async_trait::async_trait]
    impl TipsetResolver for FakeChain {
        async fn load_tipset(&self, key: &TipsetKey) -> anyhow::Result<Tipset> {
            self.0
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing"))
        }
    }

    async fn setup(addrs: &[&str]) -> (Arc<Coordinator>, Arc<Selector>) {
        let selector = Arc::new(Selector::new());
        for a in addrs {
            selector.register(a).await;
        }
        let topic = Topic::new();
        let coordinator = Arc::new(Coordinator::new(selector.clone(), topic));
        (coordinator, selector)
    }

    #[tokio::test]
    async fn heavier_candidate_is_promoted() {
        let (coordinator, selector) = setup(&["a", "b"]).await;
        let t0 = tipset(1, 0, TipsetKey::default());
        coordinator
            .install_initial_head(t0.clone(), Weight::from(100u64), "a".to_string())
            .await;
        selector.set_priority(Priority::CatchUpPriority, ["b".to_string()]).await;

        let t1 = tipset(2, 1, t0.key().clone());
        let candidate = HeadCandidate {
            source: "b".to_string(),
            tipset: t1.clone(),
            weight: Weight::from(120u64),
        };
        coordinator.handle_candidate(candidate, &NullResolver).await;

        assert_eq!(coordinator.head().await.unwrap().key(), t1.key());
        assert_eq!(
            selector.list_priority().await["b"],
            Priority::CatchUpPriority
        );
        assert_eq!(selector.list_priority().await["a"], Priority::DelayPriority);
    }

    #[tokio::test]
    async fn lighter_candidate_is_ignored() {
        let (coordinator, selector) = setup(&["a", "b"]).await;
        let t0 = tipset(1, 0, TipsetKey::default());
        let t1 = tipset(2, 1, t0.key().clone());
        coordinator
            .install_initial_head(t1.clone(), Weight::from(120u64), "b".to_string())
            .await;
        selector.set_priority(Priority::DelayPriority, ["a".to_string()]).await;

        let late = HeadCandidate {
            source: "a".to_string(),
            tipset: t0.clone(),
            weight: Weight::from(100u64),
        };
        coordinator.handle_candidate(late, &NullResolver).await;

        assert_eq!(coordinator.head().await.unwrap().key(), t1.key());
        assert_eq!(selector.list_priority().await["a"], Priority::DelayPriority);
    }

    #[tokio::test]
    async fn equal_weight_tie_break_prefers_more_blocks() {
        let (coordinator, _selector) = setup(&["a", "b"]).await;
        let parent = TipsetKey::default();
        let head = tipset(1, 10, parent.clone());
        coordinator
            .install_initial_head(head.clone(), Weight::from(100u64), "a".to_string())
            .await;

        let bigger = multi_block_tipset(&[2, 3], 10, parent);
        let candidate = HeadCandidate {
            source: "b".to_string(),
            tipset: bigger.clone(),
            weight: Weight::from(100u64),
        };
        coordinator.handle_candidate(candidate, &NullResolver).await;
        assert_eq!(coordinator.head().await.unwrap().key(), bigger.key());
    }

    #[tokio::test]
    async fn duplicate_candidate_does_not_republish() {
        let (coordinator, selector) = setup(&["a", "b"]).await;
        let t0 = tipset(1, 0, TipsetKey::default());
        coordinator
            .install_initial_head(t0.clone(), Weight::from(100u64), "a".to_string())
            .await;
        let t1 = tipset(2, 1, t0.key().clone());
        selector.register("b").await;
        selector.set_priority(Priority::CatchUpPriority, ["b".to_string()]).await;

        let candidate = HeadCandidate {
            source: "b".to_string(),
            tipset: t1.clone(),
            weight: Weight::from(120u64),
        };
        coordinator.handle_candidate(candidate.clone(), &NullResolver).await;
        let weight_after_first = coordinator.weight().await;

        // Same candidate again: same tipset key as current head, so it
        // should join catch-up without changing head/weight.
        coordinator.handle_candidate(candidate, &NullResolver).await;
        assert_eq!(coordinator.weight().await, weight_after_first);
        assert_eq!(coordinator.head().await.unwrap().key(), t1.key());
    }

    #[tokio::test]
    async fn handle_error_clears_catch_up_membership() {
        let (coordinator, selector) = setup(&["a", "b"]).await;
        let t0 = tipset(1, 0, TipsetKey::default());
        coordinator
            .install_initial_head(t0, Weight::from(100u64), "a".to_string())
            .await;
        selector.set_priority(Priority::CatchUpPriority, ["b".to_string()]).await;
        coordinator.join_catch_up("b".to_string()).await;
        assert!(coordinator.catch_up_set().await.contains(&"b".to_string()));

        coordinator.handle_error("b".to_string()).await;

        assert!(!coordinator.catch_up_set().await.contains(&"b".to_string()));
        assert_eq!(selector.list_priority().await["b"], Priority::ErrPriority);
    }

    #[tokio::test]
    async fn reorg_produces_revert_then_apply_in_order() {
        let (coordinator, selector) = setup(&["a", "b"]).await;

        let mut by_key = HashMap::new();
        let p = tipset(1, 0, TipsetKey::default());
        by_key.insert(p.key().clone(), p.clone());
        let t0 = tipset(2, 1, p.key().clone());
        by_key.insert(t0.key().clone(), t0.clone());
        let t1a = tipset(3, 2, t0.key().clone());
        by_key.insert(t1a.key().clone(), t1a.clone());
        let t0_prime = tipset(4, 1, p.key().clone());
        by_key.insert(t0_prime.key().clone(), t0_prime.clone());
        let t1b = tipset(5, 2, t0_prime.key().clone());
        by_key.insert(t1b.key().clone(), t1b.clone());

        let chain = FakeChain(StdMutex::new(by_key));

        coordinator
            .install_initial_head(t1a.clone(), Weight::from(200u64), "a".to_string())
            .await;
        selector.register("b").await;

        let candidate = HeadCandidate {
            source: "b".to_string(),
            tipset: t1b.clone(),
            weight: Weight::from(210u64),
        };
        coordinator.handle_candidate(candidate, &chain).await;

        assert_eq!(coordinator.head().await.unwrap().key(), t1b.key());
    }
}
