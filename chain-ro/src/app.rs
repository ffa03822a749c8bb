use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result as AnyResult};
use chain_ro_core::agent::NodeAgent;
use chain_ro_core::bootstrap::pick_initial_head;
use chain_ro_core::candidate::HeadCandidate;
use chain_ro_core::coordinator::Coordinator;
use chain_ro_core::pubsub::Topic;
use chain_ro_core::rpc::{JsonRpcUpstream, UpstreamRpc};
use chain_ro_core::selector::Selector;
use chain_ro_core::BlockHeaderCache;
use chain_ro_types::UpstreamConfig;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Wires the five core components together: the block-header cache, one
/// `NodeAgent` per configured upstream, the selector, the coordinator, and
/// the head-change topic. Analogous in role to `order-watcher/src/lib.rs`'s
/// own `App` struct, which owns the database/ethereum/kafka handles a
/// request handler needs.
pub struct App {
    pub selector: Arc<Selector>,
    pub coordinator: Arc<Coordinator>,
    pub topic: Arc<Topic>,
    pub cache: Arc<BlockHeaderCache>,
    pub agents: HashMap<String, Arc<NodeAgent>>,
    shutdown: watch::Sender<bool>,
}

impl App {
    pub async fn connect(upstreams: Vec<UpstreamConfig>) -> AnyResult<Arc<Self>> {
        anyhow::ensure!(!upstreams.is_empty(), "at least one --node is required");

        let cache = Arc::new(BlockHeaderCache::default());
        let selector = Arc::new(Selector::new());
        let topic = Topic::new();
        let coordinator = Arc::new(Coordinator::new(selector.clone(), topic.clone()));

        let mut agents = HashMap::new();
        for config in &upstreams {
            selector.register(&config.key()).await;
            agents.insert(
                config.key(),
                Arc::new(NodeAgent::new(config.clone(), cache.clone())),
            );
        }

        let clients = connect_all(&upstreams).await;
        let probe_refs: Vec<(String, &dyn UpstreamRpc)> = clients
            .iter()
            .map(|(addr, client)| (addr.clone(), client.as_ref() as &dyn UpstreamRpc))
            .collect();
        let initial = pick_initial_head(&probe_refs)
            .await
            .context("startup failed: no upstream produced an initial head")?;
        info!(source = %initial.source, weight = %initial.weight, "installed initial canonical head");
        coordinator
            .install_initial_head(initial.tipset, initial.weight, initial.source)
            .await;

        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            selector,
            coordinator,
            topic,
            cache,
            agents,
            shutdown,
        }))
    }

    /// Launches each agent's head-listen loop plus the coordinator's
    /// single-consumer loop.
    pub fn start(self: &Arc<Self>) {
        let (candidate_tx, candidate_rx) = mpsc::channel::<HeadCandidate>(chain_ro_core::agent::HEAD_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel::<String>(chain_ro_core::agent::HEAD_CHANNEL_CAPACITY);

        for agent in self.agents.values() {
            let agent = agent.clone();
            let candidate_tx = candidate_tx.clone();
            let error_tx = error_tx.clone();
            tokio::spawn(async move {
                agent
                    .start(
                        |config| {
                            let config = config.clone();
                            Box::pin(async move {
                                let client = JsonRpcUpstream::connect(&config.address, &config.token).await?;
                                Ok(Arc::new(client) as Arc<dyn UpstreamRpc>)
                            })
                        },
                        candidate_tx,
                        error_tx,
                    )
                    .await;
            });
        }

        // Each candidate's reorg reconstruction walks parents through its
        // own source upstream.
        let resolvers: HashMap<String, Arc<dyn chain_ro_core::reorg::TipsetResolver>> = self
            .agents
            .iter()
            .map(|(addr, agent)| (addr.clone(), agent.clone() as Arc<dyn chain_ro_core::reorg::TipsetResolver>))
            .collect();

        let coordinator = self.coordinator.clone();
        let shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            coordinator.run(candidate_rx, error_rx, resolvers, shutdown_rx).await;
        });
    }

    pub async fn stop(&self) {
        for agent in self.agents.values() {
            agent.stop();
        }
        let _ = self.shutdown.send(true);
    }

    /// `FullNode()`: picks an upstream via the selector and returns its
    /// agent, so the caller can forward one call through its RPC client.
    pub async fn pick_agent(&self) -> AnyResult<Arc<NodeAgent>> {
        let address = self.selector.select().await?;
        self.agents
            .get(&address)
            .cloned()
            .context("selector returned an unregistered address")
    }
}

async fn connect_all(upstreams: &[UpstreamConfig]) -> Vec<(String, Arc<JsonRpcUpstream>)> {
    let attempts = upstreams.iter().map(|config| async move {
        match JsonRpcUpstream::connect(&config.address, &config.token).await {
            Ok(client) => Some((config.key(), Arc::new(client))),
            Err(e) => {
                tracing::warn!(address = %config.key(), error = %e, "startup probe failed to connect");
                None
            }
        }
    });
    futures::future::join_all(attempts)
        .await
        .into_iter()
        .flatten()
        .collect()
}
