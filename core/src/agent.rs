use std::sync::Arc;
use std::time::Duration;

use chain_ro_types::{BlockHeader, HeadChange, HeadChangeKind, Tipset, TipsetKey, UpstreamConfig, Weight};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::cache::BlockHeaderCache;
use crate::candidate::HeadCandidate;
use crate::reorg::TipsetResolver;
use crate::rpc::UpstreamRpc;

/// Lower bound of the reconnect backoff.
pub const MIN_BACKOFF: Duration = Duration::from_secs(4);
/// Upper bound of the reconnect backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(32);
/// Per-call timeout applied to each outgoing upstream RPC.
pub const API_TIMEOUT: Duration = Duration::from_secs(10);
/// How long to wait on a backpressured head-channel send before warning.
pub const SEND_WARN_INTERVAL: Duration = Duration::from_secs(5);
/// Size of the shared head-channel.
pub const HEAD_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AgentState {
    Disconnected,
    Subscribing,
    Streaming,
}

/// One instance per configured upstream. Owns the per-upstream
/// cancellation scope and RPC client, and runs the head-listen loop:
/// connect, subscribe, stream head changes, reconnect with backoff on
/// failure.
pub struct NodeAgent {
    pub config: UpstreamConfig,
    client: RwLock<Option<Arc<dyn UpstreamRpc>>>,
    cache: Arc<BlockHeaderCache>,
    cancel: watch::Sender<bool>,
    cancelled: watch::Receiver<bool>,
}

impl NodeAgent {
    pub fn new(config: UpstreamConfig, cache: Arc<BlockHeaderCache>) -> Self {
        let (cancel, cancelled) = watch::channel(false);
        Self {
            config,
            client: RwLock::new(None),
            cache,
            cancel,
            cancelled,
        }
    }

    pub fn address(&self) -> String {
        self.config.key()
    }

    /// The agent's currently connected RPC client, if any. Used by the
    /// server's forwarding layer to dispatch a pass-through call through
    /// whichever upstream the selector picked.
    pub async fn client(&self) -> Option<Arc<dyn UpstreamRpc>> {
        self.client.read().await.clone()
    }

    /// Cancel the scope and drop the RPC client. Outstanding RPCs and
    /// channel sends observe the cancellation on their next poll.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Launches the head-listen loop. Runs until `stop()` is called.
    /// `candidates` and `errors` are the shared channels into the
    /// coordinator: the agent never mutates selector state directly, it
    /// only ever communicates through these two channels.
    pub async fn start(
        self: &Arc<Self>,
        connect: impl Fn(&UpstreamConfig) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<Arc<dyn UpstreamRpc>>> + Send>>
            + Send
            + Sync
            + 'static,
        candidates: mpsc::Sender<HeadCandidate>,
        errors: mpsc::Sender<String>,
    ) {
        let mut backoff = MIN_BACKOFF;
        let mut state = AgentState::Disconnected;
        let mut stream: Option<Box<dyn futures::Stream<Item = Vec<HeadChange>> + Send + Unpin>> =
            None;

        loop {
            if self.is_cancelled() {
                return;
            }

            match state {
                AgentState::Disconnected => {
                    match connect(&self.config).await {
                        Ok(client) => {
                            *self.client.write().await = Some(client);
                            backoff = MIN_BACKOFF;
                            state = AgentState::Subscribing;
                        }
                        Err(e) => {
                            warn!(address = %self.address(), error = %e, "upstream connect failed");
                            let _ = errors.send(self.address()).await;
                            sleep(backoff).await;
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                    }
                }
                AgentState::Subscribing => {
                    let client = self.client.read().await.clone();
                    match client {
                        Some(client) => match client.chain_notify().await {
                            Ok(s) => {
                                stream = Some(s);
                                state = AgentState::Streaming;
                            }
                            Err(e) => {
                                warn!(address = %self.address(), error = %e, "ChainNotify subscribe failed");
                                let _ = errors.send(self.address()).await;
                                *self.client.write().await = None;
                                crate::metrics::AGENT_RECONNECTS
                                    .with_label_values(&[&self.address()])
                                    .inc();
                                state = AgentState::Disconnected;
                            }
                        },
                        None => state = AgentState::Disconnected,
                    }
                }
                AgentState::Streaming => {
                    use futures::StreamExt;
                    let s = stream.as_mut().expect("streaming state implies a stream");
                    tokio::select! {
                        _ = self.cancelled.clone().changed() => {
                            if self.is_cancelled() {
                                return;
                            }
                        }
                        next = s.next() => {
                            match next {
                                Some(batch) => {
                                    let agent = self.clone();
                                    let candidates = candidates.clone();
                                    tokio::spawn(async move {
                                        agent.apply_changes(batch, candidates).await;
                                    });
                                }
                                None => {
                                    // Server dropped the subscription; re-subscribe.
                                    state = AgentState::Subscribing;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Folds a `ChainNotify` batch into local state: each change's tipset
    /// already carries its member block headers, so they go straight into
    /// the cache with no round trip back to the upstream, then the latest
    /// applied tipset is weighed and proposed to the coordinator.
    async fn apply_changes(&self, batch: Vec<HeadChange>, candidates: mpsc::Sender<HeadCandidate>) {
        let client = self.client.read().await.clone();
        let Some(client) = client else { return };

        self.cache.add(&batch);

        let last = batch
            .iter()
            .rev()
            .find(|c| matches!(c.kind, HeadChangeKind::Current | HeadChangeKind::Apply));
        let Some(last) = last else { return }; // pure reverts, nothing to propose

        let weight = match tokio::time::timeout(API_TIMEOUT, client.chain_tipset_weight(last.tipset.key())).await {
            Ok(Ok(w)) => w,
            Ok(Err(e)) => {
                error!(address = %self.address(), error = %e, "ChainTipSetWeight failed");
                return;
            }
            Err(_) => {
                error!(address = %self.address(), "ChainTipSetWeight timed out");
                return;
            }
        };

        let candidate = HeadCandidate {
            source: self.address(),
            tipset: last.tipset.clone(),
            weight,
        };

        self.send_candidate(candidates, candidate).await;
    }

    async fn send_candidate(&self, candidates: mpsc::Sender<HeadCandidate>, candidate: HeadCandidate) {
        let mut cancelled = self.cancelled.clone();
        let started = tokio::time::Instant::now();
        let reserve = candidates.reserve();
        tokio::pin!(reserve);

        loop {
            tokio::select! {
                _ = cancelled.changed() => {
                    if *cancelled.borrow() {
                        return;
                    }
                }
                permit = &mut reserve => {
                    match permit {
                        Ok(permit) => {
                            permit.send(candidate);
                        }
                        Err(_) => {} // coordinator gone
                    }
                    return;
                }
                _ = sleep(SEND_WARN_INTERVAL) => {
                    warn!(address = %self.address(), elapsed = ?started.elapsed(), "head-channel send backpressured");
                }
            }
        }
    }
}

/// `loadTipSet`: for each block identifier, consult the cache first, else
/// fetch from the upstream; fetched in parallel, failing fast on any
/// block error.
#[async_trait::async_trait]
impl TipsetResolver for NodeAgent {
    async fn load_tipset(&self, key: &TipsetKey) -> anyhow::Result<Tipset> {
        let client = self
            .client
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow::anyhow!("agent {} has no connected client", self.address()))?;

        let fetches = key.cids().iter().map(|cid| {
            let client = client.clone();
            let cache = self.cache.clone();
            let cid = *cid;
            async move {
                if let Some(header) = cache.load(&cid) {
                    return Ok::<BlockHeader, anyhow::Error>(header);
                }
                let header = client.chain_get_block(&cid).await?;
                cache.insert(header.clone());
                Ok(header)
            }
        });

        let headers = futures::future::try_join_all(fetches).await?;
        Tipset::new(headers).ok_or_else(|| anyhow::anyhow!("inconsistent tipset for key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = MIN_BACKOFF;
        for _ in 0..10 {
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }

    #[test]
    fn backoff_sequence_doubles_with_each_attempt() {
        // attempts at t, t+4s, t+12s, t+28s, then every 32s.
        let mut backoff = MIN_BACKOFF;
        let mut elapsed = Duration::ZERO;
        let mut marks = vec![elapsed];
        for _ in 0..3 {
            elapsed += backoff;
            marks.push(elapsed);
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        assert_eq!(
            marks,
            vec![
                Duration::ZERO,
                Duration::from_secs(4),
                Duration::from_secs(12),
                Duration::from_secs(28),
            ]
        );
    }
}
