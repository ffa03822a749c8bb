//! The upstream-facing JSON-RPC surface the core needs. Everything else
//! (the large pass-through method set) lives in the `chain-ro` binary and
//! is generated against this same client type.

use async_trait::async_trait;
use chain_ro_types::{BlockCid, BlockHeader, HeadChange, TipsetKey, Weight};
use jsonrpsee::{
    core::client::{ClientT, Subscription, SubscriptionClientT},
    http_client::{HttpClient, HttpClientBuilder},
    rpc_params,
};

use crate::error::UpstreamCallError;

/// The subset of the Lotus-style full-node API the core subsystem itself
/// calls. Mirrors `examples/chainflip-io-chainflip-backend`'s pattern of
/// implementing a small hand-written trait directly on `jsonrpsee`'s
/// generated client types (see `engine/chain-rpc/solana-rpc/src/jsonrpsee.rs`),
/// generalised here to an object-safe `#[async_trait]` so the agent can
/// hold `Box<dyn UpstreamRpc>`.
#[async_trait]
pub trait UpstreamRpc: Send + Sync {
    async fn chain_head(&self) -> anyhow::Result<Vec<BlockHeader>>;

    /// Fetches a single block header by its identifier. Returns the
    /// upstream's JSON-RPC error unchanged on failure, since this is also
    /// reachable directly from a client's own `ChainGetBlock` call and that
    /// error has to be forwarded verbatim.
    async fn chain_get_block(&self, cid: &BlockCid) -> Result<BlockHeader, UpstreamCallError>;

    async fn chain_tipset_weight(&self, key: &TipsetKey) -> anyhow::Result<Weight>;

    /// Opens the head-change subscription. Returns a boxed stream so the
    /// agent doesn't need to know the concrete `jsonrpsee` subscription
    /// type.
    async fn chain_notify(
        &self,
    ) -> anyhow::Result<Box<dyn futures::Stream<Item = Vec<HeadChange>> + Send + Unpin>>;

    /// Forwards an arbitrary method/params pair and returns the raw reply.
    /// Backs the server's pass-through surface: hand-writing every method
    /// in the upstream's read API one at a time doesn't scale, so this one
    /// generic call stands in for the rest of them. Preserves the
    /// upstream's own error object on failure rather than flattening it.
    async fn raw_call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, UpstreamCallError>;
}

/// A connected upstream client. `connect` is cheap and fallible the way
/// `jsonrpsee`'s HTTP client construction is cheap; the actual liveness
/// check happens on first use, the way `Ethereum::connect` verifies the
/// chain id right after building its `Web3<Http>` handle.
pub struct JsonRpcUpstream {
    client: HttpClient,
}

impl JsonRpcUpstream {
    pub async fn connect(url: &url::Url, bearer_token: &str) -> anyhow::Result<Self> {
        let client = HttpClientBuilder::default()
            .set_headers(bearer_header(bearer_token)?)
            .build(url.as_str())?;
        Ok(Self { client })
    }
}

fn bearer_header(token: &str) -> anyhow::Result<jsonrpsee::http_client::HeaderMap> {
    use jsonrpsee::http_client::{HeaderMap, HeaderValue};
    let mut headers = HeaderMap::new();
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {token}"))?,
    );
    Ok(headers)
}

#[async_trait]
impl UpstreamRpc for JsonRpcUpstream {
    async fn chain_head(&self) -> anyhow::Result<Vec<BlockHeader>> {
        Ok(self.client.request("Filecoin.ChainHead", rpc_params![]).await?)
    }

    async fn chain_get_block(&self, cid: &BlockCid) -> Result<BlockHeader, UpstreamCallError> {
        Ok(self
            .client
            .request("Filecoin.ChainGetBlock", rpc_params![cid])
            .await?)
    }

    async fn chain_tipset_weight(&self, key: &TipsetKey) -> anyhow::Result<Weight> {
        Ok(self
            .client
            .request("Filecoin.ChainTipSetWeight", rpc_params![key])
            .await?)
    }

    async fn chain_notify(
        &self,
    ) -> anyhow::Result<Box<dyn futures::Stream<Item = Vec<HeadChange>> + Send + Unpin>> {
        let sub: Subscription<Vec<HeadChange>> = self
            .client
            .subscribe(
                "Filecoin.ChainNotify",
                rpc_params![],
                "Filecoin.ChainNotifyUnsubscribe",
            )
            .await?;
        Ok(Box::new(SubscriptionStream(sub)))
    }

    async fn raw_call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, UpstreamCallError> {
        let values = match params {
            serde_json::Value::Array(values) => values,
            serde_json::Value::Null => Vec::new(),
            other => return Err(UpstreamCallError::Transport(anyhow::anyhow!("unsupported params shape for {method}: {other}"))),
        };
        let mut params = jsonrpsee::core::params::ArrayParams::new();
        for value in values {
            params.insert(value).map_err(|e| UpstreamCallError::Transport(e.into()))?;
        }
        Ok(self.client.request(method, params).await?)
    }
}

/// Adapts a `jsonrpsee` `Subscription` to a plain `futures::Stream`,
/// dropping per-item transport errors as end-of-stream (the agent's
/// reconnect loop treats stream closure uniformly regardless of cause).
struct SubscriptionStream<T>(Subscription<T>);

impl<T: serde::de::DeserializeOwned + Unpin> futures::Stream for SubscriptionStream<T> {
    type Item = T;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use futures::StreamExt;
        self.0.poll_next_unpin(cx).map(|opt| opt.and_then(Result::ok))
    }
}
