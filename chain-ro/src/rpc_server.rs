use std::collections::HashMap;
use std::sync::Arc;

use chain_ro_core::pubsub::chain_notify;
use chain_ro_core::{CoreError, UpstreamCallError};
use chain_ro_types::{BlockCid, BlockHeader, Priority, Tipset, TipsetKey};
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::{PendingSubscriptionSink, SubscriptionMessage};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::app::App;
use crate::error::Error;
use crate::token::AdminToken;

/// The public surface: the three operations the core subsystem backs
/// directly (`ChainHead`, `ChainNotify`, `ChainGetBlock`), plus a
/// representative slice of the mechanical pass-through set. The rest of
/// the Lotus read API follows the same `forward` pattern and is
/// intentionally not hand-enumerated here.
#[rpc(server)]
pub trait ChainRoApi {
    #[method(name = "Filecoin.ChainHead")]
    async fn chain_head(&self) -> RpcResult<Tipset>;

    #[method(name = "Filecoin.ChainGetBlock")]
    async fn chain_get_block(&self, cid: BlockCid) -> RpcResult<BlockHeader>;

    #[method(name = "Filecoin.ChainGetTipSet")]
    async fn chain_get_tip_set(&self, key: TipsetKey) -> RpcResult<Value>;

    #[method(name = "Filecoin.StateGetActor")]
    async fn state_get_actor(&self, address: String, key: TipsetKey) -> RpcResult<Value>;

    #[method(name = "Filecoin.GasEstimateMessageGas")]
    async fn gas_estimate_message_gas(&self, message: Value) -> RpcResult<Value>;

    #[method(name = "Filecoin.MpoolPush")]
    async fn mpool_push(&self, signed_message: Value) -> RpcResult<Value>;

    #[subscription(name = "Filecoin.ChainNotify", unsubscribe = "Filecoin.ChainNotifyUnsubscribe", item = Value)]
    async fn chain_notify_subscription(&self);
}

pub struct ChainRoApiImpl {
    app: Arc<App>,
}

impl ChainRoApiImpl {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    /// Dispatches a forwarded pass-through call to whichever upstream the
    /// selector currently favors: the selector picks an address, and the
    /// matching agent's RPC client handles the call.
    async fn forward(&self, method: &str, params: Value) -> Result<Value, Error> {
        let agent = self.app.pick_agent().await.map_err(Error::Core)?;
        let client = agent.client().await.ok_or_else(|| {
            Error::Upstream(UpstreamCallError::Transport(anyhow::anyhow!(
                "{} has no connected client",
                agent.address()
            )))
        })?;
        Ok(client.raw_call(method, params).await?)
    }
}

#[async_trait]
impl ChainRoApiServer for ChainRoApiImpl {
    async fn chain_head(&self) -> RpcResult<Tipset> {
        self.app
            .coordinator
            .head()
            .await
            .ok_or_else(|| Error::Core(CoreError::NoNodeAvailable).into())
    }

    async fn chain_get_block(&self, cid: BlockCid) -> RpcResult<BlockHeader> {
        if let Some(header) = self.app.cache.load(&cid) {
            return Ok(header);
        }
        let agent = self.app.pick_agent().await.map_err(Error::Core)?;
        let client = agent.client().await.ok_or_else(|| {
            Error::Upstream(UpstreamCallError::Transport(anyhow::anyhow!(
                "{} has no connected client",
                agent.address()
            )))
        })?;
        let header = client.chain_get_block(&cid).await.map_err(Error::Upstream)?;
        self.app.cache.insert(header.clone());
        Ok(header)
    }

    async fn chain_get_tip_set(&self, key: TipsetKey) -> RpcResult<Value> {
        Ok(self
            .forward("Filecoin.ChainGetTipSet", serde_json::json!([key]))
            .await?)
    }

    async fn state_get_actor(&self, address: String, key: TipsetKey) -> RpcResult<Value> {
        Ok(self
            .forward("Filecoin.StateGetActor", serde_json::json!([address, key]))
            .await?)
    }

    async fn gas_estimate_message_gas(&self, message: Value) -> RpcResult<Value> {
        Ok(self
            .forward("Filecoin.GasEstimateMessageGas", serde_json::json!([message]))
            .await?)
    }

    async fn mpool_push(&self, signed_message: Value) -> RpcResult<Value> {
        Ok(self
            .forward("Filecoin.MpoolPush", serde_json::json!([signed_message]))
            .await?)
    }

    /// Subscribes to the coordinator's head-change topic: synthesizes a
    /// `Current` event, then forwards `Apply`/`Revert` batches verbatim
    /// until the client disconnects or stalls past the forward timeout.
    async fn chain_notify_subscription(&self, pending: PendingSubscriptionSink) {
        let Ok(sink) = pending.accept().await else { return };

        let (tx, mut rx) = mpsc::channel(chain_ro_core::pubsub::SUBSCRIBER_BUFFER);
        let topic = self.app.topic.clone();
        let coordinator = self.app.coordinator.clone();
        tokio::spawn(async move {
            chain_notify(&topic, || async move { coordinator.head().await }, tx).await;
        });

        while let Some(batch) = rx.recv().await {
            let message = match SubscriptionMessage::from_json(&batch) {
                Ok(m) => m,
                Err(_) => break,
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    }
}

/// The admin surface: `SetWeight`, `ListWeight`, `ListPriority`, each
/// taking the bearer token as an explicit leading parameter rather than
/// an HTTP header — `jsonrpsee`'s plain `RpcModule` handlers don't see
/// request headers, so authentication is checked inside the handler
/// against the locally signed JWT (see `DESIGN.md`).
#[rpc(server)]
pub trait AdminApi {
    #[method(name = "SetWeight")]
    async fn set_weight(&self, token: String, address: String, weight: u32) -> RpcResult<()>;

    #[method(name = "ListWeight")]
    async fn list_weight(&self, token: String) -> RpcResult<HashMap<String, u32>>;

    #[method(name = "ListPriority")]
    async fn list_priority(&self, token: String) -> RpcResult<HashMap<String, Priority>>;
}

pub struct AdminApiImpl {
    app: Arc<App>,
    token: Arc<AdminToken>,
}

impl AdminApiImpl {
    pub fn new(app: Arc<App>, token: Arc<AdminToken>) -> Self {
        Self { app, token }
    }

    fn authorize(&self, presented: &str) -> Result<(), Error> {
        if self.token.validate(presented) {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }
}

#[async_trait]
impl AdminApiServer for AdminApiImpl {
    async fn set_weight(&self, token: String, address: String, weight: u32) -> RpcResult<()> {
        self.authorize(&token)?;
        self.app
            .selector
            .set_weight(&address, weight)
            .await
            .map_err(Error::Core)?;
        Ok(())
    }

    async fn list_weight(&self, token: String) -> RpcResult<HashMap<String, u32>> {
        self.authorize(&token)?;
        Ok(self.app.selector.list_weight().await)
    }

    async fn list_priority(&self, token: String) -> RpcResult<HashMap<String, Priority>> {
        self.authorize(&token)?;
        Ok(self.app.selector.list_priority().await)
    }
}
