use std::sync::Arc;
use std::time::Duration;

use chain_ro_types::HeadChange;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Per-subscriber buffer size.
pub const SUBSCRIBER_BUFFER: usize = 32;

/// Hard per-event forward timeout before a subscriber is dropped for
/// backpressure.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(60);

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<Vec<HeadChange>>,
}

/// The in-process head-change topic: one publisher (the coordinator), many
/// subscribers (client `ChainNotify` sessions). Uses per-subscriber `mpsc`
/// channels instead of a single `broadcast` so a slow subscriber can be
/// dropped individually rather than lagging (and corrupting the stream
/// position of) every other subscriber.
pub struct Topic {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: std::sync::atomic::AtomicU64,
}

/// A handle returned by `Topic::subscribe`. Dropping it (or calling
/// `unsubscribe`) removes the subscriber from the topic and drains any
/// messages still buffered in its channel, avoiding leaks on client
/// disconnect.
pub struct Subscription {
    id: u64,
    topic: Arc<Topic>,
    receiver: mpsc::Receiver<Vec<HeadChange>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Vec<HeadChange>> {
        self.receiver.recv().await
    }

    pub async fn unsubscribe(self) {
        self.topic.remove(self.id).await;
    }
}

impl Topic {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub async fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().await.push(Subscriber { id, sender });
        Subscription {
            id,
            topic: self.clone(),
            receiver,
        }
    }

    async fn remove(&self, id: u64) {
        let mut subs = self.subscribers.lock().await;
        subs.retain(|s| s.id != id);
    }

    /// Non-blocking send to every subscriber. Subscribers whose buffer is
    /// full are dropped rather than allowed to stall publication for the
    /// rest of the topic.
    pub async fn publish(&self, event: Vec<HeadChange>) {
        let mut subs = self.subscribers.lock().await;
        subs.retain(|sub| match sub.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber = sub.id, "head-change subscriber backpressured, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub async fn shutdown(&self) {
        self.subscribers.lock().await.clear();
    }
}

/// The client-facing `ChainNotify` wrapper: subscribes, immediately
/// synthesizes a `Current` event for the caller, then forwards subsequent
/// events verbatim with a hard per-event timeout.
///
/// `fetch_current_head` is called only after the subscription is in place,
/// so a head installed between the two can't be missed: it either lands in
/// `fetch_current_head`'s own read, or arrives as a subsequent `Apply` on
/// the subscription, never both and never neither.
pub async fn chain_notify<F, Fut>(
    topic: &Arc<Topic>,
    fetch_current_head: F,
    out: mpsc::Sender<Vec<HeadChange>>,
) where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Option<chain_ro_types::Tipset>>,
{
    let mut sub = topic.subscribe().await;

    let Some(current_head) = fetch_current_head().await else {
        sub.unsubscribe().await;
        return;
    };

    if out
        .send(vec![HeadChange::current(current_head)])
        .await
        .is_err()
    {
        sub.unsubscribe().await;
        return;
    }

    loop {
        let next = match sub.receiver.recv().await {
            Some(event) => event,
            None => break,
        };
        let forwarded = tokio::time::timeout(FORWARD_TIMEOUT, out.send(next)).await;
        match forwarded {
            Ok(Ok(())) => continue,
            Ok(Err(_)) => break, // client dropped its receiver
            Err(_) => {
                warn!("chain_notify subscriber stalled past the forward timeout, dropping");
                break;
            }
        }
    }
    sub.unsubscribe().await;
}
