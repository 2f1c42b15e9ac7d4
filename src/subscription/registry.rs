use super::dispatch::{handler, Dispatcher, Handler};
use super::protocol::{ControlFrame, InboundFrame, Payload};
use super::scope::Scope;
use crate::config::ClientConfig;
use crate::connection::{
    ConnectionManager, ConnectionState, FrameRouter, Transport, WebSocketTransport,
};
use anyhow::Result;
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Identity of one live subscription (several may share a topic)
pub type SubscriptionId = Uuid;

/// Per-subscription options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Never run two invocations of the handler at once; messages arriving
    /// while one is in flight are dropped, not queued.
    pub serialized: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self { serialized: true }
    }
}

impl SubscribeOptions {
    /// Every message starts its own handler invocation
    pub fn concurrent() -> Self {
        Self { serialized: false }
    }
}

struct Entry {
    topic: String,
    dispatcher: Dispatcher,
    /// Connection epoch in which the subscribe frame was last sent (0 = never)
    announced: AtomicU64,
}

impl Entry {
    /// Mark the entry announced for `epoch`. False if it already was.
    fn claim_announcement(&self, epoch: u64) -> bool {
        self.announced.swap(epoch, Ordering::AcqRel) != epoch
    }
}

/// Live subscriptions, shared between the registry and the connection task
#[derive(Default)]
struct SubscriptionSet {
    entries: DashMap<SubscriptionId, Entry>,
}

impl FrameRouter for SubscriptionSet {
    fn on_open(&self, epoch: u64) -> Vec<ControlFrame> {
        self.entries
            .iter()
            .filter(|entry| entry.claim_announcement(epoch))
            .map(|entry| ControlFrame::Subscribe(entry.topic.clone()))
            .collect()
    }

    fn route(&self, frame: InboundFrame) {
        let mut delivered = 0usize;
        for entry in self.entries.iter() {
            if frame.matches(&entry.topic) && entry.dispatcher.dispatch(frame.payload.clone()) {
                delivered += 1;
            }
        }

        if delivered == 0 {
            debug!(labels = ?frame.labels, "Inbound frame not delivered to any subscription");
        }
    }
}

struct Inner {
    connection: ConnectionManager,
    subscriptions: Arc<SubscriptionSet>,
    subscribe_retry: Duration,
}

impl Inner {
    /// Send the subscribe frame for `id` unless it already went out in `epoch`
    fn send_subscribe(&self, id: SubscriptionId, epoch: u64) {
        let frame = match self.subscriptions.entries.get(&id) {
            Some(entry) if entry.claim_announcement(epoch) => {
                ControlFrame::Subscribe(entry.topic.clone())
            }
            _ => return,
        };
        self.connection.send(&frame);
    }

    fn announce(self: &Arc<Self>, id: SubscriptionId) {
        let status = self.connection.status();
        match status.state {
            ConnectionState::Open => self.send_subscribe(id, status.epoch),
            ConnectionState::Connecting => {
                tokio::spawn(retry_until_open(Arc::downgrade(self), id));
            }
            ConnectionState::Disconnected | ConnectionState::Closing => {
                debug!(subscription_id = %id, "Connection down, subscribe deferred to replay");
            }
        }
    }
}

/// Re-attempt the subscribe frame while the connection is still connecting
async fn retry_until_open(inner: Weak<Inner>, id: SubscriptionId) {
    loop {
        let Some(delay) = inner.upgrade().map(|inner| inner.subscribe_retry) else {
            return;
        };
        tokio::time::sleep(delay).await;

        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.subscriptions.entries.contains_key(&id) {
            return;
        }

        let status = inner.connection.status();
        match status.state {
            ConnectionState::Open => {
                inner.send_subscribe(id, status.epoch);
                return;
            }
            ConnectionState::Connecting => {
                debug!(subscription_id = %id, "Still connecting, retrying subscribe");
            }
            ConnectionState::Disconnected | ConnectionState::Closing => return,
        }
    }
}

/// Registry of live subscriptions multiplexed over one shared connection
///
/// Cloning is cheap; all clones share the same connection and collection.
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<Inner>,
}

impl SubscriptionRegistry {
    /// Build a registry on top of `transport`. The connection is opened on
    /// the first subscribe.
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let subscriptions = Arc::new(SubscriptionSet::default());
        let router: Arc<dyn FrameRouter> = subscriptions.clone();
        let connection =
            ConnectionManager::new(endpoint, config.reconnect_delay(), transport, router);

        Ok(Self {
            inner: Arc::new(Inner {
                connection,
                subscriptions,
                subscribe_retry: config.subscribe_retry(),
            }),
        })
    }

    /// Registry over a real WebSocket connection
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let transport = Arc::new(WebSocketTransport::new(config.connect_timeout()));
        Self::new(config, transport)
    }

    /// Subscribe with default (serialized) options
    pub fn subscribe<F, Fut>(&self, topic: impl Into<String>, f: F) -> SubscriptionHandle
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe_with(topic, handler(f), SubscribeOptions::default())
    }

    pub fn subscribe_with(
        &self,
        topic: impl Into<String>,
        handler: Handler,
        options: SubscribeOptions,
    ) -> SubscriptionHandle {
        let topic = topic.into();
        let id = Uuid::now_v7();

        self.inner.subscriptions.entries.insert(
            id,
            Entry {
                topic: topic.clone(),
                dispatcher: Dispatcher::new(topic.clone(), handler, options.serialized),
                announced: AtomicU64::new(0),
            },
        );
        info!(topic = %topic, subscription_id = %id, serialized = options.serialized, "Subscribed");

        self.inner.connection.start();
        self.inner.announce(id);

        SubscriptionHandle {
            inner: Arc::new(HandleInner {
                id,
                topic,
                registry: Arc::downgrade(&self.inner),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe and close automatically when `scope` is torn down
    pub fn subscribe_in(
        &self,
        scope: &Scope,
        topic: impl Into<String>,
        handler: Handler,
        options: SubscribeOptions,
    ) -> SubscriptionHandle {
        let handle = self.subscribe_with(topic, handler, options);
        scope.adopt(handle.clone());
        handle
    }

    pub fn len(&self) -> usize {
        self.inner.subscriptions.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.subscriptions.entries.is_empty()
    }

    /// Topics of all live subscriptions (one per subscription, unordered)
    pub fn topics(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .entries
            .iter()
            .map(|entry| entry.topic.clone())
            .collect()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    /// Close the shared connection for good. Live subscriptions stay
    /// registered but receive nothing further.
    pub async fn shutdown(&self) {
        self.inner.connection.shutdown().await;
    }
}

struct HandleInner {
    id: SubscriptionId,
    topic: String,
    registry: Weak<Inner>,
    closed: AtomicBool,
}

/// Opaque handle used to close one subscription
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Remove the subscription and send a best-effort unsubscribe frame.
    ///
    /// Idempotent. An invocation already in flight runs to completion.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let Some(registry) = self.inner.registry.upgrade() else {
            return;
        };

        if registry.subscriptions.entries.remove(&self.inner.id).is_some() {
            info!(topic = %self.inner.topic, subscription_id = %self.inner.id, "Unsubscribed");
            registry
                .connection
                .send(&ControlFrame::Unsubscribe(self.inner.topic.clone()));
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.inner.id)
            .field("topic", &self.inner.topic)
            .field("closed", &self.is_closed())
            .finish()
    }
}
