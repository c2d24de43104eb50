use {
    crate::{
        error::{Error, Result},
        rpc::IrnMetadata,
        storage::KeyValueStorage,
        store::Store,
        unix_now,
    },
    backoff::ExponentialBackoff,
    dashmap::DashMap,
    relay_client::{websocket, ConnectionOptions},
    relay_rpc::domain::{SubscriptionId, Topic},
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    std::{
        collections::{HashSet, VecDeque},
        sync::{Arc, Weak},
        time::Duration,
    },
    tokio::sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        Mutex,
    },
    tracing::{debug, warn},
};

const SUBSCRIPTION_STORE: &str = "subscription";
const MESSAGES_STORE: &str = "messages";

/// Deadline for individual relay RPCs (subscribe, unsubscribe, publish).
const RPC_TIMEOUT: Duration = Duration::from_secs(15);

/// Default retention for published messages.
pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// How long a seen message digest is remembered for de-duplication.
const DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Tags whose publishes are retried with exponential backoff until the TTL
/// deadline. The list mirrors the documented session-request tag; peers
/// emitting tags outside the documented table are tolerated and only
/// logged.
const CRITICAL_TAGS: &[u32] = &[1108];

/// A relay-assigned subscription bound to a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: SubscriptionId,
    pub topic: Topic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DedupRecord {
    digest: String,
    seen_at: u64,
}

/// A demultiplexed, de-duplicated inbound message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: Topic,
    pub message: Arc<str>,
    pub tag: u32,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

/// Publish options forwarded to the relay.
#[derive(Debug, Clone, Copy)]
pub struct PublishOptions {
    pub ttl: Duration,
    pub tag: u32,
    pub prompt: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            tag: 0,
            prompt: false,
        }
    }
}

impl From<&IrnMetadata> for PublishOptions {
    fn from(metadata: &IrnMetadata) -> Self {
        Self {
            ttl: Duration::from_secs(metadata.ttl),
            tag: metadata.tag,
            prompt: metadata.prompt,
        }
    }
}

enum TransportEvent {
    Connected,
    Disconnected,
    Message(websocket::PublishedMessage),
    InboundError(relay_client::ClientError),
    OutboundError(relay_client::ClientError),
}

/// Forwards [`websocket::ConnectionHandler`] callbacks into the relayer
/// event pump.
struct EventForwarder {
    tx: UnboundedSender<TransportEvent>,
}

impl websocket::ConnectionHandler for EventForwarder {
    fn connected(&mut self) {
        self.tx.send(TransportEvent::Connected).ok();
    }

    fn disconnected(&mut self, _frame: Option<websocket::CloseFrame<'static>>) {
        self.tx.send(TransportEvent::Disconnected).ok();
    }

    fn message_received(&mut self, message: websocket::PublishedMessage) {
        self.tx.send(TransportEvent::Message(message)).ok();
    }

    fn inbound_error(&mut self, error: relay_client::ClientError) {
        self.tx.send(TransportEvent::InboundError(error)).ok();
    }

    fn outbound_error(&mut self, error: relay_client::ClientError) {
        self.tx.send(TransportEvent::OutboundError(error)).ok();
    }
}

struct RelayerInner {
    client: websocket::Client,
    opts: ConnectionOptions,
    subscriptions: DashMap<Topic, SubscriptionRecord>,
    topics_by_subscription: DashMap<SubscriptionId, Topic>,
    subscription_store: Store<SubscriptionRecord>,
    dedup_store: Store<DedupRecord>,
    // Serializes connection attempts: concurrent `connect` calls while an
    // attempt is in flight await that attempt instead of racing a second
    // socket.
    connected: Mutex<bool>,
}

/// Topic-addressed messaging over the relay websocket.
///
/// Owns the subscription registry, demultiplexes inbound subscription
/// notifications, drops relay redeliveries, and drives reconnection (the
/// websocket client itself never reconnects).
#[derive(Clone)]
pub struct Relayer {
    inner: Arc<RelayerInner>,
}

impl Relayer {
    /// Creates the relayer and returns the inbound message stream along
    /// with it. The stream is consumed by a single reader to preserve
    /// per-topic ordering.
    pub fn new(
        opts: ConnectionOptions,
        storage: Arc<dyn KeyValueStorage>,
    ) -> Result<(Self, UnboundedReceiver<InboundMessage>)> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        let client = websocket::Client::new(EventForwarder { tx: event_tx });

        let subscription_store: Store<SubscriptionRecord> =
            Store::new(SUBSCRIPTION_STORE, storage.clone());
        let dedup_store: Store<DedupRecord> = Store::new(MESSAGES_STORE, storage);

        // Rehydrate the subscription index; the topics are re-established on
        // the next connect.
        let subscriptions = DashMap::new();
        let topics_by_subscription = DashMap::new();
        for record in subscription_store.values()? {
            topics_by_subscription.insert(record.id.clone(), record.topic.clone());
            subscriptions.insert(record.topic.clone(), record);
        }

        // Rehydrate the dedup cache, dropping entries that fell out of the
        // window while we were offline.
        let mut dedup = DedupCache::new(DEDUP_WINDOW);
        let now = unix_now();
        for record in dedup_store.values()? {
            if now.saturating_sub(record.seen_at) < DEDUP_WINDOW.as_secs() {
                dedup.insert(record.digest, record.seen_at);
            } else {
                dedup_store.delete(&record.digest, "dedup window elapsed").ok();
            }
        }

        let inner = Arc::new(RelayerInner {
            client,
            opts,
            subscriptions,
            topics_by_subscription,
            subscription_store,
            dedup_store,
            connected: Mutex::new(false),
        });

        tokio::spawn(event_loop(Arc::downgrade(&inner), event_rx, message_tx, dedup));

        Ok((Self { inner }, message_rx))
    }

    /// Opens the relay connection and re-establishes all known
    /// subscriptions. Concurrent calls share the in-flight attempt.
    pub async fn connect(&self) -> Result<()> {
        connect_inner(&self.inner).await
    }

    /// Publishes a message, resolving once the relay acknowledges it.
    ///
    /// Publishes tagged as critical are retried with exponential backoff up
    /// to the TTL deadline; everything else surfaces the first error to the
    /// caller.
    pub async fn publish(
        &self,
        topic: Topic,
        message: impl Into<Arc<str>>,
        opts: PublishOptions,
    ) -> Result<()> {
        let message: Arc<str> = message.into();

        if !CRITICAL_TAGS.contains(&opts.tag) {
            return self.publish_once(topic, message, opts).await;
        }

        let strategy = ExponentialBackoff {
            max_elapsed_time: Some(opts.ttl),
            ..ExponentialBackoff::default()
        };

        backoff::future::retry(strategy, || {
            let topic = topic.clone();
            let message = message.clone();

            async move {
                self.publish_once(topic, message, opts)
                    .await
                    .map_err(|err| match err {
                        retryable @ (Error::TransportUnavailable(_) | Error::Timeout) => {
                            warn!("retrying critical publish (tag={}): {retryable}", opts.tag);
                            backoff::Error::transient(retryable)
                        }

                        other => backoff::Error::permanent(other),
                    })
            }
        })
        .await
    }

    async fn publish_once(
        &self,
        topic: Topic,
        message: Arc<str>,
        opts: PublishOptions,
    ) -> Result<()> {
        let publish = self
            .inner
            .client
            .publish(topic, message, opts.tag, opts.ttl, opts.prompt);

        tokio::time::timeout(RPC_TIMEOUT, publish)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::from)
    }

    /// Subscribes to a topic and records the relay-assigned subscription ID.
    pub async fn subscribe(&self, topic: Topic) -> Result<SubscriptionId> {
        let subscribe = self.inner.client.subscribe(topic.clone());

        let id = tokio::time::timeout(RPC_TIMEOUT, subscribe)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::from)?;

        self.register_subscription(topic, id.clone())?;

        Ok(id)
    }

    /// Unsubscribes from a topic. A no-op when the topic is not subscribed.
    pub async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        let Some((_, record)) = self.inner.subscriptions.remove(topic) else {
            return Ok(());
        };

        self.inner.topics_by_subscription.remove(&record.id);
        if self.inner.subscription_store.contains(topic.as_ref())? {
            self.inner
                .subscription_store
                .delete(topic.as_ref(), "unsubscribed")?;
        }

        let unsubscribe = self.inner.client.unsubscribe(topic.clone(), record.id);

        tokio::time::timeout(RPC_TIMEOUT, unsubscribe)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::from)
    }

    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.inner.subscriptions.contains_key(topic)
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionRecord> {
        self.inner
            .subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn register_subscription(&self, topic: Topic, id: SubscriptionId) -> Result<()> {
        // A resubscribe gets a fresh ID; the stale index entry has to go.
        if let Some(previous) = self.inner.subscriptions.get(&topic) {
            self.inner.topics_by_subscription.remove(&previous.id);
        }

        let record = SubscriptionRecord {
            id: id.clone(),
            topic: topic.clone(),
        };

        self.inner
            .subscription_store
            .set(topic.as_ref(), &record)?;
        self.inner.topics_by_subscription.insert(id, topic.clone());
        self.inner.subscriptions.insert(topic, record);

        Ok(())
    }
}

async fn connect_inner(inner: &Arc<RelayerInner>) -> Result<()> {
    {
        let mut connected = inner.connected.lock().await;

        if *connected {
            return Ok(());
        }

        inner.client.connect(&inner.opts).await?;
        *connected = true;
    }

    resubscribe_all(inner).await
}

/// Re-establishes every registered topic. Subscription IDs are fresh on
/// every (re)connect.
async fn resubscribe_all(inner: &Arc<RelayerInner>) -> Result<()> {
    let topics: Vec<Topic> = inner
        .subscriptions
        .iter()
        .map(|entry| entry.key().clone())
        .collect();

    for topic in topics {
        let subscribe = inner.client.subscribe(topic.clone());

        let id = tokio::time::timeout(RPC_TIMEOUT, subscribe)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::from)?;

        let relayer = Relayer {
            inner: inner.clone(),
        };
        relayer.register_subscription(topic, id)?;
    }

    Ok(())
}

async fn reconnect(inner: &Weak<RelayerInner>) {
    let strategy = ExponentialBackoff {
        max_elapsed_time: None,
        max_interval: Duration::from_secs(30),
        ..ExponentialBackoff::default()
    };

    let result = backoff::future::retry(strategy, || async {
        let Some(inner) = inner.upgrade() else {
            return Err(backoff::Error::permanent(Error::ChannelClosed));
        };

        connect_inner(&inner).await.map_err(|err| {
            debug!("reconnect attempt failed: {err}");
            backoff::Error::transient(err)
        })
    })
    .await;

    if let Err(err) = result {
        warn!("giving up on reconnect: {err}");
    }
}

async fn event_loop(
    inner: Weak<RelayerInner>,
    mut events: UnboundedReceiver<TransportEvent>,
    message_tx: UnboundedSender<InboundMessage>,
    mut dedup: DedupCache,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => {
                debug!("relay connection established");
            }

            TransportEvent::Disconnected => {
                let Some(strong) = inner.upgrade() else { break };

                *strong.connected.lock().await = false;
                warn!("relay connection closed, reconnecting");
                drop(strong);

                reconnect(&inner).await;
            }

            TransportEvent::Message(message) => {
                let Some(strong) = inner.upgrade() else { break };

                handle_message(&strong, message, &message_tx, &mut dedup);
            }

            TransportEvent::InboundError(error) => {
                debug!("inbound transport error: {error}");
            }

            TransportEvent::OutboundError(error) => {
                debug!("outbound transport error: {error}");
            }
        }
    }
}

fn handle_message(
    inner: &Arc<RelayerInner>,
    message: websocket::PublishedMessage,
    message_tx: &UnboundedSender<InboundMessage>,
    dedup: &mut DedupCache,
) {
    // Demux: the subscription ID must be known and bound to this topic.
    let Some(expected_topic) = inner
        .topics_by_subscription
        .get(&message.subscription_id)
        .map(|entry| entry.value().clone())
    else {
        warn!(
            "dropping message for unknown subscription {}",
            message.subscription_id
        );
        return;
    };

    if expected_topic != message.topic {
        warn!(
            "dropping message with mismatched topic: expected {expected_topic}, got {}",
            message.topic
        );
        return;
    }

    // The relay redelivers messages after reconnects; identical payloads
    // within the window are dropped.
    let digest = message_digest(&message.topic, &message.message);
    let now = unix_now();

    if !dedup.insert(digest.clone(), now) {
        debug!("dropping duplicate message on {}", message.topic);
        return;
    }

    for evicted in dedup.prune(now) {
        inner
            .dedup_store
            .delete(&evicted, "dedup window elapsed")
            .ok();
    }
    inner
        .dedup_store
        .set(
            &digest,
            &DedupRecord {
                digest: digest.clone(),
                seen_at: now,
            },
        )
        .ok();

    message_tx
        .send(InboundMessage {
            topic: message.topic,
            message: message.message,
            tag: message.tag,
            published_at: message.published_at,
        })
        .ok();
}

fn message_digest(topic: &Topic, message: &str) -> String {
    let digest = Sha256::new().chain_update(message.as_bytes()).finalize();

    format!("{topic}:{digest:x}")
}

/// Bounded window of recently seen message digests.
struct DedupCache {
    window: Duration,
    seen: HashSet<String>,
    order: VecDeque<(u64, String)>,
}

impl DedupCache {
    fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Records a digest. Returns `false` when it was already seen inside
    /// the window.
    fn insert(&mut self, digest: String, now: u64) -> bool {
        if !self.seen.insert(digest.clone()) {
            return false;
        }

        self.order.push_back((now, digest));

        true
    }

    /// Evicts digests that fell out of the window, returning them.
    fn prune(&mut self, now: u64) -> Vec<String> {
        let mut evicted = Vec::new();

        while let Some((seen_at, _)) = self.order.front() {
            if now.saturating_sub(*seen_at) < self.window.as_secs() {
                break;
            }

            if let Some((_, digest)) = self.order.pop_front() {
                self.seen.remove(&digest);
                evicted.push(digest);
            }
        }

        evicted
    }
}
