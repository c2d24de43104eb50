//! URI-initiated symmetric-key bootstrap and the pairing control plane.

pub mod uri;

pub use uri::PairingUri;

use {
    crate::{
        crypto::{payload::SYM_KEY_LENGTH, Keychain},
        error::{Error, Result},
        expirer::{Expirer, ExpirerEvent, ExpiryTarget},
        message_handler::{HandlerToken, MessageHandler, RequestContext, ResponseContext},
        relayer::Relayer,
        rpc::{
            Metadata, PairDeleteRequest, PairPingRequest, RelayProtocol, RequestParams,
            ResponseParamsError, ResponseParamsSuccess, ErrorParams, METHOD_PAIRING_DELETE,
            METHOD_PAIRING_PING,
        },
        storage::KeyValueStorage,
        store::Store,
        unix_now,
    },
    rand::RngCore,
    relay_rpc::domain::{MessageId, Topic},
    serde::{Deserialize, Serialize},
    serde_json::json,
    std::{
        collections::HashSet,
        sync::{Arc, Mutex, RwLock},
    },
    tokio::{sync::broadcast, task::JoinHandle},
    tracing::{debug, warn},
};

const PAIRING_STORE: &str = "pairing";
const EVENT_CHANNEL_SIZE: usize = 64;

/// Expiry of a pairing that has not seen a successful exchange yet.
pub const INACTIVE_PAIRING_TTL: u64 = 5 * 60;

/// Expiry of an activated pairing.
pub const ACTIVE_PAIRING_TTL: u64 = 30 * 24 * 60 * 60;

/// A live pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRecord {
    pub topic: Topic,
    pub relay: RelayProtocol,
    pub expiry: u64,
    pub active: bool,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub peer_metadata: Option<Metadata>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub self_metadata: Option<Metadata>,
}

impl PairingRecord {
    fn is_expired(&self) -> bool {
        self.expiry <= unix_now()
    }
}

/// Pairing lifecycle notifications.
#[derive(Debug, Clone)]
pub enum PairingEvent {
    /// A ping completed: on the requesting side when the peer acknowledged,
    /// on the receiving side when a valid ping was answered.
    Pinged { topic: Topic, id: MessageId },

    /// The pairing was deleted, locally or by the peer.
    Deleted { topic: Topic },

    /// The pairing reached its expiry and was torn down.
    Expired { topic: Topic },
}

/// The pairing state machine and control plane.
///
/// Pairings start inactive with a five-minute window, become active on
/// [`PairingManager::activate`], and end terminally by disconnect, peer
/// delete or expiry. Teardown is idempotent.
pub struct PairingManager {
    store: Store<PairingRecord>,
    keychain: Arc<Keychain>,
    relayer: Relayer,
    handler: MessageHandler,
    expirer: Arc<Expirer>,
    events: broadcast::Sender<PairingEvent>,
    methods: RwLock<HashSet<String>>,
    tokens: Mutex<Vec<HandlerToken>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl PairingManager {
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        keychain: Arc<Keychain>,
        relayer: Relayer,
        handler: MessageHandler,
        expirer: Arc<Expirer>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        let manager = Arc::new(Self {
            store: Store::new(PAIRING_STORE, storage),
            keychain,
            relayer,
            handler,
            expirer,
            events,
            methods: RwLock::new(HashSet::new()),
            tokens: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
        });

        manager.register_rpc_handlers();
        manager.spawn_expiry_listener();

        manager
    }

    /// Creates a new pairing: random symmetric key, derived topic, inactive
    /// record, relay subscription. Returns the topic and the URI to hand to
    /// the peer.
    pub async fn create(&self) -> Result<(Topic, String)> {
        let mut sym_key = [0u8; SYM_KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut sym_key);

        let topic = self.keychain.set_sym_key(sym_key)?;
        let record = PairingRecord {
            topic: topic.clone(),
            relay: RelayProtocol::default(),
            expiry: unix_now() + INACTIVE_PAIRING_TTL,
            active: false,
            peer_metadata: None,
            self_metadata: None,
        };

        self.store.create(topic.as_ref(), &record)?;
        self.expirer
            .set(ExpiryTarget::Topic(topic.clone()), record.expiry)?;

        if let Err(err) = self.relayer.subscribe(topic.clone()).await {
            self.delete_pairing(&topic).await.ok();
            return Err(err);
        }

        let uri = PairingUri::new(topic.clone(), sym_key, record.relay).to_string();

        Ok((topic, uri))
    }

    /// Adopts a pairing proposed through a URI.
    ///
    /// Fails with [`Error::AlreadyExists`] when the topic is already
    /// tracked; in that case no state is created or modified.
    pub async fn pair(&self, uri: &str, activate: bool) -> Result<PairingRecord> {
        let parsed: PairingUri = uri.parse()?;
        let topic = parsed.topic.clone();

        if self.store.contains(topic.as_ref())? || self.keychain.has_keys(topic.as_ref()) {
            return Err(Error::AlreadyExists(topic.to_string()));
        }

        self.keychain
            .set_sym_key_for_topic(parsed.params.sym_key, &topic)?;

        let record = PairingRecord {
            topic: topic.clone(),
            relay: parsed.params.relay,
            expiry: unix_now() + INACTIVE_PAIRING_TTL,
            active: false,
            peer_metadata: None,
            self_metadata: None,
        };

        self.store.set(topic.as_ref(), &record)?;
        self.expirer
            .set(ExpiryTarget::Topic(topic.clone()), record.expiry)?;

        if let Err(err) = self.relayer.subscribe(topic.clone()).await {
            // Roll back so a failed pair leaves no trace.
            self.delete_pairing(&topic).await.ok();
            return Err(err);
        }

        if activate {
            return self.activate(&topic);
        }

        Ok(record)
    }

    /// Marks the pairing active and extends its expiry to the 30-day
    /// window.
    pub fn activate(&self, topic: &Topic) -> Result<PairingRecord> {
        let expiry = unix_now() + ACTIVE_PAIRING_TTL;

        let record = self
            .store
            .update(topic.as_ref(), json!({ "active": true, "expiry": expiry }))?;
        self.expirer
            .set(ExpiryTarget::Topic(topic.clone()), expiry)?;

        Ok(record)
    }

    /// Overrides the pairing expiry. The value is clamped between now and
    /// the 30-day ceiling.
    pub fn update_expiry(&self, topic: &Topic, expiry: u64) -> Result<PairingRecord> {
        let now = unix_now();
        let expiry = expiry.clamp(now, now + ACTIVE_PAIRING_TTL);

        let record = self.store.update(topic.as_ref(), json!({ "expiry": expiry }))?;
        self.expirer
            .set(ExpiryTarget::Topic(topic.clone()), expiry)?;

        Ok(record)
    }

    /// Updates the peer metadata of the pairing.
    pub fn update_metadata(&self, topic: &Topic, metadata: Metadata) -> Result<PairingRecord> {
        self.store
            .update(topic.as_ref(), json!({ "peerMetadata": metadata }))
    }

    pub fn get(&self, topic: &Topic) -> Result<PairingRecord> {
        self.store.get(topic.as_ref())
    }

    pub fn pairings(&self) -> Result<Vec<PairingRecord>> {
        self.store.values()
    }

    /// Records method names this client accepts on pairing topics. The
    /// outer clients (Sign, Auth) call this before registering their
    /// handlers.
    pub fn register(&self, methods: &[&str]) {
        if let Ok(mut registered) = self.methods.write() {
            for method in methods {
                registered.insert((*method).to_owned());
            }
        }
    }

    pub fn registered_methods(&self) -> Vec<String> {
        self.methods
            .read()
            .map(|methods| methods.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Pings the peer over the pairing topic. Resolves once the peer
    /// acknowledges; valid only on an active pairing.
    pub async fn ping(&self, topic: &Topic) -> Result<MessageId> {
        let record = self.checked_record(topic).await?;

        if !record.active {
            return Err(Error::PairingInactive(topic.clone()));
        }

        let (id, acknowledged): (MessageId, bool) = self
            .handler
            .request(topic, RequestParams::PairPing(PairPingRequest {}))
            .await?;

        if !acknowledged {
            return Err(Error::Rpc {
                code: 0,
                message: "peer rejected the ping".to_owned(),
            });
        }

        self.events
            .send(PairingEvent::Pinged {
                topic: topic.clone(),
                id,
            })
            .ok();

        Ok(id)
    }

    /// Tears down the pairing after notifying the peer with a best-effort
    /// `wc_pairingDelete`.
    pub async fn disconnect(&self, topic: &Topic) -> Result<()> {
        self.checked_record(topic).await?;

        let params = RequestParams::PairDelete(PairDeleteRequest::user_disconnected());
        match self.handler.send_request(topic, params).await {
            // The response is not awaited; dropping the receiver clears the
            // pending entry.
            Ok((id, _receiver)) => debug!("pairing delete {id} published for {topic}"),
            Err(err) => warn!("pairing delete publish failed for {topic}: {err}"),
        }

        self.delete_pairing(topic).await?;
        self.events
            .send(PairingEvent::Deleted {
                topic: topic.clone(),
            })
            .ok();

        Ok(())
    }

    /// Stops inbound dispatch and event emission for this manager. No
    /// events are emitted after this returns.
    pub fn shutdown(&self) {
        if let Ok(mut tokens) = self.tokens.lock() {
            for token in tokens.drain(..) {
                token.dispose();
            }
        }

        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PairingEvent> {
        self.events.subscribe()
    }

    /// Loads the record, tearing the pairing down first when it is already
    /// past its expiry.
    async fn checked_record(&self, topic: &Topic) -> Result<PairingRecord> {
        let record = self.store.get(topic.as_ref())?;

        if record.is_expired() {
            self.delete_pairing(topic).await?;
            self.events
                .send(PairingEvent::Expired {
                    topic: topic.clone(),
                })
                .ok();

            return Err(Error::Expired(topic.clone()));
        }

        Ok(record)
    }

    /// Idempotent teardown: relay subscription, stored record, symmetric
    /// key and scheduled expiry. Each step is presence-guarded, so partial
    /// state (from a failed create/pair) and double deletes are fine.
    pub(crate) async fn delete_pairing(&self, topic: &Topic) -> Result<()> {
        if let Err(err) = self.relayer.unsubscribe(topic).await {
            warn!("unsubscribe failed during teardown of {topic}: {err}");
        }

        if self.store.contains(topic.as_ref())? {
            self.store.delete(topic.as_ref(), "pairing deleted")?;
        }

        self.keychain.delete_sym_key(topic)?;
        self.expirer.delete(&ExpiryTarget::Topic(topic.clone()))?;

        Ok(())
    }

    fn register_rpc_handlers(self: &Arc<Self>) {
        let mut tokens = Vec::new();

        let manager = Arc::downgrade(self);
        tokens.push(self.handler.handle_message_type(
            METHOD_PAIRING_PING,
            move |ctx: RequestContext, _request: PairPingRequest| {
                let manager = manager.clone();
                async move {
                    if let Some(manager) = manager.upgrade() {
                        manager.on_ping(ctx).await;
                    }
                }
            },
            |ctx: ResponseContext, result: std::result::Result<bool, ErrorParams>| async move {
                match result {
                    Ok(ack) => debug!("ping {} acknowledged by peer: {ack}", ctx.id),
                    Err(err) => debug!("ping {} rejected by peer: {}", ctx.id, err.message),
                }
            },
        ));

        let manager = Arc::downgrade(self);
        tokens.push(self.handler.handle_message_type(
            METHOD_PAIRING_DELETE,
            move |ctx: RequestContext, request: PairDeleteRequest| {
                let manager = manager.clone();
                async move {
                    if let Some(manager) = manager.upgrade() {
                        manager.on_delete(ctx, request).await;
                    }
                }
            },
            |ctx: ResponseContext, result: std::result::Result<bool, ErrorParams>| async move {
                match result {
                    Ok(_) => debug!("peer acknowledged pairing delete {}", ctx.id),
                    Err(err) => {
                        debug!("pairing delete {} not acknowledged: {}", ctx.id, err.message)
                    }
                }
            },
        ));

        if let Ok(mut slot) = self.tokens.lock() {
            *slot = tokens;
        }
    }

    fn spawn_expiry_listener(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        let mut events = self.expirer.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("expiry listener lagged, skipped {skipped} events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let ExpirerEvent::Expired(ExpiryTarget::Topic(topic)) = event else {
                    continue;
                };

                let Some(manager) = manager.upgrade() else { break };

                if manager.store.contains(topic.as_ref()).unwrap_or(false) {
                    if let Err(err) = manager.delete_pairing(&topic).await {
                        warn!("teardown of expired pairing {topic} failed: {err}");
                    }
                    manager.events.send(PairingEvent::Expired { topic }).ok();
                }
            }
        });

        if let Ok(mut listener) = self.listener.lock() {
            *listener = Some(handle);
        }
    }

    async fn on_ping(&self, ctx: RequestContext) {
        let known = self
            .store
            .try_get(ctx.topic.as_ref())
            .ok()
            .flatten()
            .map(|record| !record.is_expired())
            .unwrap_or(false);

        if !known {
            self.handler
                .respond_error(
                    ctx.id,
                    &ctx.topic,
                    ResponseParamsError::PairPing(ErrorParams::no_matching_topic(&ctx.topic)),
                )
                .await
                .ok();
            return;
        }

        if let Err(err) = self
            .handler
            .respond(ctx.id, &ctx.topic, ResponseParamsSuccess::PairPing(true))
            .await
        {
            warn!("failed to acknowledge ping on {}: {err}", ctx.topic);
            return;
        }

        self.events
            .send(PairingEvent::Pinged {
                topic: ctx.topic,
                id: ctx.id,
            })
            .ok();
    }

    async fn on_delete(&self, ctx: RequestContext, request: PairDeleteRequest) {
        debug!(
            "peer delete on {} (code={}): {}",
            ctx.topic, request.code, request.message
        );

        if !self.store.contains(ctx.topic.as_ref()).unwrap_or(false) {
            self.handler
                .respond_error(
                    ctx.id,
                    &ctx.topic,
                    ResponseParamsError::PairDelete(ErrorParams::no_matching_topic(&ctx.topic)),
                )
                .await
                .ok();
            return;
        }

        // Acknowledge first: teardown removes the key needed to encrypt the
        // reply.
        self.handler
            .respond(ctx.id, &ctx.topic, ResponseParamsSuccess::PairDelete(true))
            .await
            .ok();

        if let Err(err) = self.delete_pairing(&ctx.topic).await {
            warn!("teardown after peer delete of {} failed: {err}", ctx.topic);
        }

        self.events
            .send(PairingEvent::Deleted { topic: ctx.topic })
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_record_serde() {
        let record = PairingRecord {
            topic: Topic::generate(),
            relay: RelayProtocol::default(),
            expiry: 1700000300,
            active: false,
            peer_metadata: None,
            self_metadata: None,
        };

        let serialized = serde_json::to_value(&record).unwrap();

        assert_eq!(serialized.get("active"), Some(&serde_json::json!(false)));
        assert_eq!(
            serialized.get("expiry"),
            Some(&serde_json::json!(1700000300))
        );
        // Absent metadata is omitted entirely.
        assert!(serialized.get("peerMetadata").is_none());

        let roundtrip: PairingRecord = serde_json::from_value(serialized).unwrap();
        assert_eq!(roundtrip, record);
    }

    #[test]
    fn expired_when_expiry_equals_now() {
        let record = PairingRecord {
            topic: Topic::generate(),
            relay: RelayProtocol::default(),
            expiry: unix_now(),
            active: true,
            peer_metadata: None,
            self_metadata: None,
        };

        assert!(record.is_expired());
    }
}
