use {
    crate::{
        error::{Error, Result},
        storage::KeyValueStorage,
        store::Store,
        unix_now,
    },
    dashmap::DashMap,
    relay_rpc::domain::{MessageId, Topic},
    serde::{Deserialize, Serialize},
    std::{cmp::Reverse, collections::BinaryHeap, fmt, sync::Arc, time::Duration},
    tokio::sync::{broadcast, mpsc},
    tracing::debug,
};

const EXPIRER_STORE: &str = "expirer";
const EVENT_CHANNEL_SIZE: usize = 64;

/// Idle sleep when no expiry is scheduled.
const IDLE_DELAY: Duration = Duration::from_secs(60 * 60);

/// What a scheduled expiry refers to: a topic, or a request ID rendered as
/// `id:<number>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExpiryTarget {
    Topic(Topic),
    Request(MessageId),
}

impl fmt::Display for ExpiryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic(topic) => write!(f, "{topic}"),
            Self::Request(id) => write!(f, "id:{id}"),
        }
    }
}

impl ExpiryTarget {
    fn parse(value: &str) -> Self {
        match value.strip_prefix("id:").and_then(|id| id.parse().ok()) {
            Some(id) => Self::Request(MessageId::new(id)),
            None => Self::Topic(Topic::from(value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryEntry {
    pub target: String,
    pub expiry: u64,
}

#[derive(Debug, Clone)]
pub enum ExpirerEvent {
    /// Emitted exactly once per tracked target when its expiry is reached.
    Expired(ExpiryTarget),
}

enum ExpirerControl {
    Schedule { target: String, expiry: u64 },
}

/// Time-indexed set of topics and request IDs, firing [`ExpirerEvent`]s when
/// entries fall due.
///
/// Entries persist through the store, so pending expirations survive a
/// restart and are rearmed on [`Expirer::new`].
pub struct Expirer {
    entries: Arc<DashMap<String, u64>>,
    store: Store<ExpiryEntry>,
    control_tx: mpsc::UnboundedSender<ExpirerControl>,
    event_tx: broadcast::Sender<ExpirerEvent>,
}

impl Expirer {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Result<Self> {
        let store: Store<ExpiryEntry> = Store::new(EXPIRER_STORE, storage);
        let entries = Arc::new(DashMap::new());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        let mut heap = BinaryHeap::new();
        for record in store.values()? {
            entries.insert(record.target.clone(), record.expiry);
            heap.push(Reverse((record.expiry, record.target)));
        }

        tokio::spawn(expiry_loop(
            heap,
            control_rx,
            entries.clone(),
            store.clone(),
            event_tx.clone(),
        ));

        Ok(Self {
            entries,
            store,
            control_tx,
            event_tx,
        })
    }

    /// Schedules the expiry for a target, replacing any prior schedule.
    pub fn set(&self, target: ExpiryTarget, expiry: u64) -> Result<()> {
        let key = target.to_string();

        self.store.set(
            &key,
            &ExpiryEntry {
                target: key.clone(),
                expiry,
            },
        )?;
        self.entries.insert(key.clone(), expiry);

        self.control_tx
            .send(ExpirerControl::Schedule {
                target: key,
                expiry,
            })
            .map_err(|_| Error::ChannelClosed)
    }

    pub fn has(&self, target: &ExpiryTarget) -> bool {
        self.entries.contains_key(&target.to_string())
    }

    pub fn get(&self, target: &ExpiryTarget) -> Option<u64> {
        self.entries.get(&target.to_string()).map(|entry| *entry)
    }

    /// Cancels the scheduled expiry. Idempotent.
    pub fn delete(&self, target: &ExpiryTarget) -> Result<()> {
        let key = target.to_string();

        if self.entries.remove(&key).is_some() {
            self.store.delete(&key, "expiry cancelled")?;
        }

        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExpirerEvent> {
        self.event_tx.subscribe()
    }
}

async fn expiry_loop(
    mut heap: BinaryHeap<Reverse<(u64, String)>>,
    mut control_rx: mpsc::UnboundedReceiver<ExpirerControl>,
    entries: Arc<DashMap<String, u64>>,
    store: Store<ExpiryEntry>,
    event_tx: broadcast::Sender<ExpirerEvent>,
) {
    loop {
        let now = unix_now();

        // Fire everything due. Heap entries whose schedule was replaced or
        // cancelled after they were pushed are skipped lazily.
        while let Some(Reverse((expiry, _))) = heap.peek() {
            if *expiry > now {
                break;
            }

            let Some(Reverse((expiry, target))) = heap.pop() else {
                break;
            };

            if entries.get(&target).map(|entry| *entry) != Some(expiry) {
                continue;
            }

            entries.remove(&target);
            store.delete(&target, "expired").ok();

            debug!("expired: {target}");
            event_tx
                .send(ExpirerEvent::Expired(ExpiryTarget::parse(&target)))
                .ok();
        }

        let delay = heap
            .peek()
            .map(|Reverse((expiry, _))| Duration::from_secs(expiry.saturating_sub(now)))
            .unwrap_or(IDLE_DELAY);

        tokio::select! {
            control = control_rx.recv() => match control {
                Some(ExpirerControl::Schedule { target, expiry }) => {
                    heap.push(Reverse((expiry, target)));
                }

                // All expirer handles dropped, shutting down.
                None => break,
            },

            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::storage::MemoryKvStorage, anyhow::Result, tokio::time::timeout};

    const RECV_DEADLINE: Duration = Duration::from_secs(3);

    fn topic_target(topic: &Topic) -> ExpiryTarget {
        ExpiryTarget::Topic(topic.clone())
    }

    #[test]
    fn target_rendering() {
        let topic = Topic::generate();

        assert_eq!(
            ExpiryTarget::Topic(topic.clone()).to_string(),
            topic.to_string()
        );
        assert_eq!(
            ExpiryTarget::Request(MessageId::new(42)).to_string(),
            "id:42"
        );

        assert_eq!(
            ExpiryTarget::parse("id:42"),
            ExpiryTarget::Request(MessageId::new(42))
        );
        assert_eq!(
            ExpiryTarget::parse(topic.as_ref()),
            ExpiryTarget::Topic(topic)
        );
    }

    #[tokio::test]
    async fn fires_due_entries() -> Result<()> {
        let expirer = Expirer::new(Arc::new(MemoryKvStorage::new()))?;
        let mut events = expirer.subscribe();

        let topic = Topic::generate();
        expirer.set(topic_target(&topic), unix_now() + 1)?;
        assert!(expirer.has(&topic_target(&topic)));

        let ExpirerEvent::Expired(target) = timeout(RECV_DEADLINE, events.recv()).await??;

        assert_eq!(target, topic_target(&topic));
        assert!(!expirer.has(&topic_target(&topic)));

        Ok(())
    }

    #[tokio::test]
    async fn expiry_equal_to_now_is_due() -> Result<()> {
        let expirer = Expirer::new(Arc::new(MemoryKvStorage::new()))?;
        let mut events = expirer.subscribe();

        let topic = Topic::generate();
        expirer.set(topic_target(&topic), unix_now())?;

        let ExpirerEvent::Expired(target) = timeout(RECV_DEADLINE, events.recv()).await??;
        assert_eq!(target, topic_target(&topic));

        Ok(())
    }

    #[tokio::test]
    async fn delete_cancels() -> Result<()> {
        let expirer = Expirer::new(Arc::new(MemoryKvStorage::new()))?;
        let mut events = expirer.subscribe();

        let topic = Topic::generate();
        expirer.set(topic_target(&topic), unix_now() + 1)?;
        expirer.delete(&topic_target(&topic))?;

        // Idempotent.
        expirer.delete(&topic_target(&topic))?;

        assert!(
            timeout(Duration::from_secs(2), events.recv()).await.is_err(),
            "cancelled expiry must not fire"
        );

        Ok(())
    }

    #[tokio::test]
    async fn set_replaces_schedule() -> Result<()> {
        let expirer = Expirer::new(Arc::new(MemoryKvStorage::new()))?;
        let mut events = expirer.subscribe();

        let topic = Topic::generate();
        expirer.set(topic_target(&topic), unix_now() + 1)?;
        expirer.set(topic_target(&topic), unix_now() + 60)?;

        // The first schedule is stale and must not fire.
        assert!(
            timeout(Duration::from_secs(2), events.recv()).await.is_err(),
            "replaced expiry must not fire early"
        );
        assert!(expirer.has(&topic_target(&topic)));

        Ok(())
    }

    #[tokio::test]
    async fn rehydrates_from_storage() -> Result<()> {
        let storage = Arc::new(MemoryKvStorage::new());
        let topic = Topic::generate();

        {
            let expirer = Expirer::new(storage.clone())?;
            expirer.set(topic_target(&topic), unix_now() + 1)?;
        }

        let expirer = Expirer::new(storage)?;
        let mut events = expirer.subscribe();
        assert!(expirer.has(&topic_target(&topic)));

        let ExpirerEvent::Expired(target) = timeout(RECV_DEADLINE, events.recv()).await??;
        assert_eq!(target, topic_target(&topic));

        Ok(())
    }
}
