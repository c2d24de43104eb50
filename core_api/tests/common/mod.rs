//! In-process relay for end-to-end tests.
//!
//! Speaks just enough of the `iridium_*` JSON RPC surface: subscribe and
//! unsubscribe are acknowledged and tracked per connection, publishes are
//! acknowledged and forwarded to every other subscriber of the topic as
//! `iridium_subscription` notifications.

use {
    futures_util::{SinkExt, StreamExt},
    once_cell::sync::Lazy,
    relay_rpc::{
        domain::{SubscriptionId, Topic},
        rpc::{
            MessageIdGenerator, Params, Payload, Request, Response, SuccessfulResponse,
        },
    },
    std::collections::HashMap,
    std::sync::Arc,
    tokio::{
        net::{TcpListener, TcpStream},
        sync::{mpsc, Mutex},
    },
    tokio_tungstenite::{accept_async, tungstenite::Message},
};

static MESSAGE_IDS: Lazy<MessageIdGenerator> = Lazy::new(MessageIdGenerator::new);

struct Peer {
    tx: mpsc::UnboundedSender<Message>,
    subscriptions: HashMap<Topic, SubscriptionId>,
}

type Peers = Arc<Mutex<HashMap<u64, Peer>>>;

pub struct MockRelay {
    pub address: String,
}

/// Initializes test logging from `RUST_LOG`. Repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

impl MockRelay {
    /// Binds to an ephemeral local port and starts serving.
    pub async fn start() -> anyhow::Result<Self> {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = format!("ws://{}", listener.local_addr()?);
        let peers: Peers = Arc::default();

        tokio::spawn(accept_loop(listener, peers));

        Ok(Self { address })
    }
}

async fn accept_loop(listener: TcpListener, peers: Peers) {
    let mut next_conn_id = 0u64;

    while let Ok((stream, _)) = listener.accept().await {
        next_conn_id += 1;
        tokio::spawn(serve_connection(stream, next_conn_id, peers.clone()));
    }
}

async fn serve_connection(stream: TcpStream, conn_id: u64, peers: Peers) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(_) => return,
    };

    let (mut sink, mut source) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    peers.lock().await.insert(
        conn_id,
        Peer {
            tx: tx.clone(),
            subscriptions: HashMap::new(),
        },
    );

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = source.next().await {
        let Message::Text(text) = frame else { continue };

        // Client acks for forwarded subscriptions parse as responses and
        // need no handling.
        let Ok(Payload::Request(request)) = serde_json::from_str::<Payload>(&text) else {
            continue;
        };

        handle_request(conn_id, request, &peers, &tx).await;
    }

    peers.lock().await.remove(&conn_id);
    writer.abort();
}

async fn handle_request(
    conn_id: u64,
    request: Request,
    peers: &Peers,
    tx: &mpsc::UnboundedSender<Message>,
) {
    match request.params {
        Params::Subscribe(subscribe) => {
            let subscription_id = SubscriptionId::generate();

            if let Some(peer) = peers.lock().await.get_mut(&conn_id) {
                peer.subscriptions
                    .insert(subscribe.topic, subscription_id.clone());
            }

            respond(tx, request.id, serde_json::json!(subscription_id));
        }

        Params::Unsubscribe(unsubscribe) => {
            if let Some(peer) = peers.lock().await.get_mut(&conn_id) {
                peer.subscriptions.remove(&unsubscribe.topic);
            }

            respond(tx, request.id, serde_json::json!(true));
        }

        Params::Publish(publish) => {
            respond(tx, request.id, serde_json::json!(true));

            let published_at = chrono::Utc::now().timestamp_millis();
            let peers = peers.lock().await;

            for (peer_id, peer) in peers.iter() {
                // The publisher does not receive its own message back.
                if *peer_id == conn_id {
                    continue;
                }

                let Some(subscription_id) = peer.subscriptions.get(&publish.topic) else {
                    continue;
                };

                let forward = publish.as_subscription(
                    MESSAGE_IDS.next(),
                    subscription_id.clone(),
                    published_at,
                );

                if let Ok(serialized) = serde_json::to_string(&Payload::Request(forward)) {
                    peer.tx.send(Message::Text(serialized)).ok();
                }
            }
        }

        Params::Subscription(_) => {
            // Clients never send this; tolerate and ack.
            respond(tx, request.id, serde_json::json!(true));
        }
    }
}

fn respond(
    tx: &mpsc::UnboundedSender<Message>,
    id: relay_rpc::domain::MessageId,
    result: serde_json::Value,
) {
    let response = Payload::Response(Response::Success(SuccessfulResponse::new(id, result)));

    if let Ok(serialized) = serde_json::to_string(&response) {
        tx.send(Message::Text(serialized)).ok();
    }
}
