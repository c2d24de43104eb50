use {
    self::connection::{connection_event_loop, ConnectionControl},
    crate::{error::ClientError, ConnectionOptions},
    chrono::{TimeZone, Utc},
    relay_rpc::{
        domain::{MessageId, SubscriptionId, Topic},
        rpc::{Publish, Subscribe, Subscription, Unsubscribe},
    },
    std::{sync::Arc, time::Duration},
    tokio::sync::{
        mpsc::{self, UnboundedSender},
        oneshot,
    },
};
pub use {
    inbound::*,
    outbound::*,
    stream::*,
    tokio_tungstenite::tungstenite::protocol::CloseFrame,
};

mod connection;
mod inbound;
mod outbound;
mod stream;

/// The message received from a subscription.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub message_id: MessageId,
    pub subscription_id: SubscriptionId,
    pub topic: Topic,
    pub message: Arc<str>,
    pub tag: u32,
    pub published_at: chrono::DateTime<chrono::Utc>,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

impl PublishedMessage {
    fn from_request(request: &InboundRequest<Subscription>) -> Self {
        let Subscription { id, data } = request.data();
        let now = Utc::now();

        Self {
            message_id: request.id(),
            subscription_id: id.clone(),
            topic: data.topic.clone(),
            message: data.message.clone(),
            tag: data.tag,
            published_at: Utc
                .timestamp_millis_opt(data.published_at)
                .single()
                .unwrap_or(now),
            received_at: now,
        }
    }
}

/// Handlers for the RPC stream events.
pub trait ConnectionHandler: Send + 'static {
    /// Called when a connection to the relay is established.
    fn connected(&mut self) {}

    /// Called when the relay connection is closed.
    fn disconnected(&mut self, _frame: Option<CloseFrame<'static>>) {}

    /// Called when a message is received from the relay.
    fn message_received(&mut self, message: PublishedMessage);

    /// Called when an inbound error occurs, such as data deserialization
    /// failure, or an unknown response message ID.
    fn inbound_error(&mut self, _error: ClientError) {}

    /// Called when an outbound error occurs, i.e. failed to write to the
    /// websocket stream.
    fn outbound_error(&mut self, _error: ClientError) {}
}

/// The relay WebSocket RPC client.
///
/// This provides the high-level access to all of the available RPC methods.
/// For a lower-level RPC stream see [`ClientStream`].
///
/// The client does not reconnect on its own. Connection loss is reported
/// through [`ConnectionHandler::disconnected`] and the owner decides when to
/// call [`Client::connect`] again.
#[derive(Debug, Clone)]
pub struct Client {
    control_tx: UnboundedSender<ConnectionControl>,
}

impl Client {
    /// Creates a new [`Client`] with the provided handler.
    pub fn new<T>(handler: T) -> Self
    where
        T: ConnectionHandler,
    {
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        tokio::spawn(connection_event_loop(control_rx, handler));

        Self { control_tx }
    }

    /// Publishes a message over the network on given topic.
    pub fn publish(
        &self,
        topic: Topic,
        message: impl Into<Arc<str>>,
        tag: u32,
        ttl: Duration,
        prompt: bool,
    ) -> EmptyResponseFuture<Publish> {
        let (request, response) = create_request(Publish {
            topic,
            message: message.into(),
            ttl_secs: ttl.as_secs() as u32,
            tag,
            prompt,
        });

        self.request(request);

        EmptyResponseFuture::new(response)
    }

    /// Subscribes on topic to receive messages.
    pub fn subscribe(&self, topic: Topic) -> ResponseFuture<Subscribe> {
        let (request, response) = create_request(Subscribe { topic });

        self.request(request);

        response
    }

    /// Unsubscribes from a topic.
    pub fn unsubscribe(
        &self,
        topic: Topic,
        subscription_id: SubscriptionId,
    ) -> EmptyResponseFuture<Unsubscribe> {
        let (request, response) = create_request(Unsubscribe {
            topic,
            subscription_id,
        });

        self.request(request);

        EmptyResponseFuture::new(response)
    }

    /// Opens a connection to the relay.
    pub async fn connect(&self, opts: &ConnectionOptions) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        let request = opts.as_ws_request()?;

        if self
            .control_tx
            .send(ConnectionControl::Connect { request, tx })
            .is_ok()
        {
            rx.await.map_err(|_| ClientError::ChannelClosed)?
        } else {
            Err(ClientError::ChannelClosed)
        }
    }

    /// Closes the relay connection.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();

        if self
            .control_tx
            .send(ConnectionControl::Disconnect { tx })
            .is_ok()
        {
            rx.await.map_err(|_| ClientError::ChannelClosed)?
        } else {
            Err(ClientError::ChannelClosed)
        }
    }

    pub(crate) fn request(&self, request: OutboundRequest) {
        if let Err(err) = self
            .control_tx
            .send(ConnectionControl::OutboundRequest(request))
        {
            let ConnectionControl::OutboundRequest(request) = err.0 else {
                unreachable!();
            };

            request.tx.send(Err(ClientError::ChannelClosed)).ok();
        }
    }
}
