use {
    crate::{
        crypto::{Crypto, EnvelopeType},
        error::{Error, Result},
        relayer::{InboundMessage, PublishOptions, Relayer},
        rpc::{
            ErrorParams, RawPayload, RawRequest, RelayProtocolMetadata, Request, RequestParams,
            Response, ResponseParams, ResponseParamsError, ResponseParamsSuccess,
        },
    },
    dashmap::DashMap,
    relay_rpc::{
        domain::{MessageId, Topic},
        rpc::MessageIdGenerator,
    },
    serde::de::DeserializeOwned,
    serde_json::Value,
    std::{
        future::Future,
        pin::Pin,
        sync::{Arc, Weak},
        time::Duration,
    },
    tokio::sync::{mpsc::UnboundedReceiver, oneshot},
    tracing::{debug, warn},
};

/// Default deadline for awaiting a peer response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Tags of the documented method table. Anything else is tolerated and
/// logged; the set is not assumed exhaustive across peer implementations.
const DOCUMENTED_TAGS: &[u32] = &[1000, 1001, 1002, 1003];

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type RequestHandler = Arc<dyn Fn(RequestContext) -> BoxFuture + Send + Sync>;
type RawResult = std::result::Result<Value, ErrorParams>;
type ResponseObserver = Arc<dyn Fn(ResponseContext, RawResult) -> BoxFuture + Send + Sync>;

/// An inbound domain request handed to a registered handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: MessageId,
    pub topic: Topic,
    pub method: String,
    pub params: Value,
    pub tag: u32,
}

/// A correlated response handed to a registered response observer.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub id: MessageId,
    pub topic: Topic,
    pub method: String,
}

struct PendingRequest {
    method: String,
    topic: Topic,
    tx: oneshot::Sender<RawResult>,
}

struct Inner {
    crypto: Crypto,
    relayer: Relayer,
    id_generator: MessageIdGenerator,
    handlers: DashMap<String, RequestHandler>,
    response_observers: DashMap<String, ResponseObserver>,
    pending: DashMap<MessageId, PendingRequest>,
}

/// Token returned by handler registration. Disposing it removes every
/// handler the registration installed, for both directions.
pub struct HandlerToken {
    requests: Vec<String>,
    responses: Vec<String>,
    inner: Weak<Inner>,
}

impl HandlerToken {
    pub fn dispose(self) {
        if let Some(inner) = self.inner.upgrade() {
            for method in &self.requests {
                inner.handlers.remove(method);
            }

            for method in &self.responses {
                inner.response_observers.remove(method);
            }
        }
    }
}

/// Future resolving with the correlated response of a sent request.
///
/// Dropping the receiver cancels the wait and removes the pending entry; a
/// response arriving afterwards is treated as an orphan and dropped with a
/// log.
pub struct ResponseReceiver {
    id: MessageId,
    rx: oneshot::Receiver<RawResult>,
    inner: Weak<Inner>,
}

impl ResponseReceiver {
    /// Awaits the correlated response within `deadline`.
    pub async fn wait(mut self, deadline: Duration) -> Result<Value> {
        match tokio::time::timeout(deadline, &mut self.rx).await {
            Ok(Ok(Ok(value))) => Ok(value),

            Ok(Ok(Err(err))) => Err(Error::Rpc {
                code: err.code.unwrap_or_default(),
                message: err.message,
            }),

            Ok(Err(_)) => Err(Error::ChannelClosed),

            Err(_) => Err(Error::Timeout),
        }
    }
}

impl Drop for ResponseReceiver {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.pending.remove(&self.id);
        }
    }
}

/// Envelope-level request/response dispatch.
///
/// Outbound: serializes typed requests, encrypts them for the topic and
/// publishes with the method's tag/TTL. Inbound: decrypts, discriminates
/// request vs. response, routes requests to registered handlers and
/// responses to the pending waiter with the matching ID.
#[derive(Clone)]
pub struct MessageHandler {
    inner: Arc<Inner>,
}

impl MessageHandler {
    /// Creates the handler and spawns the single consumer task over the
    /// relayer's inbound stream. A single consumer preserves per-topic
    /// delivery order.
    pub fn new(
        crypto: Crypto,
        relayer: Relayer,
        messages: UnboundedReceiver<InboundMessage>,
    ) -> Self {
        let handler = Self {
            inner: Arc::new(Inner {
                crypto,
                relayer,
                id_generator: MessageIdGenerator::new(),
                handlers: DashMap::new(),
                response_observers: DashMap::new(),
                pending: DashMap::new(),
            }),
        };

        tokio::spawn(inbound_loop(handler.clone(), messages));

        handler
    }

    /// Registers a request handler for `method`, replacing any previous
    /// registration. Returns a token that unregisters it when disposed.
    pub fn register_handler<F, Fut>(&self, method: &str, handler: F) -> HandlerToken
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.handlers.insert(
            method.to_owned(),
            Arc::new(move |ctx| -> BoxFuture { Box::pin(handler(ctx)) }),
        );

        HandlerToken {
            requests: vec![method.to_owned()],
            responses: Vec::new(),
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Registers both directions of a method: a typed request handler and a
    /// typed observer for correlated responses. Returns a single token that
    /// unregisters both when disposed.
    ///
    /// Responses still resolve their pending waiter by ID; the observer is
    /// invoked in addition, after the waiter. Requests or responses whose
    /// parameters do not deserialize into the expected type are logged and
    /// handed on as errors (responses) or dropped (requests).
    pub fn handle_message_type<Req, Res, FReq, FutReq, FRes, FutRes>(
        &self,
        method: &str,
        on_request: FReq,
        on_response: FRes,
    ) -> HandlerToken
    where
        Req: DeserializeOwned + Send + 'static,
        Res: DeserializeOwned + Send + 'static,
        FReq: Fn(RequestContext, Req) -> FutReq + Send + Sync + 'static,
        FutReq: Future<Output = ()> + Send + 'static,
        FRes: Fn(ResponseContext, std::result::Result<Res, ErrorParams>) -> FutRes
            + Send
            + Sync
            + 'static,
        FutRes: Future<Output = ()> + Send + 'static,
    {
        self.inner.handlers.insert(
            method.to_owned(),
            Arc::new(move |ctx: RequestContext| -> BoxFuture {
                match serde_json::from_value(ctx.params.clone()) {
                    Ok(params) => Box::pin(on_request(ctx, params)),

                    Err(err) => {
                        warn!("dropping malformed {} request: {err}", ctx.method);
                        Box::pin(std::future::ready(()))
                    }
                }
            }),
        );

        self.inner.response_observers.insert(
            method.to_owned(),
            Arc::new(move |ctx: ResponseContext, result: RawResult| -> BoxFuture {
                let result = match result {
                    Ok(value) => serde_json::from_value(value).map_err(|err| ErrorParams {
                        code: None,
                        message: format!("malformed response: {err}"),
                    }),

                    Err(err) => Err(err),
                };

                Box::pin(on_response(ctx, result))
            }),
        );

        HandlerToken {
            requests: vec![method.to_owned()],
            responses: vec![method.to_owned()],
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Allocates an ID, registers the response waiter, encrypts and
    /// publishes the request.
    ///
    /// The waiter is registered before anything goes out, so a fast peer
    /// response cannot race the registration.
    pub async fn send_request(
        &self,
        topic: &Topic,
        params: RequestParams,
    ) -> Result<(MessageId, ResponseReceiver)> {
        let id = self.inner.id_generator.next();
        let metadata = params.irn_metadata();
        let request = Request::new(id, params);
        let serialized = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(
            id,
            PendingRequest {
                method: request.params.method().to_owned(),
                topic: topic.clone(),
                tx,
            },
        );

        let receiver = ResponseReceiver {
            id,
            rx,
            inner: Arc::downgrade(&self.inner),
        };

        // The receiver's drop guard cleans up the pending entry if the
        // encrypt or publish below fails.
        let message = self
            .inner
            .crypto
            .encode(topic, &serialized, EnvelopeType::Type0)?;

        self.inner
            .relayer
            .publish(topic.clone(), message, PublishOptions::from(&metadata))
            .await?;

        Ok((id, receiver))
    }

    /// Sends `params` and awaits the typed response within the default
    /// deadline.
    pub async fn request<R>(&self, topic: &Topic, params: RequestParams) -> Result<(MessageId, R)>
    where
        R: DeserializeOwned,
    {
        let (id, receiver) = self.send_request(topic, params).await?;
        let value = receiver.wait(RESPONSE_TIMEOUT).await?;

        Ok((id, serde_json::from_value(value)?))
    }

    /// Replies to a request. The response echoes the request ID; no new ID
    /// is allocated.
    pub async fn respond(
        &self,
        id: MessageId,
        topic: &Topic,
        params: ResponseParamsSuccess,
    ) -> Result<()> {
        let metadata = params.irn_metadata();

        self.publish_response(id, topic, params.try_into()?, metadata)
            .await
    }

    /// Replies to a request with an error. The response echoes the request
    /// ID.
    pub async fn respond_error(
        &self,
        id: MessageId,
        topic: &Topic,
        params: ResponseParamsError,
    ) -> Result<()> {
        let metadata = params.irn_metadata();

        self.publish_response(id, topic, params.try_into()?, metadata)
            .await
    }

    async fn publish_response(
        &self,
        id: MessageId,
        topic: &Topic,
        params: ResponseParams,
        metadata: crate::rpc::IrnMetadata,
    ) -> Result<()> {
        let response = Response::new(id, params);
        let serialized = serde_json::to_string(&response)?;
        let message = self
            .inner
            .crypto
            .encode(topic, &serialized, EnvelopeType::Type0)?;

        self.inner
            .relayer
            .publish(topic.clone(), message, PublishOptions::from(&metadata))
            .await
    }

    async fn handle_inbound(&self, inbound: InboundMessage) {
        if !DOCUMENTED_TAGS.contains(&inbound.tag) {
            debug!("message on {} carries undocumented tag {}", inbound.topic, inbound.tag);
        }

        // Malformed inbound traffic never propagates: log and drop.
        let plaintext = match self.inner.crypto.decode(&inbound.topic, &inbound.message) {
            Ok(plaintext) => plaintext,

            Err(err) => {
                warn!("dropping undecryptable message on {}: {err}", inbound.topic);
                return;
            }
        };

        let payload: RawPayload = match serde_json::from_str(&plaintext) {
            Ok(payload) => payload,

            Err(err) => {
                warn!("dropping malformed payload on {}: {err}", inbound.topic);
                return;
            }
        };

        match payload {
            RawPayload::Request(request) => {
                self.dispatch_request(inbound.topic, inbound.tag, request)
                    .await
            }

            RawPayload::Response(response) => self.dispatch_response(response).await,
        }
    }

    async fn dispatch_request(&self, topic: Topic, tag: u32, request: RawRequest) {
        let Some(handler) = self
            .inner
            .handlers
            .get(&request.method)
            .map(|handler| handler.value().clone())
        else {
            debug!("no handler registered for method {}", request.method);
            return;
        };

        // Dispatch stays on the consumer task to preserve per-topic
        // ordering.
        handler(RequestContext {
            id: request.id,
            topic,
            method: request.method,
            params: request.params,
            tag,
        })
        .await;
    }

    async fn dispatch_response(&self, response: Response) {
        let Some((_, pending)) = self.inner.pending.remove(&response.id) else {
            debug!("dropping orphan response {}", response.id);
            return;
        };

        debug!("response {} resolves {}", response.id, pending.method);

        let result: RawResult = match response.params {
            ResponseParams::Success(value) => Ok(value),

            ResponseParams::Err(value) => Err(serde_json::from_value(value)
                .unwrap_or_else(|_| ErrorParams::unknown())),
        };

        let observer = self
            .inner
            .response_observers
            .get(&pending.method)
            .map(|observer| observer.value().clone());

        pending.tx.send(result.clone()).ok();

        if let Some(observer) = observer {
            observer(
                ResponseContext {
                    id: response.id,
                    topic: pending.topic,
                    method: pending.method,
                },
                result,
            )
            .await;
        }
    }
}

async fn inbound_loop(handler: MessageHandler, mut messages: UnboundedReceiver<InboundMessage>) {
    while let Some(message) = messages.recv().await {
        handler.handle_inbound(message).await;
    }
}
