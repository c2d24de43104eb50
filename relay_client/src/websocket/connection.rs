use {
    super::{
        outbound::OutboundRequest,
        stream::{create_stream, ClientStream, StreamEvent},
        ConnectionHandler,
        PublishedMessage,
    },
    crate::{
        error::{ClientError, CloseReason},
        HttpRequest,
    },
    futures_util::StreamExt,
    tokio::sync::{mpsc::UnboundedReceiver, oneshot},
    tokio_tungstenite::tungstenite::Error as TransportError,
};

pub(super) enum ConnectionControl {
    Connect {
        request: HttpRequest<()>,
        tx: oneshot::Sender<Result<(), ClientError>>,
    },

    Disconnect {
        tx: oneshot::Sender<Result<(), ClientError>>,
    },

    OutboundRequest(OutboundRequest),
}

/// Single-owner loop around the websocket stream.
///
/// The socket is either disconnected (no stream) or open. `Connect`
/// replaces any live stream, `Disconnect` drops it, and outbound requests
/// sent while disconnected fail with [`ClientError::NotConnected`] instead
/// of queueing. A close carrying a stated cause is surfaced as an error
/// event before the closed notification.
pub(super) async fn connection_event_loop<T>(
    mut control_rx: UnboundedReceiver<ConnectionControl>,
    mut handler: T,
) where
    T: ConnectionHandler,
{
    let mut stream: Option<ClientStream> = None;

    loop {
        tokio::select! {
            control = control_rx.recv() => {
                // Control TX has been dropped, shutting down.
                let Some(control) = control else {
                    close_stream(&mut stream).await;
                    handler.disconnected(None);
                    break;
                };

                match control {
                    ConnectionControl::Connect { request, tx } => {
                        close_stream(&mut stream).await;

                        let result = match create_stream(request).await {
                            Ok(new_stream) => {
                                stream = Some(new_stream);
                                handler.connected();
                                Ok(())
                            }

                            Err(err) => Err(err),
                        };

                        tx.send(result).ok();
                    }

                    ConnectionControl::Disconnect { tx } => {
                        let result = match stream.take() {
                            Some(mut live) => live.close(None).await,

                            None => {
                                Err(ClientError::ClosingFailed(TransportError::AlreadyClosed))
                            }
                        };

                        tx.send(result).ok();
                    }

                    ConnectionControl::OutboundRequest(request) => match &mut stream {
                        Some(live) => live.send_raw(request),

                        None => {
                            request.tx.send(Err(ClientError::NotConnected)).ok();
                        }
                    },
                }
            }

            event = next_event(&mut stream) => {
                match event {
                    StreamEvent::InboundSubscriptionRequest(request) => {
                        handler.message_received(PublishedMessage::from_request(&request));
                        request.respond(Ok(true)).ok();
                    }

                    StreamEvent::InboundError(error) => {
                        handler.inbound_error(error);
                    }

                    StreamEvent::OutboundError(error) => {
                        handler.outbound_error(error);
                    }

                    StreamEvent::ConnectionClosed(frame) => {
                        // A disconnection with a stated cause is an error
                        // first, then the closed notification.
                        if frame.is_some() {
                            handler.inbound_error(ClientError::ConnectionClosed(CloseReason(
                                frame.clone(),
                            )));
                        }

                        handler.disconnected(frame);
                        stream = None;
                    }
                }
            }
        }
    }
}

/// Waits for the next stream event. Parks forever while disconnected (or
/// once the stream has terminated) so the control branch of the loop keeps
/// the task alive.
async fn next_event(stream: &mut Option<ClientStream>) -> StreamEvent {
    match stream {
        Some(live) => match live.next().await {
            Some(event) => event,
            None => std::future::pending().await,
        },

        None => std::future::pending().await,
    }
}

async fn close_stream(stream: &mut Option<ClientStream>) {
    if let Some(mut live) = stream.take() {
        live.close(None).await.ok();
    }
}
