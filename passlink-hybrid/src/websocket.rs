//! The websocket to the relay and the state machine guarding it.
//!
//! A [`TunnelWebsocket`] moves through [`Phase::None`], [`Phase::Connecting`],
//! [`Phase::Connected`] and ends in [`Phase::Disconnected`], which it never leaves. Everything
//! that happens on the socket is reported as a [`TunnelEvent`], and [`TunnelEvent::Closed`] is
//! sent exactly once.
use std::{fmt, sync::Arc};

use futures_util::{sink::Sink, stream::BoxStream, SinkExt, StreamExt};
use passlink_types::encoding::try_from_hex;
use tokio::{
    sync::{mpsc, Mutex, MutexGuard, OwnedMutexGuard},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
    Error as WsError, Message,
};
use url::Url;

use crate::TunnelError;

/// Websocket subprotocol of caBLE v2.
pub const PROTOCOL: &str = "fido.cable";

/// Response header in which the relay names the routing id of a new tunnel.
pub const ROUTING_ID_HEADER: &str = "X-Cable-Routing-Id";

/// Which end of the tunnel this socket is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelRole {
    /// The authenticator, asking the relay for a new tunnel
    New,
    /// The client, joining a tunnel by its routing id
    Connect,
}

/// Where a [`TunnelWebsocket`] is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Created, `connect` was not called yet
    #[default]
    None,
    /// The socket is being opened
    Connecting,
    /// Frames can be sent
    Connected,
    /// Closed for good
    Disconnected,
}

/// What happened on a tunnel.
#[derive(Debug)]
pub enum TunnelEvent {
    /// The socket opened. `routing_id` is what the relay assigned to a new tunnel.
    Connected {
        /// Routing id, only for [`TunnelRole::New`]
        routing_id: Option<[u8; 3]>,
    },
    /// A binary frame arrived.
    Message(Vec<u8>),
    /// The tunnel failed and is about to close.
    Error(TunnelError),
    /// The tunnel closed.
    Closed,
}

/// The sending half of an open websocket.
#[async_trait::async_trait]
pub trait SocketSink: Send + Sync {
    /// Send one binary frame.
    async fn send(&mut self, data: Vec<u8>) -> Result<(), TunnelError>;

    /// Close the socket. Failures are only logged.
    async fn close(&mut self);
}

/// An open websocket.
pub struct WebsocketSession {
    /// The [`ROUTING_ID_HEADER`] of the upgrade response
    pub routing_id: Option<String>,
    /// Sending half
    pub sink: Box<dyn SocketSink>,
    /// Binary frames as they arrive, ending when the socket closes
    pub stream: BoxStream<'static, Result<Vec<u8>, TunnelError>>,
}

impl fmt::Debug for WebsocketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebsocketSession")
            .field("routing_id", &self.routing_id)
            .finish_non_exhaustive()
    }
}

/// Opens websockets.
#[async_trait::async_trait]
pub trait WebsocketConnector: Send + Sync {
    /// Open a websocket to `url`, asking for `protocol`.
    async fn connect(&self, url: &Url, protocol: &str) -> Result<WebsocketSession, TunnelError>;
}

/// Connects with [`tokio_tungstenite`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

struct TungsteniteSink<S>(S);

#[async_trait::async_trait]
impl<S> SocketSink for TungsteniteSink<S>
where
    S: Sink<Message, Error = WsError> + Unpin + Send + Sync,
{
    async fn send(&mut self, data: Vec<u8>) -> Result<(), TunnelError> {
        Ok(self.0.send(Message::Binary(data)).await?)
    }

    async fn close(&mut self) {
        if let Err(e) = self.0.close().await {
            log::debug!("closing the websocket failed: {e}");
        }
    }
}

#[async_trait::async_trait]
impl WebsocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &Url, protocol: &str) -> Result<WebsocketSession, TunnelError> {
        let mut request = url.as_str().into_client_request()?;
        let protocol = HeaderValue::from_str(protocol)
            .map_err(|e| TunnelError::Socket(Some(e.to_string())))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);

        let (socket, response) = tokio_tungstenite::connect_async(request).await?;
        let routing_id = response
            .headers()
            .get(ROUTING_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let (sink, stream) = socket.split();

        let stream = futures_util::stream::unfold(stream, |mut stream| async move {
            loop {
                match stream.next().await? {
                    Ok(Message::Binary(data)) => return Some((Ok(data), stream)),
                    Ok(Message::Close(frame)) => {
                        log::debug!("relay closed the websocket: {frame:?}");
                        return None;
                    }
                    Ok(other) => log::trace!("ignoring websocket message {other:?}"),
                    Err(e) => return Some((Err(e.into()), stream)),
                }
            }
        });

        Ok(WebsocketSession {
            routing_id,
            sink: Box::new(TungsteniteSink(sink)),
            stream: stream.boxed(),
        })
    }
}

/// The routing id in a [`ROUTING_ID_HEADER`]: hex, of which the first 3 bytes count.
fn parse_routing_id(header: &str) -> Option<[u8; 3]> {
    match try_from_hex(header)?.as_slice() {
        [a, b, c, ..] => Some([*a, *b, *c]),
        _ => None,
    }
}

/// The sending half, locked on its own so a slow write never holds up the state.
/// `None` once the socket was closed.
type Writer = Arc<Mutex<Option<Box<dyn SocketSink>>>>;

#[derive(Default)]
struct State {
    phase: Phase,
    sink: Option<Writer>,
    worker: Option<JoinHandle<()>>,
}

struct Inner {
    url: Url,
    role: TunnelRole,
    connector: Arc<dyn WebsocketConnector>,
    state: Mutex<State>,
    events: mpsc::UnboundedSender<TunnelEvent>,
}

impl Inner {
    fn emit(&self, event: TunnelEvent) {
        if self.events.send(event).is_err() {
            log::trace!("nobody listens to the tunnel to {}", self.url);
        }
    }

    /// Move to [`Phase::Disconnected`]. `stop_worker` is false when called by the worker itself.
    async fn shut_down(&self, mut state: MutexGuard<'_, State>, stop_worker: bool) {
        if state.phase == Phase::Disconnected {
            return;
        }
        let previous = std::mem::replace(&mut state.phase, Phase::Disconnected);
        if let Some(worker) = state.worker.take() {
            if stop_worker {
                worker.abort();
            }
        }
        // A writer in the middle of a frame closes the socket once the frame is out.
        let writer: Option<OwnedMutexGuard<_>> = state
            .sink
            .take()
            .and_then(|writer| writer.try_lock_owned().ok());
        self.emit(TunnelEvent::Closed);
        drop(state);

        if let Some(mut sink) = writer.and_then(|mut writer| writer.take()) {
            sink.close().await;
        }
        log::info!("tunnel to {} closed while {previous:?}", self.url);
    }

    async fn fail(&self, error: TunnelError) {
        let state = self.state.lock().await;
        if state.phase != Phase::Disconnected {
            log::warn!("tunnel to {} failed: {error}", self.url);
            self.emit(TunnelEvent::Error(error));
        }
        self.shut_down(state, false).await;
    }

    async fn run(self: Arc<Self>) {
        let session = match self.connector.connect(&self.url, PROTOCOL).await {
            Ok(session) => session,
            Err(e) => return self.fail(e).await,
        };
        let WebsocketSession {
            routing_id,
            mut sink,
            mut stream,
        } = session;

        let routing_id = match self.role {
            TunnelRole::Connect => None,
            TunnelRole::New => match routing_id.as_deref().and_then(parse_routing_id) {
                Some(routing_id) => Some(routing_id),
                None => {
                    sink.close().await;
                    return self.fail(TunnelError::MissingRoutingId).await;
                }
            },
        };

        let mut state = self.state.lock().await;
        if state.phase != Phase::Connecting {
            drop(state);
            log::debug!("tunnel to {} was closed while connecting", self.url);
            sink.close().await;
            return;
        }
        state.phase = Phase::Connected;
        state.sink = Some(Arc::new(Mutex::new(Some(sink))));
        self.emit(TunnelEvent::Connected { routing_id });
        drop(state);
        log::info!("tunnel to {} connected", self.url);

        while let Some(message) = stream.next().await {
            match message {
                Ok(data) => self.emit(TunnelEvent::Message(data)),
                Err(e) => {
                    log::debug!("reading from the tunnel to {} failed", self.url);
                    return self.fail(e).await;
                }
            }
        }
        let state = self.state.lock().await;
        self.shut_down(state, false).await;
    }
}

/// A websocket to a caBLE relay.
///
/// Clones share the same socket.
#[derive(Clone)]
pub struct TunnelWebsocket {
    inner: Arc<Inner>,
}

impl TunnelWebsocket {
    /// A tunnel to `url` that is not connected yet, and the receiver of its events.
    pub fn new(
        url: Url,
        role: TunnelRole,
        connector: Arc<dyn WebsocketConnector>,
    ) -> (Self, mpsc::UnboundedReceiver<TunnelEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Inner {
            url,
            role,
            connector,
            state: Mutex::new(State::default()),
            events,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    /// Where the tunnel leads.
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// The current phase.
    pub async fn phase(&self) -> Phase {
        self.inner.state.lock().await.phase
    }

    /// Start opening the socket. The outcome is reported as a [`TunnelEvent`].
    ///
    /// A tunnel can only be connected once, any later call closes it.
    pub async fn connect(&self) -> Result<(), TunnelError> {
        let mut state = self.inner.state.lock().await;
        if state.phase != Phase::None {
            log::warn!("tunnel to {} connected twice", self.inner.url);
            self.inner.shut_down(state, true).await;
            return Err(TunnelError::AlreadyConnected);
        }
        state.phase = Phase::Connecting;
        log::info!("connecting tunnel to {}", self.inner.url);
        state.worker = Some(tokio::spawn(self.inner.clone().run()));
        Ok(())
    }

    /// Send a binary frame. Failing to send closes the tunnel.
    ///
    /// The state is not locked while the frame is written, so the tunnel can be closed meanwhile.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), TunnelError> {
        let writer = {
            let state = self.inner.state.lock().await;
            let writer = match state.phase {
                Phase::Connected => state.sink.clone(),
                _ => None,
            };
            match writer {
                Some(writer) => writer,
                None => {
                    log::debug!("sending on the tunnel to {} while not connected", self.inner.url);
                    self.inner.shut_down(state, true).await;
                    return Err(TunnelError::NotConnected);
                }
            }
        };

        let mut writer = writer.lock().await;
        let result = match writer.as_mut() {
            Some(sink) => sink.send(data).await,
            None => Err(TunnelError::NotConnected),
        };

        let state = self.inner.state.lock().await;
        if state.phase == Phase::Disconnected {
            drop(state);
            if let Some(mut sink) = writer.take() {
                log::debug!("tunnel to {} closed during a write", self.inner.url);
                sink.close().await;
            }
        } else if let Err(e) = &result {
            log::debug!("sending on the tunnel to {} failed: {e}", self.inner.url);
            drop(writer);
            self.inner.shut_down(state, true).await;
        }
        result
    }

    /// Close the tunnel. Closing twice does nothing.
    pub async fn close(&self) {
        let state = self.inner.state.lock().await;
        self.inner.shut_down(state, true).await;
    }

    /// Same as [`close`](Self::close).
    pub async fn close_websocket(&self) {
        self.close().await;
    }
}

impl fmt::Debug for TunnelWebsocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelWebsocket")
            .field("url", &self.inner.url.as_str())
            .field("role", &self.inner.role)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
