//! A relay living in memory.
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use futures_util::{stream::BoxStream, StreamExt};
use tokio::sync::{mpsc, Notify};
use url::Url;

use crate::{
    websocket::{SocketSink, WebsocketConnector, WebsocketSession},
    TunnelError,
};

/// `None` ends the stream.
type Inbound = mpsc::UnboundedSender<Option<Result<Vec<u8>, TunnelError>>>;
type Responder = Arc<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

fn frames(
    inbound: mpsc::UnboundedReceiver<Option<Result<Vec<u8>, TunnelError>>>,
) -> BoxStream<'static, Result<Vec<u8>, TunnelError>> {
    futures_util::stream::unfold(inbound, |mut inbound| async move {
        match inbound.recv().await {
            Some(Some(item)) => Some((item, inbound)),
            _ => None,
        }
    })
    .boxed()
}

pub(crate) struct FakeRelay {
    routing_id: Option<String>,
    refuse: bool,
    broken_sink: bool,
    gate: Option<Arc<Notify>>,
    stall: Option<Arc<Notify>>,
    greeting: Vec<Vec<u8>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<(Url, String)>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicUsize>,
    peer: Mutex<Option<Inbound>>,
}

impl FakeRelay {
    pub(crate) fn new() -> Self {
        Self {
            routing_id: None,
            refuse: false,
            broken_sink: false,
            gate: None,
            stall: None,
            greeting: Vec::new(),
            responder: None,
            requests: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicUsize::new(0)),
            peer: Mutex::new(None),
        }
    }

    pub(crate) fn with_routing_id(mut self, header: &str) -> Self {
        self.routing_id = Some(header.into());
        self
    }

    pub(crate) fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub(crate) fn with_broken_sink(mut self) -> Self {
        self.broken_sink = true;
        self
    }

    /// Hold every connection attempt until `gate` is notified.
    pub(crate) fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Hold every write until `stall` is notified.
    pub(crate) fn with_stalled_writes(mut self, stall: Arc<Notify>) -> Self {
        self.stall = Some(stall);
        self
    }

    /// Deliver `message` as soon as a socket opens.
    pub(crate) fn with_greeting(mut self, message: Vec<u8>) -> Self {
        self.greeting.push(message);
        self
    }

    /// Answer every frame sent with the frames `responder` returns.
    pub(crate) fn with_responder(
        mut self,
        responder: impl Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Arc::new(responder));
        self
    }

    fn deliver(&self, item: Option<Result<Vec<u8>, TunnelError>>) {
        let peer = self.peer.lock().unwrap();
        peer.as_ref().expect("no socket is open").send(item).unwrap();
    }

    pub(crate) fn push(&self, message: Vec<u8>) {
        self.deliver(Some(Ok(message)));
    }

    pub(crate) fn break_stream(&self) {
        self.deliver(Some(Err(TunnelError::Socket(Some("connection reset".into())))));
    }

    pub(crate) fn hang_up(&self) {
        self.deliver(None);
    }

    pub(crate) fn requests(&self) -> Vec<(Url, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeSink {
    broken: bool,
    stall: Option<Arc<Notify>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicUsize>,
    peer: Inbound,
    responder: Option<Responder>,
}

#[async_trait::async_trait]
impl SocketSink for FakeSink {
    async fn send(&mut self, data: Vec<u8>) -> Result<(), TunnelError> {
        if let Some(stall) = &self.stall {
            stall.notified().await;
        }
        if self.broken {
            return Err(TunnelError::Socket(Some("broken pipe".into())));
        }
        if let Some(responder) = &self.responder {
            for reply in responder(&data) {
                // the reader may be gone already
                let _ = self.peer.send(Some(Ok(reply)));
            }
        }
        self.sent.lock().unwrap().push(data);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl WebsocketConnector for FakeRelay {
    async fn connect(&self, url: &Url, protocol: &str) -> Result<WebsocketSession, TunnelError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.clone(), protocol.to_owned()));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.refuse {
            return Err(TunnelError::Socket(Some("connection refused".into())));
        }

        let (peer, inbound) = mpsc::unbounded_channel();
        for message in &self.greeting {
            peer.send(Some(Ok(message.clone()))).unwrap();
        }
        *self.peer.lock().unwrap() = Some(peer.clone());

        Ok(WebsocketSession {
            routing_id: self.routing_id.clone(),
            sink: Box::new(FakeSink {
                broken: self.broken_sink,
                stall: self.stall.clone(),
                sent: self.sent.clone(),
                closed: self.closed.clone(),
                peer,
                responder: self.responder.clone(),
            }),
            stream: frames(inbound),
        })
    }
}

/// The end of a tunnel a [`LoopbackRelay`] delivers to, once someone joined it.
type End = Arc<Mutex<Option<Inbound>>>;

/// A relay carrying one tunnel between an authenticator that opened it and a client that joined.
#[derive(Default)]
pub(crate) struct LoopbackRelay {
    authenticator: End,
    client: End,
}

struct LoopbackSink {
    peer: End,
}

#[async_trait::async_trait]
impl SocketSink for LoopbackSink {
    async fn send(&mut self, data: Vec<u8>) -> Result<(), TunnelError> {
        match self.peer.lock().unwrap().as_ref() {
            Some(peer) => {
                // the peer may have hung up already
                let _ = peer.send(Some(Ok(data)));
                Ok(())
            }
            None => Err(TunnelError::Socket(Some("nobody joined the tunnel".into()))),
        }
    }

    async fn close(&mut self) {
        if let Some(peer) = self.peer.lock().unwrap().take() {
            let _ = peer.send(None);
        }
    }
}

#[async_trait::async_trait]
impl WebsocketConnector for LoopbackRelay {
    async fn connect(&self, url: &Url, _protocol: &str) -> Result<WebsocketSession, TunnelError> {
        let new = url.path().starts_with("/cable/new/");
        let (own, peer) = if new {
            (&self.authenticator, &self.client)
        } else {
            (&self.client, &self.authenticator)
        };
        let (sender, inbound) = mpsc::unbounded_channel();
        *own.lock().unwrap() = Some(sender);

        Ok(WebsocketSession {
            routing_id: new.then(|| "aabbcc".to_owned()),
            sink: Box::new(LoopbackSink { peer: peer.clone() }),
            stream: frames(inbound),
        })
    }
}
