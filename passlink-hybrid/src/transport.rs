//! The two ends of a hybrid tunnel.
//!
//! The authenticator opens a new tunnel on relay 0 and advertises where it is in an EID over BLE.
//! The client decrypts that EID with the seed from its QR code and joins the tunnel.
use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::sync::mpsc;
use zeroize::Zeroizing;

use crate::{
    crypto::{
        decrypt_eid, eid_key, generate_eid, generated_seed, socket_hash_key, tunnel_id,
        EidPlaintext, EID_LEN,
    },
    qr::QrCodeData,
    relay::{connect_tunnel_url, new_tunnel_url},
    websocket::{TunnelEvent, TunnelRole, TunnelWebsocket, WebsocketConnector},
    HybridConfig, TunnelError,
};

/// Puts an EID into the air as BLE service data.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
#[async_trait::async_trait]
pub trait EidAdvertiser: Send + Sync {
    /// Start advertising `eid`.
    async fn advertise(&self, eid: [u8; EID_LEN]) -> Result<(), TunnelError>;
}

/// A connected tunnel, ready for the handshake.
pub struct EstablishedTunnel {
    websocket: TunnelWebsocket,
    events: mpsc::UnboundedReceiver<TunnelEvent>,
    socket_hash_key: Zeroizing<[u8; 32]>,
}

impl EstablishedTunnel {
    /// The pre-shared key for the handshake.
    pub fn socket_hash_key(&self) -> &[u8; 32] {
        &self.socket_hash_key
    }

    /// The underlying websocket.
    pub fn websocket(&self) -> &TunnelWebsocket {
        &self.websocket
    }

    /// Send a binary frame to the peer.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), TunnelError> {
        self.websocket.send(data).await
    }

    /// The next binary frame from the peer.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TunnelError> {
        loop {
            match self.events.recv().await {
                Some(TunnelEvent::Message(data)) => return Ok(data),
                Some(TunnelEvent::Error(e)) => return Err(e),
                Some(TunnelEvent::Connected { .. }) => {}
                Some(TunnelEvent::Closed) | None => return Err(TunnelError::Closed),
            }
        }
    }

    /// Close the tunnel.
    pub async fn close(&self) {
        self.websocket.close().await;
    }
}

impl fmt::Debug for EstablishedTunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EstablishedTunnel")
            .field("websocket", &self.websocket)
            .finish_non_exhaustive()
    }
}

/// Connect `websocket` and wait until the relay accepted it.
async fn establish(
    websocket: &TunnelWebsocket,
    events: &mut mpsc::UnboundedReceiver<TunnelEvent>,
    timeout: Duration,
) -> Result<Option<[u8; 3]>, TunnelError> {
    websocket.connect().await?;
    let connected = async {
        loop {
            match events.recv().await {
                Some(TunnelEvent::Connected { routing_id }) => return Ok(routing_id),
                Some(TunnelEvent::Error(e)) => return Err(e),
                Some(TunnelEvent::Message(_)) => {}
                Some(TunnelEvent::Closed) | None => return Err(TunnelError::Closed),
            }
        }
    };
    let result = tokio::time::timeout(timeout, connected)
        .await
        .unwrap_or(Err(TunnelError::Timeout));
    if result.is_err() {
        websocket.close().await;
    }
    result
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// The phone's end: opens a new tunnel for the client that showed a QR code.
pub struct AuthenticatorTunnel {
    connector: Arc<dyn WebsocketConnector>,
    advertiser: Arc<dyn EidAdvertiser>,
    config: HybridConfig,
}

impl AuthenticatorTunnel {
    /// Open tunnels through `connector` and announce them with `advertiser`.
    pub fn new(connector: Arc<dyn WebsocketConnector>, advertiser: Arc<dyn EidAdvertiser>) -> Self {
        Self {
            connector,
            advertiser,
            config: HybridConfig::default(),
        }
    }

    /// Use `config` for the relay and timeouts.
    pub fn with_config(mut self, config: HybridConfig) -> Self {
        self.config = config;
        self
    }

    /// Open a tunnel for the client that showed `qr_code` and advertise its EID.
    pub async fn connect(&self, qr_code: &QrCodeData) -> Result<EstablishedTunnel, TunnelError> {
        let seed = qr_code.seed.as_slice();
        let domain = self.config.relay_domain(0)?;
        let url = new_tunnel_url(&domain, &tunnel_id(seed))?;
        let (websocket, mut events) =
            TunnelWebsocket::new(url, TunnelRole::New, self.connector.clone());

        let routing_id = establish(&websocket, &mut events, self.config.connect_timeout)
            .await?
            .ok_or(TunnelError::MissingRoutingId)?;
        let plaintext = generated_seed(&routing_id, now_millis());
        let eid = generate_eid(&eid_key(seed), &plaintext);
        if let Err(e) = self.advertiser.advertise(eid).await {
            websocket.close().await;
            return Err(e);
        }
        log::debug!("advertising tunnel {routing_id:02x?} on {domain}");

        Ok(EstablishedTunnel {
            websocket,
            events,
            socket_hash_key: socket_hash_key(seed, &plaintext),
        })
    }
}

impl fmt::Debug for AuthenticatorTunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatorTunnel")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The client's end: joins the tunnel a phone advertised.
pub struct ClientTunnel {
    connector: Arc<dyn WebsocketConnector>,
    config: HybridConfig,
}

impl ClientTunnel {
    /// Join tunnels through `connector`.
    pub fn new(connector: Arc<dyn WebsocketConnector>) -> Self {
        Self {
            connector,
            config: HybridConfig::default(),
        }
    }

    /// Use `config` for the relay and timeouts.
    pub fn with_config(mut self, config: HybridConfig) -> Self {
        self.config = config;
        self
    }

    /// Join the tunnel announced by `eid`, which must decrypt under `seed`. Nothing is opened
    /// when it does not.
    pub async fn connect(&self, eid: &[u8], seed: &[u8]) -> Result<EstablishedTunnel, TunnelError> {
        let plaintext = EidPlaintext::parse(decrypt_eid(eid, seed)?)?;
        let domain = self.config.relay_domain(plaintext.domain_id())?;
        let url = connect_tunnel_url(&domain, &plaintext.routing_id(), &tunnel_id(seed))?;
        let (websocket, mut events) =
            TunnelWebsocket::new(url, TunnelRole::Connect, self.connector.clone());

        establish(&websocket, &mut events, self.config.connect_timeout).await?;
        Ok(EstablishedTunnel {
            websocket,
            events,
            socket_hash_key: socket_hash_key(seed, &plaintext),
        })
    }
}

impl fmt::Debug for ClientTunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTunnel")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
