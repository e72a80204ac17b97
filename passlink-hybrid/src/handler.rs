use std::{
    fmt,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use p256::SecretKey;
use passlink_transports::{
    flow, notify_status, CallerIdentity, DeviceCapabilities, Status, StatusListener, Transport,
    TransportConfig, TransportError, TransportHandler,
};
use passlink_types::webauthn::{AuthenticatorResponse, RequestOptions};
use zeroize::Zeroizing;

use crate::{
    connection::TunnelConnection, noise, qr::QrCodeData, transport::ClientTunnel,
    websocket::WebsocketConnector, HybridConfig, TunnelError,
};

/// What the hybrid transport needs from the platform: a screen for the QR code and a BLE scanner.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
#[async_trait::async_trait]
pub trait HybridLink: Send + Sync {
    /// Show `qr_code` and wait for a phone to advertise, returning the EID from its BLE service
    /// data.
    async fn await_eid(&self, qr_code: &str) -> Result<Vec<u8>, TunnelError>;
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Reaches a phone through a QR code and a caBLE relay.
pub struct HybridTransportHandler {
    link: Arc<dyn HybridLink>,
    identity: SecretKey,
    connector: Arc<dyn WebsocketConnector>,
    supported: bool,
    config: HybridConfig,
    transport_config: TransportConfig,
    listener: Option<Arc<dyn StatusListener>>,
}

impl HybridTransportHandler {
    /// A handler talking to the platform through `link` and to relays through `connector`.
    /// Phones authenticate this host by `identity`, whose public key goes into the QR code.
    pub fn new(
        link: Arc<dyn HybridLink>,
        connector: Arc<dyn WebsocketConnector>,
        identity: SecretKey,
        capabilities: &DeviceCapabilities,
    ) -> Self {
        Self {
            link,
            identity,
            connector,
            supported: Transport::Hybrid.is_available(capabilities),
            config: HybridConfig::default(),
            transport_config: TransportConfig::default(),
            listener: None,
        }
    }

    /// Use `config` for the relay and tunnel timeouts.
    pub fn with_config(mut self, config: HybridConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `config` for the CTAP exchange.
    pub fn with_transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    /// Report progress to `listener`.
    pub fn with_status_listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    async fn connect(&self) -> Result<TunnelConnection, TransportError> {
        let seed = Zeroizing::new(rand::random::<[u8; 16]>());
        let qr_code = QrCodeData::new(self.identity.public_key(), *seed, now_secs()).encode()?;

        notify_status(self.listener.as_ref(), Transport::Hybrid, Status::WaitingForDevice);
        let eid = self.link.await_eid(&qr_code).await?;
        let mut tunnel = ClientTunnel::new(self.connector.clone())
            .with_config(self.config.clone())
            .connect(&eid, seed.as_slice())
            .await?;

        let handshake = noise::initiate(&mut tunnel, &self.identity);
        let crypter = match tokio::time::timeout(self.config.connect_timeout, handshake).await {
            Ok(Ok(crypter)) => crypter,
            Ok(Err(e)) => {
                tunnel.close().await;
                return Err(e.into());
            }
            Err(_) => {
                tunnel.close().await;
                return Err(TunnelError::Timeout.into());
            }
        };
        let crypter = Box::new(crypter);
        Ok(TunnelConnection::open(tunnel, crypter, self.transport_config.ctap2_timeout).await?)
    }
}

impl fmt::Debug for HybridTransportHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridTransportHandler")
            .field("supported", &self.supported)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TransportHandler for HybridTransportHandler {
    fn transport(&self) -> Transport {
        Transport::Hybrid
    }

    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn start(
        &self,
        options: &RequestOptions,
        caller: &CallerIdentity,
    ) -> Result<AuthenticatorResponse, TransportError> {
        let mut connection = self.connect().await?;
        notify_status(self.listener.as_ref(), Transport::Hybrid, Status::WaitingForUser);
        let result = flow::run(&mut connection, options, caller, &self.transport_config).await;
        connection.close().await;
        result
    }
}

#[cfg(test)]
mod tests;
