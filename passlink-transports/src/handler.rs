use std::{collections::BTreeMap, fmt, sync::Arc};

use passlink_types::webauthn::{AuthenticatorResponse, RequestOptions};
use zeroize::Zeroizing;

use crate::TransportError;

/// The ways an authenticator can be reached, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Transport {
    /// Bluetooth Low Energy
    Bluetooth,
    /// Near field communication
    Nfc,
    /// USB HID
    Usb,
    /// A phone reached through a cloud relay, found over BLE
    Hybrid,
}

impl Transport {
    /// Whether the host has the hardware this transport needs.
    pub fn is_available(&self, capabilities: &DeviceCapabilities) -> bool {
        match self {
            Self::Bluetooth => capabilities.bluetooth,
            Self::Nfc => capabilities.nfc,
            Self::Usb => capabilities.usb_host,
            Self::Hybrid => capabilities.bluetooth && capabilities.network,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bluetooth => "bluetooth",
            Self::Nfc => "nfc",
            Self::Usb => "usb",
            Self::Hybrid => "hybrid",
        })
    }
}

/// A snapshot of the radios and adapters the host has.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// A Bluetooth adapter is present
    pub bluetooth: bool,
    /// An NFC reader is present
    pub nfc: bool,
    /// USB host mode is available
    pub usb_host: bool,
    /// The network is reachable
    pub network: bool,
}

/// Who is asking, and what they already provided.
#[derive(Debug, Default, Clone)]
pub struct CallerIdentity {
    /// Package name of a native caller
    pub package: Option<String>,
    /// Web origin when the caller is a browser acting for a site
    pub origin: Option<String>,
    /// A client data hash computed by the caller, used instead of building client data
    pub client_data_hash: Option<[u8; 32]>,
    /// The PIN the user entered, if any
    pub pin: Option<Zeroizing<String>>,
    /// Whether the user was already asked for a PIN
    pub pin_requested: bool,
}

/// Progress reported while a transport runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No usable authenticator is attached yet
    WaitingForDevice,
    /// An authenticator was found and waits on the user
    WaitingForUser,
    /// Anything else
    Unknown,
}

impl Status {
    /// The wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForDevice => "waiting-for-device",
            Self::WaitingForUser => "waiting-for-user",
            Self::Unknown => "unknown",
        }
    }
}

/// Receives status changes of running transports.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
pub trait StatusListener: Send + Sync {
    /// `transport` moved to `status`.
    fn on_status_changed(&self, transport: Transport, status: Status);
}

/// One way of reaching an authenticator.
#[async_trait::async_trait]
pub trait TransportHandler: Send + Sync {
    /// The transport this handler implements.
    fn transport(&self) -> Transport;

    /// Whether the host can use this transport at all.
    fn is_supported(&self) -> bool {
        false
    }

    /// Run `options` against an authenticator reached over this transport.
    async fn start(
        &self,
        _options: &RequestOptions,
        _caller: &CallerIdentity,
    ) -> Result<AuthenticatorResponse, TransportError> {
        Err(TransportError::NotSupported)
    }

    /// Whether to start this transport without asking the user first, for example because a
    /// security key is already plugged in.
    fn should_be_used_instantly(&self, _options: &RequestOptions) -> bool {
        false
    }
}

/// Forward `status` for `transport` to `listener`, if there is one.
pub fn notify_status(
    listener: Option<&Arc<dyn StatusListener>>,
    transport: Transport,
    status: Status,
) {
    log::info!("{transport} transport is {}", status.as_str());
    if let Some(listener) = listener {
        listener.on_status_changed(transport, status);
    }
}

/// Dispatch table from a [`Transport`] to the handler implementing it.
#[derive(Default, Clone)]
pub struct TransportRegistry {
    handlers: BTreeMap<Transport, Arc<dyn TransportHandler>>,
}

impl TransportRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its transport, replacing any previous one.
    pub fn register(mut self, handler: Arc<dyn TransportHandler>) -> Self {
        self.handlers.insert(handler.transport(), handler);
        self
    }

    /// The handler for `transport`.
    pub fn get(&self, transport: Transport) -> Option<&Arc<dyn TransportHandler>> {
        self.handlers.get(&transport)
    }

    /// Transports whose handler is supported on this host, in preference order.
    pub fn supported(&self) -> Vec<Transport> {
        self.handlers
            .iter()
            .filter(|(_, handler)| handler.is_supported())
            .map(|(transport, _)| *transport)
            .collect()
    }

    /// The first supported transport that wants to start right away.
    pub fn instant(&self, options: &RequestOptions) -> Option<Transport> {
        self.handlers
            .iter()
            .find(|(_, handler)| handler.is_supported() && handler.should_be_used_instantly(options))
            .map(|(transport, _)| *transport)
    }

    /// Run `options` over `transport`.
    pub async fn start(
        &self,
        transport: Transport,
        options: &RequestOptions,
        caller: &CallerIdentity,
    ) -> Result<AuthenticatorResponse, TransportError> {
        match self.handlers.get(&transport) {
            Some(handler) if handler.is_supported() => handler.start(options, caller).await,
            _ => Err(TransportError::NotSupported),
        }
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}
