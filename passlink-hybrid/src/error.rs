use passlink_transports::{ConnectionError, TransportError};
use passlink_types::{DecodeError, EncodeError};

/// Failures of the hybrid tunnel.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// Only 256 relay domains can be encoded.
    #[error("no relay domain has id {0}")]
    InvalidDomain(u16),
    /// The advertised EID did not decrypt under the seed.
    #[error("the EID does not belong to this seed")]
    InvalidEid,
    /// The QR code payload is not a hybrid payload.
    #[error("invalid QR code: {0}")]
    InvalidQrCode(&'static str),
    /// `connect` was called on a tunnel that was already started.
    #[error("the tunnel was already started")]
    AlreadyConnected,
    /// A frame was sent before the tunnel connected or after it closed.
    #[error("the tunnel is not connected")]
    NotConnected,
    /// The tunnel closed while waiting for it.
    #[error("the tunnel was closed")]
    Closed,
    /// The relay did not assign a routing id to a new tunnel.
    #[error("the relay did not send a routing id")]
    MissingRoutingId,
    /// The websocket failed.
    #[error("websocket failure{}", .0.as_deref().map(|cause| format!(": {cause}")).unwrap_or_default())]
    Socket(Option<String>),
    /// Connecting took longer than allowed.
    #[error("timed out establishing the tunnel")]
    Timeout,
    /// The peer could not be authenticated or a frame did not decrypt.
    #[error("tunnel handshake failed: {0}")]
    Handshake(String),
    /// The BLE advertisement could not be started.
    #[error("could not advertise the EID: {0}")]
    Advertise(String),
    /// A message could not be decoded.
    #[error("malformed tunnel message: {0}")]
    Malformed(#[from] DecodeError),
    /// A message could not be encoded.
    #[error("could not encode a tunnel message: {0}")]
    Encode(#[from] EncodeError),
}

impl From<tokio_tungstenite::tungstenite::Error> for TunnelError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(Some(e.to_string()))
    }
}

impl From<TunnelError> for ConnectionError {
    fn from(e: TunnelError) -> Self {
        match e {
            TunnelError::Timeout => Self::Timeout,
            TunnelError::Closed | TunnelError::NotConnected => Self::Disconnected,
            TunnelError::Malformed(e) => Self::Malformed(e),
            TunnelError::Encode(e) => Self::Encode(e),
            e => Self::Io(e.to_string()),
        }
    }
}

/// A tunnel that cannot be brought up means no authenticator was reached.
impl From<TunnelError> for TransportError {
    fn from(e: TunnelError) -> Self {
        Self::Unavailable(e.to_string())
    }
}
