//! # Passlink Hybrid
//!
//! The hybrid transport, formerly caBLE v2, lets a phone act as the authenticator of another
//! device. The two never talk directly: the client shows a QR code, the phone answers with a BLE
//! advertisement telling where it opened a tunnel on a relay, and CTAP2 then flows through that
//! websocket tunnel.
//!
//! * [`dga`] and [`relay`] name the relay and the tunnel on it.
//! * [`crypto`] derives the tunnel keys from the QR code seed and seals the EID advertised over BLE.
//! * [`qr`] reads and writes the `FIDO:/` QR code.
//! * [`websocket`] holds one tunnel connection and its lifecycle, [`transport`] builds the
//!   authenticator and client ends on top of it.
//! * [`noise`] runs the handshake over a fresh tunnel and encrypts the frames after it.
//! * [`connection`] speaks CTAP2 over an established tunnel and [`handler`] plugs all of it into
//!   a [`TransportHandler`](passlink_transports::TransportHandler).
//!
//! Showing the QR code and scanning for the phone's advertisement is left to the platform through
//! [`HybridLink`](handler::HybridLink).

mod config;
mod error;

pub mod connection;
pub mod crypto;
pub mod dga;
pub mod frame;
pub mod handler;
pub mod noise;
pub mod qr;
pub mod relay;
pub mod transport;
pub mod websocket;

#[cfg(test)]
mod fake;

#[cfg(any(test, feature = "testable"))]
pub use self::{
    connection::MockTunnelCrypter, handler::MockHybridLink, transport::MockEidAdvertiser,
};
pub use self::{
    config::HybridConfig,
    connection::{TunnelConnection, TunnelCrypter},
    error::TunnelError,
    handler::{HybridLink, HybridTransportHandler},
    noise::NoiseCrypter,
    qr::QrCodeData,
    transport::{AuthenticatorTunnel, ClientTunnel, EidAdvertiser, EstablishedTunnel},
    websocket::{TungsteniteConnector, TunnelWebsocket, WebsocketConnector},
};
