//! # Passlink Transports
//!
//! The ways a client platform reaches a roaming FIDO2 authenticator, and the WebAuthn
//! registration and authentication flows run over them.
//!
//! * [`CtapConnection`] is one open channel to an authenticator, speaking CTAP1 and/or CTAP2.
//! * [`flow`] turns [`RequestOptions`](passlink_types::webauthn::RequestOptions) into commands on
//!   such a connection, picking the protocol and handling PINs.
//! * [`TransportHandler`] finds an authenticator over one transport and runs the flow, the
//!   [`TransportRegistry`] dispatches between them.
//! * [`usb`] implements the USB HID transport on top of the [CTAPHID](hid) framing.
//!
//! Hybrid (caBLE) lives in its own crate as it pulls in a network stack.

mod config;
mod connection;
mod error;
mod handler;

pub mod bluetooth;
pub mod flow;
pub mod hid;
pub mod nfc;
pub mod pin;
pub mod usb;

#[cfg(any(test, feature = "testable"))]
pub use self::connection::MockCtapConnection;
#[cfg(any(test, feature = "testable"))]
pub use self::handler::MockStatusListener;
pub use self::{
    config::TransportConfig,
    connection::{Capabilities, CtapConnection, CtapConnectionExt},
    error::{ConnectionError, ErrorCode, TransportError},
    handler::{
        notify_status, CallerIdentity, DeviceCapabilities, Status, StatusListener, Transport,
        TransportHandler, TransportRegistry,
    },
};
