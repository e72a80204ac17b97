//! # Passlink
//!
//! Passlink lets a client platform use roaming FIDO2 authenticators: security keys plugged into
//! USB, tapped against NFC or paired over BLE, and phones reached through the hybrid transport.
//! It is comprised of three sub-libraries:
//!
//! - `passlink-types` - usable as [`types`], the CBOR and COSE codec, the CTAP1 and CTAP2 messages
//!   and the WebAuthn types the platform hands in and gets back.
//! - `passlink-transports` - usable as [`transports`], the [`TransportHandler`] abstraction, the
//!   registration and authentication flows and the USB HID transport.
//! - `passlink-hybrid` - usable as [`hybrid`], the caBLE tunnel to a phone.
//!
//! The platform describes its hardware with a [`DeviceCapabilities`], registers one handler per
//! transport and starts the one the user picked, or the one that wants to run right away:
//!
//! ```
//! use std::sync::Arc;
//!
//! use passlink::transports::{
//!     bluetooth::BluetoothTransportHandler, nfc::NfcTransportHandler, DeviceCapabilities,
//!     Transport, TransportRegistry,
//! };
//! use passlink::types::webauthn::RequestOptions;
//!
//! let laptop = DeviceCapabilities {
//!     bluetooth: true,
//!     nfc: false,
//!     usb_host: true,
//!     network: true,
//! };
//! let registry = TransportRegistry::new()
//!     .register(Arc::new(NfcTransportHandler::new(&laptop)))
//!     .register(Arc::new(BluetoothTransportHandler::new(&laptop)));
//! assert_eq!(registry.supported(), vec![Transport::Bluetooth]);
//!
//! let options: RequestOptions = serde_json::from_str(
//!     r#"{"type":"sign","options":{"challenge":"AQID","rpId":"example.com"}}"#,
//! )
//! .unwrap();
//! assert_eq!(registry.instant(&options), None);
//! ```
//!
//! USB and hybrid need the platform underneath them: a
//! [`UsbHost`](transports::usb::UsbHost) for the first, a [`HybridLink`](hybrid::HybridLink), a
//! websocket connector and the host's identity key for the second.
//!
//! [`TransportHandler`]: transports::TransportHandler
//! [`DeviceCapabilities`]: transports::DeviceCapabilities

pub use passlink_hybrid as hybrid;
pub use passlink_transports as transports;
pub use passlink_types as types;
