//! Security keys tapped against an NFC reader.
//!
//! Only availability is reported for now, exchanging ISO 7816 APDUs with a tag is left to a
//! platform specific implementation of [`TransportHandler`].
use crate::{handler::DeviceCapabilities, Transport, TransportHandler};

/// NFC handler that knows whether a reader is present.
#[derive(Debug, Clone, Copy)]
pub struct NfcTransportHandler {
    supported: bool,
}

impl NfcTransportHandler {
    /// A handler for a host with `capabilities`.
    pub fn new(capabilities: &DeviceCapabilities) -> Self {
        Self {
            supported: Transport::Nfc.is_available(capabilities),
        }
    }
}

impl TransportHandler for NfcTransportHandler {
    fn transport(&self) -> Transport {
        Transport::Nfc
    }

    fn is_supported(&self) -> bool {
        self.supported
    }
}
