//! Security keys paired over Bluetooth Low Energy.
use crate::{handler::DeviceCapabilities, Transport, TransportHandler};

/// BLE handler that knows whether an adapter is present. Talking to FIDO GATT services is not
/// implemented, [`TransportHandler::start`] keeps its default.
#[derive(Debug, Clone, Copy)]
pub struct BluetoothTransportHandler {
    supported: bool,
}

impl BluetoothTransportHandler {
    /// A handler for a host with `capabilities`.
    pub fn new(capabilities: &DeviceCapabilities) -> Self {
        Self {
            supported: Transport::Bluetooth.is_available(capabilities),
        }
    }
}

impl TransportHandler for BluetoothTransportHandler {
    fn transport(&self) -> Transport {
        Transport::Bluetooth
    }

    fn is_supported(&self) -> bool {
        self.supported
    }
}
