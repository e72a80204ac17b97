//! Security keys attached over USB.
//!
//! Device access goes through [`UsbHost`] and [`UsbDevice`] so the handler can run on any platform
//! USB stack. A device qualifies when one of its HID interfaces carries the FIDO usage page in its
//! report descriptor.
use std::{fmt, sync::Arc, time::Duration};

use futures_util::future::join_all;
use passlink_types::webauthn::{AuthenticatorResponse, RequestOptions};

use crate::{
    flow,
    handler::{notify_status, CallerIdentity, DeviceCapabilities, Status, StatusListener},
    ConnectionError, Transport, TransportConfig, TransportError, TransportHandler,
};

mod ctaphid;
mod permission;

#[cfg(test)]
pub(crate) mod fake;

pub use self::{ctaphid::CtapHidConnection, permission::PermissionBroker};

/// HID interface class
pub const HID_CLASS: u8 = 0x03;

/// Start of a FIDO report descriptor: usage page 0xF1D0, usage 1.
pub const FIDO_REPORT_DESCRIPTOR_PREFIX: [u8; 5] = [0x06, 0xD0, 0xF1, 0x09, 0x01];

/// Standard device-to-host request on an interface.
const REQUEST_TYPE_INTERFACE_IN: u8 = 0x81;
/// GET_DESCRIPTOR
const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
/// Report descriptor type in the high byte, index 0.
const REPORT_DESCRIPTOR: u16 = 0x2200;
/// Large enough for any FIDO report descriptor.
const REPORT_DESCRIPTOR_LENGTH: usize = 256;

/// Platform identity of an attached device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a platform device name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of an endpoint, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// An endpoint of a [`UsbInterface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbEndpoint {
    /// Endpoint address
    pub address: u8,
    /// Transfer direction
    pub direction: Direction,
    /// Whether this is an interrupt endpoint
    pub interrupt: bool,
    /// Largest packet the endpoint moves at once
    pub max_packet_size: usize,
}

/// An interface of a [`UsbDeviceInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbInterface {
    /// Interface number
    pub number: u8,
    /// Interface class
    pub class: u8,
    /// Its endpoints
    pub endpoints: Vec<UsbEndpoint>,
}

impl UsbInterface {
    /// The IN and OUT endpoints when this looks like a CTAPHID interface: a HID interface with
    /// exactly one interrupt endpoint each way.
    pub fn ctap_endpoints(&self) -> Option<(&UsbEndpoint, &UsbEndpoint)> {
        if self.class != HID_CLASS {
            return None;
        }
        match self.endpoints.as_slice() {
            [a, b] if a.interrupt && b.interrupt => match (a.direction, b.direction) {
                (Direction::In, Direction::Out) => Some((a, b)),
                (Direction::Out, Direction::In) => Some((b, a)),
                _ => None,
            },
            _ => None,
        }
    }
}

/// An attached device as enumerated by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    /// Identity to open the device with
    pub id: DeviceId,
    /// Its interfaces
    pub interfaces: Vec<UsbInterface>,
}

impl UsbDeviceInfo {
    /// Interfaces shaped like a CTAPHID interface.
    pub fn candidates(&self) -> impl Iterator<Item = &UsbInterface> {
        self.interfaces
            .iter()
            .filter(|iface| iface.ctap_endpoints().is_some())
    }
}

/// The platform USB stack.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
#[async_trait::async_trait]
pub trait UsbHost: Send + Sync {
    /// Currently attached devices.
    fn devices(&self) -> Vec<UsbDeviceInfo>;

    /// Whether this process may already talk to `device`.
    fn has_permission(&self, device: &DeviceId) -> bool;

    /// Prompt the user for access to `device`. The answer is delivered to
    /// [`PermissionBroker::on_permission_result`].
    fn request_permission(&self, device: &DeviceId);

    /// Start routing permission answers to the broker.
    fn register_permission_receiver(&self);

    /// Stop routing permission answers to the broker.
    fn unregister_permission_receiver(&self);

    /// Open `device` for transfers.
    async fn open(&self, device: &DeviceId) -> Result<Arc<dyn UsbDevice>, ConnectionError>;
}

/// An opened device.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
#[async_trait::async_trait]
pub trait UsbDevice: Send + Sync {
    /// A control transfer from the device.
    async fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
    ) -> Result<Vec<u8>, ConnectionError>;

    /// Claim exclusive use of an interface.
    async fn claim_interface(&self, interface: u8) -> Result<(), ConnectionError>;

    /// Give a claimed interface back.
    async fn release_interface(&self, interface: u8) -> Result<(), ConnectionError>;

    /// Write one report to an interrupt OUT endpoint.
    async fn write_interrupt(&self, endpoint: u8, data: Vec<u8>) -> Result<(), ConnectionError>;

    /// Read one report from an interrupt IN endpoint, waiting as long as it takes.
    async fn read_interrupt(&self, endpoint: u8, length: usize)
        -> Result<Vec<u8>, ConnectionError>;
}

/// Whether the report descriptor of `interface` announces the FIDO usage page.
pub async fn is_ctap_hid(
    device: &dyn UsbDevice,
    interface: &UsbInterface,
    timeout: Duration,
) -> Result<bool, ConnectionError> {
    let descriptor = tokio::time::timeout(
        timeout,
        device.control_in(
            REQUEST_TYPE_INTERFACE_IN,
            REQUEST_GET_DESCRIPTOR,
            REPORT_DESCRIPTOR,
            u16::from(interface.number),
            REPORT_DESCRIPTOR_LENGTH,
        ),
    )
    .await
    .map_err(|_| ConnectionError::Timeout)??;
    Ok(descriptor.starts_with(&FIDO_REPORT_DESCRIPTOR_PREFIX))
}

/// Reaches security keys plugged into the host.
pub struct UsbTransportHandler {
    host: Arc<dyn UsbHost>,
    broker: Arc<PermissionBroker>,
    supported: bool,
    config: TransportConfig,
    listener: Option<Arc<dyn StatusListener>>,
}

impl UsbTransportHandler {
    /// A handler over `host`, sharing the process wide [`PermissionBroker`].
    pub fn new(host: Arc<dyn UsbHost>, capabilities: &DeviceCapabilities) -> Self {
        Self {
            host,
            broker: PermissionBroker::global(),
            supported: Transport::Usb.is_available(capabilities),
            config: TransportConfig::default(),
            listener: None,
        }
    }

    /// Use `broker` for permission prompts.
    pub fn with_broker(mut self, broker: Arc<PermissionBroker>) -> Self {
        self.broker = broker;
        self
    }

    /// Use `config` for timings.
    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Report progress to `listener`.
    pub fn with_status_listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    async fn probe(&self, info: UsbDeviceInfo) -> Option<(UsbDeviceInfo, UsbInterface)> {
        let interfaces: Vec<_> = info.candidates().cloned().collect();
        if interfaces.is_empty() {
            return None;
        }
        let device = match self.host.open(&info.id).await {
            Ok(device) => device,
            Err(e) => {
                log::debug!("could not open {}: {e}", info.id);
                return None;
            }
        };
        for interface in interfaces {
            match is_ctap_hid(device.as_ref(), &interface, self.config.descriptor_timeout).await {
                Ok(true) => return Some((info, interface)),
                Ok(false) => {}
                Err(e) => log::debug!(
                    "no report descriptor for {} interface {}: {e}",
                    info.id,
                    interface.number
                ),
            }
        }
        None
    }

    /// The first attached security key and its CTAPHID interface.
    pub async fn find_device(&self) -> Option<(UsbDeviceInfo, UsbInterface)> {
        let probes = self.host.devices().into_iter().map(|info| self.probe(info));
        join_all(probes).await.into_iter().flatten().next()
    }
}

impl fmt::Debug for UsbTransportHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbTransportHandler")
            .field("supported", &self.supported)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TransportHandler for UsbTransportHandler {
    fn transport(&self) -> Transport {
        Transport::Usb
    }

    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn start(
        &self,
        options: &RequestOptions,
        caller: &CallerIdentity,
    ) -> Result<AuthenticatorResponse, TransportError> {
        notify_status(self.listener.as_ref(), Transport::Usb, Status::WaitingForDevice);
        let Some((info, interface)) = self.find_device().await else {
            log::debug!("no FIDO interface on any attached USB device");
            return Err(TransportError::NoSuitableDevice);
        };
        if !self.broker.request(&self.host, &info.id).await {
            return Err(TransportError::PermissionDenied);
        }

        let device = self.host.open(&info.id).await?;
        let mut connection = CtapHidConnection::open(device, &interface, self.config).await?;
        notify_status(self.listener.as_ref(), Transport::Usb, Status::WaitingForUser);
        let result = flow::run(&mut connection, options, caller, &self.config).await;
        connection.close().await;
        result
    }

    /// Only the shape of the interfaces is checked, reading descriptors needs I/O.
    fn should_be_used_instantly(&self, _options: &RequestOptions) -> bool {
        self.host
            .devices()
            .iter()
            .any(|info| info.candidates().next().is_some())
    }
}
