//! The host end of a CTAPHID channel.
use std::{fmt, sync::Arc, time::Duration};

use passlink_types::{
    ctap2::{get_info, Command as Ctap2Command},
    webauthn::AuthenticatorTransport,
};

use super::{UsbDevice, UsbInterface};
use crate::{
    hid::{Command, Message, MessageReader, BROADCAST_CHANNEL},
    Capabilities, ConnectionError, CtapConnection, CtapConnectionExt, TransportConfig,
};

/// INIT response capability: the device implements WINK.
const CAPABILITY_WINK: u8 = 0x01;
/// INIT response capability: the device implements CBOR.
const CAPABILITY_CBOR: u8 = 0x04;
/// INIT response capability: the device does not implement MSG.
const CAPABILITY_NMSG: u8 = 0x08;

const NONCE_LEN: usize = 8;
/// nonce, channel, protocol version, device version (3), capabilities
const INIT_RESPONSE_LEN: usize = NONCE_LEN + 4 + 1 + 3 + 1;

/// An open CTAPHID channel to a security key.
pub struct CtapHidConnection {
    device: Arc<dyn UsbDevice>,
    interface: u8,
    in_endpoint: u8,
    out_endpoint: u8,
    packet_size: usize,
    channel: u32,
    capabilities: Capabilities,
    reader: MessageReader,
    config: TransportConfig,
}

impl CtapHidConnection {
    /// Claim `interface`, allocate a channel and find out what the key supports.
    pub async fn open(
        device: Arc<dyn UsbDevice>,
        interface: &UsbInterface,
        config: TransportConfig,
    ) -> Result<Self, ConnectionError> {
        let (input, output) = interface
            .ctap_endpoints()
            .ok_or(ConnectionError::Unsupported("CTAPHID interface"))?;
        device.claim_interface(interface.number).await?;

        let mut connection = Self {
            device,
            interface: interface.number,
            in_endpoint: input.address,
            out_endpoint: output.address,
            packet_size: output.max_packet_size,
            channel: BROADCAST_CHANNEL,
            capabilities: Capabilities::empty(),
            reader: MessageReader::default(),
            config,
        };
        if let Err(e) = connection.init().await {
            log::debug!("CTAPHID init failed: {e}");
            connection.close().await;
            return Err(e);
        }
        Ok(connection)
    }

    async fn init(&mut self) -> Result<(), ConnectionError> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        self.send(Message::new(BROADCAST_CHANNEL, Command::Init, nonce))
            .await?;
        let response = self.read_response(self.config.hid_read_timeout).await?;
        let payload = response.payload.as_slice();
        if response.command != Command::Init
            || payload.len() < INIT_RESPONSE_LEN
            || payload[..NONCE_LEN] != nonce
        {
            return Err(ConnectionError::Io("INIT response does not match".into()));
        }

        let mut channel = [0; 4];
        channel.copy_from_slice(&payload[NONCE_LEN..NONCE_LEN + 4]);
        self.channel = u32::from_be_bytes(channel);

        let flags = payload[INIT_RESPONSE_LEN - 1];
        self.capabilities = Capabilities::empty();
        self.capabilities.set(Capabilities::CTAP1, flags & CAPABILITY_NMSG == 0);
        self.capabilities.set(Capabilities::CTAP2, flags & CAPABILITY_CBOR != 0);
        self.capabilities.set(Capabilities::WINK, flags & CAPABILITY_WINK != 0);
        log::debug!(
            "allocated CTAPHID channel {:#010x} with {:?}",
            self.channel,
            self.capabilities
        );

        if self.capabilities.contains(Capabilities::CTAP2) {
            match self.run_ctap2(&get_info::Request).await {
                Ok(info) => self.capabilities |= Capabilities::from_info(&info),
                Err(e) => log::warn!("authenticatorGetInfo failed: {e}"),
            }
        }
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<(), ConnectionError> {
        let packets = message.to_packets(self.packet_size)?;
        log::trace!(
            "sending {:?} of {} bytes in {} packets",
            message.command,
            message.payload.len(),
            packets.len()
        );
        for packet in packets {
            self.device
                .write_interrupt(self.out_endpoint, packet)
                .await?;
        }
        Ok(())
    }

    /// Read the next message for our channel, skipping keep-alives.
    async fn read_message(&mut self) -> Result<Message, ConnectionError> {
        loop {
            let packet = self
                .device
                .read_interrupt(self.in_endpoint, self.packet_size)
                .await?;
            let Some(message) = self.reader.push(&packet)? else {
                continue;
            };
            if message.channel != self.channel {
                log::debug!("dropping message for channel {:#010x}", message.channel);
                continue;
            }
            match message.command {
                Command::KeepAlive => {
                    log::trace!("keep-alive {:02x?}", message.payload.first());
                }
                Command::Err => {
                    return Err(ConnectionError::Io(format!(
                        "CTAPHID error {:02x?}",
                        message.payload.first()
                    )))
                }
                _ => return Ok(message),
            }
        }
    }

    async fn read_response(&mut self, timeout: Duration) -> Result<Message, ConnectionError> {
        self.reader.reset();
        tokio::time::timeout(timeout, self.read_message())
            .await
            .map_err(|_| ConnectionError::Timeout)?
    }

    async fn transact(
        &mut self,
        command: Command,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, ConnectionError> {
        self.send(Message::new(self.channel, command, payload))
            .await?;
        let response = self.read_response(timeout).await?;
        if response.command != command {
            return Err(ConnectionError::Io(format!(
                "expected a {command:?} response, got {:?}",
                response.command
            )));
        }
        Ok(response.payload)
    }

    /// Release the interface. Failures are only logged, the device may already be gone.
    pub async fn close(self) {
        if let Err(e) = self.device.release_interface(self.interface).await {
            log::debug!("releasing interface {} failed: {e}", self.interface);
        }
    }
}

impl fmt::Debug for CtapHidConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CtapHidConnection")
            .field("interface", &self.interface)
            .field("channel", &format_args!("{:#010x}", self.channel))
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl CtapConnection for CtapHidConnection {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn transports(&self) -> Vec<AuthenticatorTransport> {
        vec![AuthenticatorTransport::Usb]
    }

    async fn exchange_ctap1(&mut self, apdu: Vec<u8>) -> Result<Vec<u8>, ConnectionError> {
        self.transact(Command::Msg, apdu, self.config.hid_read_timeout)
            .await
    }

    async fn exchange_ctap2(
        &mut self,
        command: Ctap2Command,
        payload: Option<Vec<u8>>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ConnectionError> {
        let mut body = vec![u8::from(command)];
        body.extend(payload.unwrap_or_default());
        let timeout = timeout.unwrap_or(self.config.hid_read_timeout);
        self.transact(Command::Cbor, body, timeout).await
    }
}
