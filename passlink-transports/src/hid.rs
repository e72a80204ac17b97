//! CTAPHID message framing, as seen from the host.
//!
//! <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-errata-20220621.html#usb>

/// The CTAPHID protocol implements the following commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// This command sends an encapsulated CTAP1/U2F message to the device. The semantics of the
    /// data message is defined in the U2F Raw Message Format encoding specification.
    Msg = 0x03,
    /// This command sends an encapsulated CTAP CBOR encoded message. Please note that keep-alive
    /// messages MAY be sent from the device to the client before the response message is returned.
    Cbor = 0x10,
    /// Sent on the broadcast CID, it requests the device to allocate a unique 32-bit channel
    /// identifier (CID) that can be used by the requesting application during its lifetime.
    /// The requesting application generates a nonce that is used to match the response.
    Init = 0x06,
    /// Sends a transaction to the device, which immediately echoes the same data back.
    Ping = 0x01,
    /// Cancel any outstanding requests on this CID. The cancelled request replies with
    /// CTAP2_ERR_KEEPALIVE_CANCEL, the cancel itself is never answered.
    Cancel = 0x11,
    /// This command code is used in response messages only.
    Err = 0x3F,
    /// Sent by the device while processing a request. A KEEPALIVE does not constitute a response
    /// and does therefore not end an ongoing transaction.
    KeepAlive = 0x3B,

    // Optional Commands:
    //---------------------------------------------------------------------------------------------
    /// The wink command performs a vendor-defined action that provides some visual or audible
    /// identification a particular authenticator.
    Wink = 0x08,
    /// The lock command places an exclusive lock for one channel to communicate with the device.
    Lock = 0x04,
}

impl TryFrom<u8> for Command {
    type Error = FramingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x03 => Self::Msg,
            0x10 => Self::Cbor,
            0x06 => Self::Init,
            0x01 => Self::Ping,
            0x11 => Self::Cancel,
            0x3F => Self::Err,
            0x3B => Self::KeepAlive,
            0x08 => Self::Wink,
            0x04 => Self::Lock,
            _ => return Err(FramingError::UnknownCommand(value)),
        })
    }
}

/// Byte used as mask to enable and disable the 7th bit for the command byte. This bit is used to
/// distinguish between the Initial Packet and any subsequent continuation packets.
const PACKET_DESCRIPTOR_BIT: u8 = 1 << 7;

impl Command {
    /// Encodes a command to its byte representation on the wire with the 7th bit always on.
    #[allow(clippy::as_conversions)]
    pub fn encode(self) -> u8 {
        PACKET_DESCRIPTOR_BIT | self as u8
    }
}

/// The channel used before one is allocated with [`Command::Init`].
pub const BROADCAST_CHANNEL: u32 = 0xFFFF_FFFF;

/// Report size of full speed HID devices, used when the endpoint does not say otherwise.
pub const DEFAULT_PACKET_SIZE: usize = 64;

/// Continuation packets carry a 7 bit sequence number.
const MAX_CONTINUATION_PACKETS: usize = 128;

const INIT_HEADER_SIZE: usize = 7;
const CONT_HEADER_SIZE: usize = 5;

/// Errors of the packet layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// The payload does not fit in an initialization packet and 128 continuation packets.
    #[error("a payload of {0} bytes does not fit in a CTAPHID message")]
    PayloadTooBig(usize),
    /// A packet ended inside its header.
    #[error("a packet of {0} bytes is shorter than its header")]
    ShortPacket(usize),
    /// The command byte is not a CTAPHID command.
    #[error("unknown CTAPHID command {0:#04x}")]
    UnknownCommand(u8),
    /// The endpoint's packet size cannot carry a header and payload.
    #[error("a packet size of {0} bytes is too small")]
    PacketSize(usize),
}

/// Largest payload a message can carry with packets of `packet_size` bytes.
pub fn max_payload(packet_size: usize) -> usize {
    let capacity = packet_size.saturating_sub(INIT_HEADER_SIZE)
        + MAX_CONTINUATION_PACKETS * packet_size.saturating_sub(CONT_HEADER_SIZE);
    capacity.min(usize::from(u16::MAX))
}

/// A complete CTAPHID message, which is built from one or many packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel identifier, big endian on the wire.
    pub channel: u32,
    /// Command identifier. This comes from the initialization packet.
    pub command: Command,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a new message for the given channel of the given command type with the data payload.
    pub fn new(channel: u32, command: Command, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel,
            command,
            payload: payload.into(),
        }
    }

    /// Break the message up into zero padded packets of `packet_size` bytes.
    pub fn to_packets(&self, packet_size: usize) -> Result<Vec<Vec<u8>>, FramingError> {
        if packet_size <= INIT_HEADER_SIZE {
            return Err(FramingError::PacketSize(packet_size));
        }
        if self.payload.len() > max_payload(packet_size) {
            return Err(FramingError::PayloadTooBig(self.payload.len()));
        }
        let payload_len = u16::try_from(self.payload.len())
            .map_err(|_| FramingError::PayloadTooBig(self.payload.len()))?;
        let channel = self.channel.to_be_bytes();

        let first_len = self.payload.len().min(packet_size - INIT_HEADER_SIZE);
        let (first, rest) = self.payload.split_at(first_len);

        let mut init = Vec::with_capacity(packet_size);
        init.extend_from_slice(&channel);
        init.push(self.command.encode());
        init.extend_from_slice(&payload_len.to_be_bytes());
        init.extend_from_slice(first);
        init.resize(packet_size, 0);

        let mut packets = vec![init];
        for (seq, chunk) in (0..=0x7f_u8).zip(rest.chunks(packet_size - CONT_HEADER_SIZE)) {
            let mut cont = Vec::with_capacity(packet_size);
            cont.extend_from_slice(&channel);
            cont.push(seq);
            cont.extend_from_slice(chunk);
            cont.resize(packet_size, 0);
            packets.push(cont);
        }
        Ok(packets)
    }
}

/// A parsed packet header with the payload bytes that follow it.
#[derive(Debug, PartialEq, Eq)]
enum Packet<'a> {
    /// Initial packet, standalone or followed by continuation packets.
    Initialization {
        channel: u32,
        command: Command,
        payload_len: usize,
        data: &'a [u8],
    },
    /// Continuation packet for payloads that are larger than the packet size.
    Continuation { channel: u32, seq: u8, data: &'a [u8] },
}

impl<'a> Packet<'a> {
    fn parse(packet: &'a [u8]) -> Result<Self, FramingError> {
        match packet {
            [c0, c1, c2, c3, cmd, rest @ ..] if cmd & PACKET_DESCRIPTOR_BIT != 0 => {
                let [hi, lo, data @ ..] = rest else {
                    return Err(FramingError::ShortPacket(packet.len()));
                };
                Ok(Self::Initialization {
                    channel: u32::from_be_bytes([*c0, *c1, *c2, *c3]),
                    command: Command::try_from(cmd & !PACKET_DESCRIPTOR_BIT)?,
                    payload_len: usize::from(u16::from_be_bytes([*hi, *lo])),
                    data,
                })
            }
            [c0, c1, c2, c3, seq, data @ ..] => Ok(Self::Continuation {
                channel: u32::from_be_bytes([*c0, *c1, *c2, *c3]),
                seq: *seq,
                data,
            }),
            _ => Err(FramingError::ShortPacket(packet.len())),
        }
    }
}

#[derive(Debug)]
struct Partial {
    message: Message,
    expected_len: usize,
    next_seq: u8,
}

impl Partial {
    fn take(&mut self, data: &[u8]) -> bool {
        let remaining = self.expected_len - self.message.payload.len();
        let take = remaining.min(data.len());
        self.message.payload.extend_from_slice(&data[..take]);
        self.message.payload.len() == self.expected_len
    }
}

/// Reassembles the packets read from a device into messages.
///
/// Only one message is in flight at a time. Continuation packets that do not belong to it are
/// dropped, as is a message whose sequence is broken.
#[derive(Debug, Default)]
pub struct MessageReader {
    partial: Option<Partial>,
}

impl MessageReader {
    /// Feed one packet, returning the message it completes.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<Message>, FramingError> {
        match Packet::parse(packet)? {
            Packet::Initialization {
                channel,
                command,
                payload_len,
                data,
            } => {
                if self.partial.is_some() {
                    log::warn!("CTAPHID: new message started before the previous one completed");
                }
                let mut partial = Partial {
                    message: Message::new(channel, command, Vec::with_capacity(payload_len)),
                    expected_len: payload_len,
                    next_seq: 0,
                };
                if partial.take(data) {
                    self.partial = None;
                    Ok(Some(partial.message))
                } else {
                    self.partial = Some(partial);
                    Ok(None)
                }
            }
            Packet::Continuation { channel, seq, data } => {
                let Some(partial) = self.partial.as_mut() else {
                    log::debug!("CTAPHID: dropping continuation packet without a message");
                    return Ok(None);
                };
                if partial.message.channel != channel {
                    log::debug!("CTAPHID: dropping continuation packet for channel {channel:#010x}");
                    return Ok(None);
                }
                if partial.next_seq != seq {
                    log::warn!(
                        "CTAPHID: expected sequence {} but got {seq}, dropping message",
                        partial.next_seq
                    );
                    self.partial = None;
                    return Ok(None);
                }
                partial.next_seq = partial.next_seq.wrapping_add(1);
                if partial.take(data) {
                    Ok(self.partial.take().map(|partial| partial.message))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Forget any partially received message.
    pub fn reset(&mut self) {
        self.partial = None;
    }
}
