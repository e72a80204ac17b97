//! Messages exchanged inside the encrypted tunnel.
use passlink_types::{
    cbor::{MapBuilder, MapReader, Value},
    DecodeError,
};

use crate::TunnelError;

const SHUTDOWN: u8 = 0x00;
const CTAP: u8 = 0x01;
const UPDATE: u8 = 0x02;
const JSON: u8 = 0x03;

/// A decrypted frame, tagged by its first byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelFrame {
    /// The peer is done with the tunnel.
    Shutdown(Vec<u8>),
    /// A CTAP2 request or response: command or status byte, then CBOR.
    Ctap(Vec<u8>),
    /// Linking information the phone may send at any time.
    Update(Vec<u8>),
    /// A WebAuthn JSON message.
    Json(Vec<u8>),
}

impl TunnelFrame {
    /// The type byte followed by the payload.
    pub fn encode(&self) -> Vec<u8> {
        let (kind, payload) = match self {
            Self::Shutdown(payload) => (SHUTDOWN, payload),
            Self::Ctap(payload) => (CTAP, payload),
            Self::Update(payload) => (UPDATE, payload),
            Self::Json(payload) => (JSON, payload),
        };
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(kind);
        frame.extend_from_slice(payload);
        frame
    }

    /// Split a decrypted message into its type and payload.
    pub fn decode(message: &[u8]) -> Result<Self, TunnelError> {
        let (&kind, payload) = message.split_first().ok_or(DecodeError::Truncated {
            expected: 1,
            actual: 0,
        })?;
        let payload = payload.to_vec();
        match kind {
            SHUTDOWN => Ok(Self::Shutdown(payload)),
            CTAP => Ok(Self::Ctap(payload)),
            UPDATE => Ok(Self::Update(payload)),
            JSON => Ok(Self::Json(payload)),
            other => Err(DecodeError::InvalidValue {
                field: "frame type",
                reason: format!("unknown type {other:#04x}"),
            }
            .into()),
        }
    }
}

/// Features an authenticator can announce after the handshake.
pub mod features {
    /// Digital credentials
    pub const DIGITAL_CREDENTIALS: &str = "dc";
    /// Plain CTAP2 requests
    pub const CTAP: &str = "ctap";
}

/// The first message an authenticator sends through a fresh tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostHandshakeMessage {
    /// Its encoded `authenticatorGetInfo` response
    pub get_info: Option<Vec<u8>>,
    /// What it accepts besides CTAP, see [`features`]
    pub features: Vec<String>,
}

impl PostHandshakeMessage {
    /// Whether `message` is a post-handshake message rather than a [`TunnelFrame`]. It is a bare
    /// CBOR map, whose first byte no frame type uses.
    pub fn matches(message: &[u8]) -> bool {
        matches!(message.first(), Some(0xa0..=0xbf))
    }

    /// The CBOR encoding.
    pub fn encode(&self) -> Result<Vec<u8>, TunnelError> {
        let features = self
            .features
            .iter()
            .map(|feature| Value::from(feature.as_str()))
            .collect();
        Ok(MapBuilder::new()
            .insert_opt(1, self.get_info.clone())
            .insert(3, Value::Array(features))
            .to_vec()?)
    }

    /// Read a message for which [`matches`](Self::matches) holds.
    pub fn decode(message: &[u8]) -> Result<Self, TunnelError> {
        let map = MapReader::from_slice(message)?;
        Ok(Self {
            get_info: map.bytes(1)?,
            features: map.text_array(3)?.unwrap_or_default(),
        })
    }
}
