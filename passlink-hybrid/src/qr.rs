//! The payload of the QR code a client shows to start a hybrid transaction.
//!
//! The payload is a CBOR map written as decimal digits, so that the QR code can use its compact
//! numeric mode: every 7 bytes become 17 digits.
use std::fmt;

use p256::{elliptic_curve::sec1::ToEncodedPoint, PublicKey};
use passlink_types::cbor::{MapBuilder, MapReader};
use zeroize::Zeroizing;

use crate::TunnelError;

/// URI prefix of the payload.
pub const PREFIX: &str = "FIDO:/";

const CHUNK_LEN: usize = 7;
const CHUNK_DIGITS: usize = 17;
/// Digits used by a trailing chunk of `n` bytes.
const PARTIAL_DIGITS: [usize; CHUNK_LEN] = [0, 3, 5, 8, 10, 13, 15];

/// Number of relay domains a client built against this crate knows about.
const ASSIGNED_DOMAINS: u32 = 2;

/// Write `data` as digits.
pub fn encode_digits(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() / CHUNK_LEN + 1) * CHUNK_DIGITS);
    for chunk in data.chunks(CHUNK_LEN) {
        let mut bytes = [0; 8];
        bytes[..chunk.len()].copy_from_slice(chunk);
        let value = u64::from_le_bytes(bytes);
        let width = if chunk.len() == CHUNK_LEN {
            CHUNK_DIGITS
        } else {
            PARTIAL_DIGITS[chunk.len()]
        };
        out += &format!("{value:0width$}");
    }
    out
}

/// Read digits written by [`encode_digits`].
pub fn decode_digits(digits: &str) -> Result<Vec<u8>, TunnelError> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TunnelError::InvalidQrCode("not a digit string"));
    }
    let tail_len = PARTIAL_DIGITS
        .iter()
        .position(|&n| n == digits.len() % CHUNK_DIGITS)
        .ok_or(TunnelError::InvalidQrCode("impossible number of digits"))?;

    let mut out = Vec::with_capacity(digits.len() / CHUNK_DIGITS * CHUNK_LEN + tail_len);
    let mut rest = digits;
    while !rest.is_empty() {
        let (group, tail) = rest.split_at(rest.len().min(CHUNK_DIGITS));
        rest = tail;
        let len = if group.len() == CHUNK_DIGITS {
            CHUNK_LEN
        } else {
            tail_len
        };
        let value: u64 = group
            .parse()
            .map_err(|_| TunnelError::InvalidQrCode("digit group out of range"))?;
        if value >> (8 * len) != 0 {
            return Err(TunnelError::InvalidQrCode("digit group out of range"));
        }
        out.extend_from_slice(&value.to_le_bytes()[..len]);
    }
    Ok(out)
}

/// Everything the authenticator learns from the QR code.
#[derive(Clone, PartialEq, Eq)]
pub struct QrCodeData {
    /// The client's static key, authenticated during the handshake
    pub public_key: PublicKey,
    /// Secret all tunnel keys are derived from
    pub seed: Zeroizing<[u8; 16]>,
    /// Number of relay domains the client knows about
    pub version: u32,
    /// When the code was shown, in seconds since the epoch
    pub timestamp: i64,
    /// Whether the client asks to be remembered by the phone
    pub linking: bool,
    /// What the client wants to do, for example `"ga"` or `"mc"`
    pub flow: Option<String>,
}

impl QrCodeData {
    /// Payload for a fresh transaction that does not ask for linking.
    pub fn new(public_key: PublicKey, seed: [u8; 16], timestamp: i64) -> Self {
        Self {
            public_key,
            seed: Zeroizing::new(seed),
            version: ASSIGNED_DOMAINS,
            timestamp,
            linking: false,
            flow: None,
        }
    }

    /// Read a scanned `FIDO:/` string.
    pub fn parse(qr_code: &str) -> Result<Self, TunnelError> {
        let digits = qr_code
            .strip_prefix(PREFIX)
            .ok_or(TunnelError::InvalidQrCode("missing FIDO:/ prefix"))?;
        let map = MapReader::from_slice(&decode_digits(digits)?)?;

        let public_key = decompress(&map.required_bytes(0)?)?;
        let seed: [u8; 16] = map
            .required_bytes(1)?
            .try_into()
            .map_err(|_| TunnelError::InvalidQrCode("seed is not 16 bytes"))?;
        let version = map
            .integer(2)?
            .map(u32::try_from)
            .transpose()
            .map_err(|_| TunnelError::InvalidQrCode("version out of range"))?
            .unwrap_or_default();
        let timestamp = map
            .integer(3)?
            .map(i64::try_from)
            .transpose()
            .map_err(|_| TunnelError::InvalidQrCode("timestamp out of range"))?
            .unwrap_or_default();

        Ok(Self {
            public_key,
            seed: Zeroizing::new(seed),
            version,
            timestamp,
            linking: map.bool(4)?.unwrap_or(false),
            flow: map.text(5)?,
        })
    }

    /// The `FIDO:/` string to put in the QR code.
    pub fn encode(&self) -> Result<String, TunnelError> {
        let compressed = self.public_key.to_encoded_point(true);
        let cbor = MapBuilder::new()
            .insert(0, compressed.as_bytes().to_vec())
            .insert(1, self.seed.to_vec())
            .insert(2, self.version)
            .insert(3, self.timestamp)
            .insert(4, self.linking)
            .insert_opt(5, self.flow.as_deref())
            .to_vec()?;
        Ok(format!("{PREFIX}{}", encode_digits(&cbor)))
    }
}

impl fmt::Debug for QrCodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QrCodeData")
            .field("version", &self.version)
            .field("timestamp", &self.timestamp)
            .field("linking", &self.linking)
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

fn decompress(bytes: &[u8]) -> Result<PublicKey, TunnelError> {
    match bytes {
        [0x02 | 0x03, x @ ..] if x.len() == 32 => {}
        _ => return Err(TunnelError::InvalidQrCode("public key is not a compressed point")),
    }
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| TunnelError::InvalidQrCode("public key is not on P-256"))
}
