use crate::cbor::{DecodeError, EncodeError};

use super::{Ctap1Command, Instruction};

/// Request payload to register a new key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// SHA256 hash of the client data
    pub challenge: [u8; 32],
    /// SHA256 of the application identity, the RP ID for WebAuthn
    pub application: [u8; 32],
}

impl Ctap1Command for RegisterRequest {
    type Response = RegisterResponse;
    const INSTRUCTION: Instruction = Instruction::Register;

    fn data(&self) -> Result<Vec<u8>, EncodeError> {
        Ok([self.challenge, self.application].concat())
    }

    fn decode_response(&self, body: &[u8]) -> Result<RegisterResponse, DecodeError> {
        RegisterResponse::from_slice(body)
    }
}

/// Register response payload
///
/// This message is output by the U2F token once it created a new keypair in response to the
/// registration request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    /// The (uncompressed) x,y-representation of a curve point on the P-256 NIST elliptic curve.
    pub public_key: PublicKey,

    /// A handle that allows the U2F token to identify the generated key pair.
    pub key_handle: Vec<u8>,

    /// A certificate in X.509 DER format.
    pub attestation_certificate: Vec<u8>,

    /// ECDSA signature over `0x00 ‖ application ‖ challenge ‖ key handle ‖ public key`.
    pub signature: Vec<u8>,
}

/// Reserved first byte of every registration response.
const RESERVED: u8 = 0x05;

impl RegisterResponse {
    /// Parse `0x05 ‖ public key (65) ‖ L ‖ key handle (L) ‖ certificate ‖ signature`.
    ///
    /// The certificate has no length prefix of its own, its DER header determines where it ends.
    pub fn from_slice(body: &[u8]) -> Result<Self, DecodeError> {
        let (&reserved, rest) = body.split_first().ok_or(DecodeError::Truncated {
            expected: 1,
            actual: 0,
        })?;
        if reserved != RESERVED {
            return Err(DecodeError::InvalidValue {
                field: "reserved byte",
                reason: format!("expected 0x05, got {reserved:#04x}"),
            });
        }
        let (public_key, rest) = take(rest, PublicKey::LEN, body.len())?;
        let public_key = PublicKey::from_slice(public_key)?;

        let (&handle_len, rest) = rest.split_first().ok_or(DecodeError::Truncated {
            expected: 1 + PublicKey::LEN + 1,
            actual: body.len(),
        })?;
        let (key_handle, rest) = take(rest, usize::from(handle_len), body.len())?;

        let cert_len = der_length(rest)?;
        let (certificate, signature) = take(rest, cert_len, body.len())?;

        Ok(Self {
            public_key,
            key_handle: key_handle.to_vec(),
            attestation_certificate: certificate.to_vec(),
            signature: signature.to_vec(),
        })
    }
}

fn take(data: &[u8], len: usize, total: usize) -> Result<(&[u8], &[u8]), DecodeError> {
    if data.len() < len {
        return Err(DecodeError::Truncated {
            expected: total - data.len() + len,
            actual: total,
        });
    }
    Ok(data.split_at(len))
}

/// Total length, header included, of the DER element at the start of `data`.
fn der_length(data: &[u8]) -> Result<usize, DecodeError> {
    let invalid = |reason: &str| DecodeError::InvalidValue {
        field: "attestation certificate",
        reason: reason.into(),
    };
    match data {
        [0x30, len, ..] if *len < 0x80 => Ok(2 + usize::from(*len)),
        [0x30, 0x81, len, ..] => Ok(3 + usize::from(*len)),
        [0x30, 0x82, hi, lo, ..] => Ok(4 + usize::from(u16::from_be_bytes([*hi, *lo]))),
        [0x30, ..] if data.len() < 4 => Err(DecodeError::Truncated {
            expected: 4,
            actual: data.len(),
        }),
        [0x30, ..] => Err(invalid("unsupported length encoding")),
        [] => Err(DecodeError::Truncated {
            expected: 2,
            actual: 0,
        }),
        _ => Err(invalid("not a DER sequence")),
    }
}

/// U2F public key is the concatenation of `0x04 | x | y` where `0x04` signifies ecc uncompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    /// X coordinate of the ECC public key
    pub x: [u8; 32],
    /// Y coordinate of the ECC public key
    pub y: [u8; 32],
}

impl PublicKey {
    /// Length of the uncompressed point encoding
    pub const LEN: usize = 65;

    /// Parse an uncompressed SEC1 point.
    pub fn from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        match data {
            [0x04, coordinates @ ..] if coordinates.len() == 64 => {
                let (x, y) = coordinates.split_at(32);
                let mut key = Self {
                    x: [0; 32],
                    y: [0; 32],
                };
                key.x.copy_from_slice(x);
                key.y.copy_from_slice(y);
                Ok(key)
            }
            _ => Err(DecodeError::InvalidValue {
                field: "public key",
                reason: "not an uncompressed P-256 point".into(),
            }),
        }
    }

    /// Encode a Public key into an iterator
    pub fn encode(self) -> impl Iterator<Item = u8> {
        [0x04].into_iter().chain(self.x).chain(self.y)
    }
}
