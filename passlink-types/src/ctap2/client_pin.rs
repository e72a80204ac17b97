//! authenticatorClientPIN with PIN protocol one.
//!
//! <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorClientPIN>
use coset::iana;

use crate::{
    cbor::{DecodeError, EncodeError, MapBuilder, MapReader},
    cose::CoseKey,
};

use super::{Command, Ctap2Command};

/// The only PIN protocol this library speaks.
pub const PIN_PROTOCOL_ONE: u8 = 1;

repr_enum! {
    /// authenticatorClientPIN sub commands
    SubCommand: u8 {
        /// Number of PIN attempts left
        GetRetries: 0x01,
        /// The authenticator's key agreement key
        GetKeyAgreement: 0x02,
        /// Set a new PIN
        SetPin: 0x03,
        /// Change an existing PIN
        ChangePin: 0x04,
        /// Exchange the PIN for a token
        GetPinToken: 0x05,
    }
}

/// The algorithm both sides label their key agreement keys with.
pub const KEY_AGREEMENT_ALGORITHM: iana::Algorithm = iana::Algorithm::ECDH_ES_HKDF_256;

fn request(sub_command: SubCommand) -> MapBuilder {
    MapBuilder::new()
        .insert(0x01, PIN_PROTOCOL_ONE)
        .insert(0x02, u8::from(sub_command))
}

/// Ask for the number of PIN retries left.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GetRetries;

impl Ctap2Command for GetRetries {
    type Response = u8;
    const COMMAND: Command = Command::ClientPin;

    fn encode(&self) -> Result<Option<Vec<u8>>, EncodeError> {
        request(SubCommand::GetRetries).to_vec().map(Some)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<u8, DecodeError> {
        let retries = MapReader::from_slice(bytes)?.required_integer(0x03)?;
        u8::try_from(retries).map_err(|_| DecodeError::InvalidValue {
            field: "retries",
            reason: format!("{retries} is out of range"),
        })
    }
}

/// Ask for the authenticator's ephemeral key agreement key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GetKeyAgreement;

impl Ctap2Command for GetKeyAgreement {
    type Response = CoseKey;
    const COMMAND: Command = Command::ClientPin;

    fn encode(&self) -> Result<Option<Vec<u8>>, EncodeError> {
        request(SubCommand::GetKeyAgreement).to_vec().map(Some)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<CoseKey, DecodeError> {
        let map = MapReader::from_slice(bytes)?;
        let key = map
            .get(0x01)
            .cloned()
            .ok_or_else(|| DecodeError::MissingKey("1".into()))?;
        CoseKey::from_value(key)
    }
}

/// Exchange an encrypted PIN hash for a PIN token.
#[derive(Debug, Clone, PartialEq)]
pub struct GetPinToken {
    /// The platform's ephemeral public key
    pub key_agreement: CoseKey,
    /// AES-256-CBC encryption of the first 16 bytes of SHA-256(PIN) under the shared secret
    pub pin_hash_enc: [u8; 16],
}

impl Ctap2Command for GetPinToken {
    /// The PIN token, still encrypted under the shared secret.
    type Response = Vec<u8>;
    const COMMAND: Command = Command::ClientPin;

    fn encode(&self) -> Result<Option<Vec<u8>>, EncodeError> {
        request(SubCommand::GetPinToken)
            .insert(0x03, self.key_agreement.to_value()?)
            .insert(0x06, self.pin_hash_enc.to_vec())
            .to_vec()
            .map(Some)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let token = MapReader::from_slice(bytes)?.required_bytes(0x02)?;
        // Protocol one tokens are a whole number of AES blocks.
        if token.is_empty() || token.len() % 16 != 0 {
            return Err(DecodeError::InvalidValue {
                field: "pinToken",
                reason: format!("{} bytes is not a multiple of the block size", token.len()),
            });
        }
        Ok(token)
    }
}

/// A key agreement key for the platform side of PIN protocol one.
pub fn platform_key_agreement(x: impl Into<Vec<u8>>, y: impl Into<Vec<u8>>) -> CoseKey {
    CoseKey::new(KEY_AGREEMENT_ALGORITHM, iana::EllipticCurve::P_256, x, y)
}
