//! U2F (CTAP1) raw messages as issued by a client.
//!
//! Requests are wrapped in extended length ISO 7816-4 APDUs. A response body is followed by a
//! two byte status word which transports strip before handing the body to
//! [`Ctap1Command::decode_response`].
//!
//! <https://fidoalliance.org/specs/fido-u2f-v1.2-ps-20170411/fido-u2f-raw-message-formats-v1.2-ps-20170411.html>
mod authenticate;
mod register;

pub use {authenticate::*, register::*};

use crate::cbor::{DecodeError, EncodeError};

repr_enum! {
    /// U2F command, determined at the INS position
    Instruction: u8 {
        /// Value of `0x01` with parameters of `P1 = 0x00`, `P2 = 0x00`
        Register: 0x01,
        /// Value of `0x02` with parameters of `P1 = 0x03|0x07|0x08`, `P2 = 0x00`
        Authenticate: 0x02,
        /// Value of `0x03` with parameters of `P1 = 0x00`, `P2 = 0x00`
        Version: 0x03,
    }
}

repr_enum! {
    /// ISO 7816-4 Status Words (`SW_*`)
    ///
    /// Values are taken from <https://fidoalliance.org/specs/fido-u2f-v1.2-ps-20170411/fido-u2f-raw-message-formats-v1.2-ps-20170411.html#h3_status-codes>
    ResponseStatusWords: u16 {
        /// The command completed successfully without error
        NoError: 0x9000,
        /// The request was rejected due to test-of-user-presence being required.
        ConditionsNotSatisfied: 0x6985,
        /// The request was rejected due to an invalid key handle.
        WrongData: 0x6A80,
        /// The length of the request was invalid.
        WrongLength: 0x6700,
        /// The Class byte of the request is not supported. (i.e. CLA != 0)
        ClaNotSupported: 0x6E00,
        /// The Instruction of the request is not supported.
        InsNotSupported: 0x6D00,
    }
}

impl ResponseStatusWords {
    /// Transform a `ResponseStatusWords` to a `u16` as postfix without needing to specify the type.
    pub fn as_primitive(self) -> u16 {
        self.into()
    }
}

/// Largest payload an extended length APDU can carry.
pub const MAX_APDU_DATA: usize = 0xFFFF;

/// Encode an extended length APDU: `CLA=0 ‖ INS ‖ P1 ‖ P2 ‖ 0x00 ‖ Lc (2 bytes) ‖ data ‖ Le=0x0000`.
pub fn encode_apdu(ins: Instruction, p1: u8, p2: u8, data: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let lc = u16::try_from(data.len()).map_err(|_| EncodeError::TooLong {
        field: "APDU data",
        len: data.len(),
        max: MAX_APDU_DATA,
    })?;
    let mut apdu = Vec::with_capacity(data.len() + 9);
    apdu.extend_from_slice(&[0x00, ins.into(), p1, p2, 0x00]);
    apdu.extend_from_slice(&lc.to_be_bytes());
    apdu.extend_from_slice(data);
    apdu.extend_from_slice(&[0x00, 0x00]);
    Ok(apdu)
}

/// Split a raw response into its body and trailing status word.
pub fn split_status_word(response: &[u8]) -> Result<(&[u8], u16), DecodeError> {
    match response.len().checked_sub(2) {
        Some(split) => {
            let (body, sw) = response.split_at(split);
            Ok((body, u16::from_be_bytes([sw[0], sw[1]])))
        }
        None => Err(DecodeError::Truncated {
            expected: 2,
            actual: response.len(),
        }),
    }
}

/// A U2F request a client sends to an authenticator.
pub trait Ctap1Command {
    /// The decoded response
    type Response;

    /// Instruction byte of the request
    const INSTRUCTION: Instruction;

    /// First parameter byte
    fn p1(&self) -> u8 {
        0
    }

    /// The request data
    fn data(&self) -> Result<Vec<u8>, EncodeError>;

    /// Decode a response body whose status word was [`ResponseStatusWords::NoError`].
    fn decode_response(&self, body: &[u8]) -> Result<Self::Response, DecodeError>;

    /// The complete APDU
    fn apdu(&self) -> Result<Vec<u8>, EncodeError> {
        encode_apdu(Self::INSTRUCTION, self.p1(), 0, &self.data()?)
    }
}

/// Ask for the U2F protocol version, which answers `U2F_V2`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VersionRequest;

impl Ctap1Command for VersionRequest {
    type Response = String;
    const INSTRUCTION: Instruction = Instruction::Version;

    fn data(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(Vec::new())
    }

    fn decode_response(&self, body: &[u8]) -> Result<String, DecodeError> {
        String::from_utf8(body.to_vec()).map_err(|e| DecodeError::InvalidValue {
            field: "version",
            reason: e.to_string(),
        })
    }
}
