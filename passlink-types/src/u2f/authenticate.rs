use crate::cbor::{DecodeError, EncodeError};

use super::{Ctap1Command, Instruction};

repr_enum! {
    /// The control byte of an authentication request, sent as P1
    AuthenticationParameter: u8 {
        /// Only check whether the key handle was created by this token for the application. A
        /// token that recognizes it answers with "test-of-user-presence required" which, despite
        /// the name, signals success.
        CheckOnly: 0x07,

        /// Sign only once user presence was validated.
        EnforceUserPresence: 0x03,

        /// Sign, with or without validating user presence.
        DontEnforceUserPresence: 0x08,
    }
}

/// This message is used to initiate a U2F token authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationRequest {
    /// Whether the token should sign or only check the key handle
    pub parameter: AuthenticationParameter,
    /// SHA-256 hash of the client data
    pub challenge: [u8; 32],
    /// SHA-256 hash of the application identity, the RP ID or the AppID for WebAuthn
    pub application: [u8; 32],
    /// The key handle obtained during registration
    pub key_handle: Vec<u8>,
}

impl Ctap1Command for AuthenticationRequest {
    type Response = AuthenticationResponse;
    const INSTRUCTION: Instruction = Instruction::Authenticate;

    fn p1(&self) -> u8 {
        self.parameter.into()
    }

    fn data(&self) -> Result<Vec<u8>, EncodeError> {
        let handle_len = u8::try_from(self.key_handle.len()).map_err(|_| EncodeError::TooLong {
            field: "key handle",
            len: self.key_handle.len(),
            max: usize::from(u8::MAX),
        })?;
        Ok(self
            .challenge
            .into_iter()
            .chain(self.application)
            .chain([handle_len])
            .chain(self.key_handle.iter().copied())
            .collect())
    }

    fn decode_response(&self, body: &[u8]) -> Result<AuthenticationResponse, DecodeError> {
        AuthenticationResponse::from_slice(body)
    }
}

/// This message is output by the U2F token after signing an [`AuthenticationRequest`]. Its raw
/// representation is the concatenation of its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResponse {
    /// Bit 0 is set when user presence was verified
    pub user_presence: u8,
    /// Counter value the token increments with every authentication, big endian on the wire.
    pub counter: u32,
    /// ECDSA signature over `application ‖ user presence ‖ counter ‖ challenge`.
    pub signature: Vec<u8>,
}

impl AuthenticationResponse {
    /// Parse `user presence (1) ‖ counter (4) ‖ signature`.
    pub fn from_slice(body: &[u8]) -> Result<Self, DecodeError> {
        match body {
            [user_presence, c0, c1, c2, c3, signature @ ..] => Ok(Self {
                user_presence: *user_presence,
                counter: u32::from_be_bytes([*c0, *c1, *c2, *c3]),
                signature: signature.to_vec(),
            }),
            _ => Err(DecodeError::Truncated {
                expected: 5,
                actual: body.len(),
            }),
        }
    }

    /// Whether the token reported the user as present
    pub fn user_present(&self) -> bool {
        self.user_presence & 0x01 != 0
    }
}
