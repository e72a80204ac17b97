//! The types defined here are a representation of types defined in the [CTAP 2.1] specification
//! along with authenticator specific types from the [WebAuthn Level 3] specification, seen from the
//! client side: requests are encoded, responses are decoded.
//!
//! [CTAP 2.1]: https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-errata-20220621.html
//! [WebAuthn Level 3]: https://w3c.github.io/webauthn

use std::time::Duration;

use crate::cbor::{DecodeError, EncodeError};

mod aaguid;
mod attestation_fmt;
mod attestation_object;
mod error;
mod flags;

pub mod client_pin;
pub mod get_assertion;
pub mod get_info;
pub mod make_credential;

pub use self::{aaguid::*, attestation_fmt::*, attestation_object::*, error::*, flags::*};

repr_enum! {
    /// Authenticator API command bytes
    ///
    /// <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-errata-20220621.html#commands>
    Command: u8 {
        /// authenticatorMakeCredential
        MakeCredential: 0x01,
        /// authenticatorGetAssertion
        GetAssertion: 0x02,
        /// authenticatorGetInfo
        GetInfo: 0x04,
        /// authenticatorClientPIN
        ClientPin: 0x06,
        /// authenticatorReset
        Reset: 0x07,
        /// authenticatorGetNextAssertion
        GetNextAssertion: 0x08,
        /// authenticatorSelection
        Selection: 0x0B,
    }
}

/// A CTAP2 request a client sends to an authenticator.
///
/// The transport prepends [`Self::COMMAND`] to the encoded parameters and strips the status byte
/// from the response before handing the remainder to [`Self::decode_response`].
pub trait Ctap2Command {
    /// The decoded response
    type Response;

    /// Command byte this request is sent with
    const COMMAND: Command;

    /// Encode the parameters, `None` for commands without any.
    fn encode(&self) -> Result<Option<Vec<u8>>, EncodeError>;

    /// Decode a successful response body.
    fn decode_response(&self, bytes: &[u8]) -> Result<Self::Response, DecodeError>;

    /// How long the authenticator may take, when it differs from the transport default. Commands
    /// waiting on the user should allow for it.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}
