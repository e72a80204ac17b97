//! # Passlink Types
//!
//! Rust type definitions for the binary encodings exchanged between a FIDO2 client platform and a
//! roaming authenticator. This covers:
//!
//! * [`cbor`]: a canonical [CTAP2 CBOR] codec on top of [`ciborium`].
//! * [`cose`]: fixed width [COSE_Key] encoding of elliptic curve public keys.
//! * [`ctap2`]: authenticator data, attestation objects and the CTAP2 commands a client issues.
//! * [`u2f`]: CTAP1/U2F APDUs a client issues and the responses it parses.
//! * [`webauthn`]: the WebAuthn options a relying party sends and the responses handed back.
//!
//! [CTAP2 CBOR]: https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-errata-20220621.html#ctap2-canonical-cbor-encoding-form
//! [COSE_Key]: https://www.rfc-editor.org/rfc/rfc9052#section-7

#[macro_use]
mod utils;

pub mod cbor;
pub mod cose;
pub mod credential_id;
pub mod ctap2;
pub mod u2f;
pub mod webauthn;

// Re-exports
pub use self::{
    cbor::{DecodeError, EncodeError},
    credential_id::CredentialId,
    utils::{
        bytes::{Bytes, NotBase64Encoded},
        crypto, encoding,
        repr_enum::CodeOutOfRange,
    },
};
