//! Implementation of the types defined in [WebAuthn Level 3] that a client platform receives from
//! a Relying Party and hands back to it.
//!
//! [WebAuthn Level 3]: https://w3c.github.io/webauthn

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

mod assertion;
mod attestation;
mod client_data;
mod common;

// re-export types
pub use self::{assertion::*, attestation::*, client_data::*, common::*};

/// A request from a Relying Party, either to register a new credential or to sign with an
/// existing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "options", rename_all = "camelCase")]
#[typeshare]
pub enum RequestOptions {
    /// `navigator.credentials.create()`
    Register(PublicKeyCredentialCreationOptions),
    /// `navigator.credentials.get()`
    Sign(PublicKeyCredentialRequestOptions),
}

impl RequestOptions {
    /// The RP ID the request is scoped to.
    pub fn rp_id(&self) -> &str {
        match self {
            Self::Register(options) => options.rp_id(),
            Self::Sign(options) => &options.rp_id,
        }
    }

    /// The Relying Party's challenge.
    pub fn challenge(&self) -> &[u8] {
        match self {
            Self::Register(options) => &options.challenge,
            Self::Sign(options) => &options.challenge,
        }
    }

    /// The client data type a response to this request carries.
    pub fn client_data_type(&self) -> ClientDataType {
        match self {
            Self::Register(_) => ClientDataType::Create,
            Self::Sign(_) => ClientDataType::Get,
        }
    }

    /// The user verification requirement, defaulting to preferred for registrations that do not
    /// state selection criteria.
    pub fn user_verification(&self) -> UserVerificationRequirement {
        match self {
            Self::Register(options) => options
                .authenticator_selection
                .as_ref()
                .map(|s| s.user_verification)
                .unwrap_or_default(),
            Self::Sign(options) => options.user_verification,
        }
    }

    /// The Relying Party's timeout hint in milliseconds.
    pub fn timeout_ms(&self) -> Option<u32> {
        match self {
            Self::Register(options) => options.timeout,
            Self::Sign(options) => options.timeout,
        }
    }
}

/// The response returned for a [`RequestOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "response", rename_all = "camelCase")]
pub enum AuthenticatorResponse {
    /// Answer to [`RequestOptions::Register`]
    Attestation(AuthenticatorAttestationResponse),
    /// Answer to [`RequestOptions::Sign`]
    Assertion(AuthenticatorAssertionResponse),
}

impl AuthenticatorResponse {
    /// The credential ID the response refers to.
    pub fn key_handle(&self) -> &[u8] {
        match self {
            Self::Attestation(response) => &response.key_handle,
            Self::Assertion(response) => &response.key_handle,
        }
    }

    /// The serialized client data.
    pub fn client_data_json(&self) -> &[u8] {
        match self {
            Self::Attestation(response) => &response.client_data_json,
            Self::Assertion(response) => &response.client_data_json,
        }
    }
}
