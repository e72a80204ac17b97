//! Types used for public key authentication

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::{
    utils::serde::ignore_unknown,
    webauthn::{
        AuthenticationExtensionsClientInputs, PublicKeyCredentialDescriptor,
        UserVerificationRequirement,
    },
    Bytes,
};

#[cfg(doc)]
use crate::{ctap2::AuthenticatorData, webauthn::PublicKeyCredentialUserEntity};

/// This type supplies `get()` requests with the data it needs to generate an assertion.
/// Its `challenge` member MUST be present, while its other members are OPTIONAL.
///
/// <https://w3c.github.io/webauthn/#dictdef-publickeycredentialrequestoptions>
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[typeshare]
pub struct PublicKeyCredentialRequestOptions {
    /// A challenge that the authenticator signs when producing an authentication assertion.
    pub challenge: Bytes,

    /// Time, in milliseconds, that the Relying Party is willing to wait for the call to complete.
    /// The value is treated as a hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,

    /// The [RP ID] claimed by the Relying Party. Unlike the browser API this is required, as there
    /// is no origin to derive it from.
    ///
    /// [RP ID]: https://w3c.github.io/webauthn/#rp-id
    pub rp_id: String,

    /// Credentials acceptable to the Relying Party, in descending order of preference. An empty
    /// list asks for a discoverable credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<Vec<PublicKeyCredentialDescriptor>>,

    /// User verification requirement for the assertion.
    #[serde(default, deserialize_with = "ignore_unknown")]
    pub user_verification: UserVerificationRequirement,

    /// Client extension inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<AuthenticationExtensionsClientInputs>,
}

impl PublicKeyCredentialRequestOptions {
    /// Allowed credentials of a known type.
    pub fn allowed(&self) -> impl Iterator<Item = &PublicKeyCredentialDescriptor> {
        self.allow_credentials
            .iter()
            .flatten()
            .filter(|d| d.is_known())
    }

    /// The AppID extension input, if any.
    pub fn appid(&self) -> Option<&str> {
        self.extensions.as_ref()?.appid.as_deref()
    }
}

/// The result of a successful authentication, proving possession of the credential private key.
///
/// <https://w3c.github.io/webauthn/#iface-authenticatorassertionresponse>
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[typeshare]
pub struct AuthenticatorAssertionResponse {
    /// The credential ID the assertion was produced with.
    pub key_handle: Bytes,

    /// The JSON serialization of the client data. It must be preserved byte for byte as the
    /// signature covers its hash.
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Bytes,

    /// The encoded [`AuthenticatorData`].
    pub authenticator_data: Bytes,

    /// The raw signature returned from the authenticator.
    pub signature: Bytes,

    /// The user handle returned from the authenticator, mirroring
    /// [`PublicKeyCredentialUserEntity::id`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<Bytes>,
}
