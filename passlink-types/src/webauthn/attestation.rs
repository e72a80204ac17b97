//! Types used for public key credential creation (registration).
use coset::iana;
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::{
    utils::serde::{i64_to_iana, ignore_unknown},
    webauthn::{
        AuthenticationExtensionsClientInputs, AuthenticatorAttachment, AuthenticatorTransport,
        PublicKeyCredentialDescriptor, PublicKeyCredentialType, UserVerificationRequirement,
    },
    Bytes,
};

/// The options a Relying Party passes when creating a credential.
///
/// <https://w3c.github.io/webauthn/#dictdef-publickeycredentialcreationoptions>
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[typeshare]
pub struct PublicKeyCredentialCreationOptions {
    /// The Relying Party responsible for the request.
    pub rp: PublicKeyCredentialRpEntity,

    /// The user account the credential is created for.
    pub user: PublicKeyCredentialUserEntity,

    /// A challenge that the selected authenticator signs, along with other data, when producing an
    /// attestation object for the newly created credential.
    pub challenge: Bytes,

    /// The key types and signature algorithms the Relying Party supports, ordered from most
    /// preferred to least preferred.
    #[serde(default)]
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,

    /// Time, in milliseconds, the Relying Party is willing to wait for the call to complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,

    /// Credentials that must not be created a second time on the same authenticator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_credentials: Option<Vec<PublicKeyCredentialDescriptor>>,

    /// Requirements regarding authenticator attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_selection: Option<AuthenticatorSelectionCriteria>,

    /// Preference regarding attestation conveyance.
    #[serde(default, deserialize_with = "ignore_unknown")]
    pub attestation: AttestationConveyancePreference,

    /// Client extension inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<AuthenticationExtensionsClientInputs>,
}

impl PublicKeyCredentialCreationOptions {
    /// The RP ID, falling back to the RP's name when the Relying Party left the ID out.
    pub fn rp_id(&self) -> &str {
        self.rp.id.as_deref().unwrap_or(&self.rp.name)
    }

    /// The requested algorithms, or [`PublicKeyCredentialParameters::default_algorithms`] when
    /// the list is empty. Parameters of an unknown type are skipped.
    pub fn algorithms(&self) -> Vec<iana::Algorithm> {
        let params = if self.pub_key_cred_params.is_empty() {
            PublicKeyCredentialParameters::default_algorithms()
        } else {
            self.pub_key_cred_params.clone()
        };
        params
            .into_iter()
            .filter(|p| p.ty == PublicKeyCredentialType::PublicKey)
            .map(|p| p.alg)
            .collect()
    }

    /// Excluded credentials of a known type.
    pub fn excluded(&self) -> impl Iterator<Item = &PublicKeyCredentialDescriptor> {
        self.exclude_credentials
            .iter()
            .flatten()
            .filter(|d| d.is_known())
    }
}

/// The Relying Party a credential is created for.
///
/// <https://w3c.github.io/webauthn/#dictdef-publickeycredentialrpentity>
#[derive(Debug, Serialize, Deserialize, Clone)]
#[typeshare]
pub struct PublicKeyCredentialRpEntity {
    /// The [RP ID]. If omitted, its value will be the requesting origin's effective domain.
    ///
    /// [RP ID]: https://w3c.github.io/webauthn/#rp-id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// A human palatable identifier for the Relying Party, intended only for display.
    pub name: String,
}

/// Additional user account attributes when creating a new credential.
///
/// <https://w3c.github.io/webauthn/#dictdef-publickeycredentialuserentity>
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
#[typeshare]
pub struct PublicKeyCredentialUserEntity {
    /// The user handle of the user account, at most 64 bytes and never empty.
    pub id: Bytes,

    /// A human-palatable name for the user account, intended only for display.
    pub display_name: String,

    /// A human-palatable identifier for a user account, such as "alex.mueller@example.com".
    pub name: String,
}

/// A credential type and algorithm the Relying Party accepts.
///
/// <https://w3c.github.io/webauthn/#dictdef-publickeycredentialparameters>
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[typeshare]
pub struct PublicKeyCredentialParameters {
    /// Client platforms MUST ignore parameters of an unknown type.
    #[serde(rename = "type", deserialize_with = "ignore_unknown")]
    pub ty: PublicKeyCredentialType,

    /// The signature algorithm the credential will be used with.
    #[serde(with = "i64_to_iana")]
    #[typeshare(serialized_as = "I54")] // because i64 fails for js
    pub alg: iana::Algorithm,
}

impl PublicKeyCredentialParameters {
    /// Public key parameters for `alg`
    pub fn new(alg: iana::Algorithm) -> Self {
        Self {
            ty: PublicKeyCredentialType::PublicKey,
            alg,
        }
    }

    /// The algorithms assumed when [`PublicKeyCredentialCreationOptions::pub_key_cred_params`]
    /// comes in empty: ES256 and RS256.
    ///
    /// <https://w3c.github.io/webauthn/#ref-for-list-size>
    pub fn default_algorithms() -> Vec<Self> {
        vec![
            Self::new(iana::Algorithm::ES256),
            Self::new(iana::Algorithm::RS256),
        ]
    }
}

/// Requirements regarding authenticator attributes.
///
/// <https://w3c.github.io/webauthn/#dictdef-authenticatorselectioncriteria>
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[typeshare]
pub struct AuthenticatorSelectionCriteria {
    /// Only authenticators of this attachment modality are eligible.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "ignore_unknown"
    )]
    pub authenticator_attachment: Option<AuthenticatorAttachment>,

    /// Whether a client-side discoverable credential should be created. Takes precedence over
    /// [`Self::require_resident_key`] when present.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "ignore_unknown"
    )]
    pub resident_key: Option<ResidentKeyRequirement>,

    /// Retained for backwards compatibility with WebAuthn Level 1.
    #[serde(default)]
    pub require_resident_key: bool,

    /// User verification requirement for the creation.
    #[serde(default, deserialize_with = "ignore_unknown")]
    pub user_verification: UserVerificationRequirement,
}

/// Requirements for client-side [discoverable credentials].
///
/// <https://w3c.github.io/webauthn/#enumdef-residentkeyrequirement>
///
/// [discoverable credentials]: https://w3c.github.io/webauthn/#client-side-discoverable-credential
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[typeshare(serialized_as = "String")]
pub enum ResidentKeyRequirement {
    /// Create a server-side credential if possible.
    Discouraged,

    /// Create a discoverable credential if possible.
    Preferred,

    /// Fail if a discoverable credential cannot be created.
    Required,
}

/// Preference regarding [attestation conveyance] during credential generation.
///
/// <https://w3c.github.io/webauthn/#enumdef-attestationconveyancepreference>
///
/// [attestation conveyance]: https://w3c.github.io/webauthn/#attestation-conveyance
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[typeshare(serialized_as = "String")]
pub enum AttestationConveyancePreference {
    /// Not interested in authenticator attestation. This is the default, and unknown values fall
    /// back to it.
    #[default]
    None,

    /// A verifiable attestation statement, obtained however the client sees fit.
    Indirect,

    /// The attestation statement as generated by the authenticator.
    Direct,

    /// An attestation statement that may include uniquely identifying information.
    Enterprise,
}

/// The result of a successful registration.
///
/// <https://w3c.github.io/webauthn/#authenticatorattestationresponse>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[typeshare]
pub struct AuthenticatorAttestationResponse {
    /// The credential ID of the new credential, the key handle for U2F authenticators.
    pub key_handle: Bytes,

    /// The JSON-compatible serialization of client data passed to the authenticator.
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Bytes,

    /// The encoded attestation object.
    pub attestation_object: Bytes,

    /// The transports the authenticator was reached over.
    pub transports: Vec<AuthenticatorTransport>,
}
