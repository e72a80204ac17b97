//! Common types used in both Attestation (registration) and Assertion (authentication).
//!
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::{
    cbor::{MapBuilder, Value},
    utils::serde::{ignore_unknown, ignore_unknown_opt_vec},
    Bytes,
};

#[cfg(doc)]
use crate::webauthn::{PublicKeyCredentialCreationOptions, PublicKeyCredentialRequestOptions};

/// The valid credential types.
///
/// <https://w3c.github.io/webauthn/#enumdef-publickeycredentialtype>
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[typeshare(serialized_as = "String")]
pub enum PublicKeyCredentialType {
    /// The only type defined, the public half of an asymmetric key pair.
    PublicKey,
    /// This is the default as it will be ignored if the value is unknown during deserialization
    #[default]
    Unknown,
}

/// Identifies a specific public key credential. It is used in
/// [`PublicKeyCredentialCreationOptions::exclude_credentials`] to keep an authenticator from
/// registering twice, and in [`PublicKeyCredentialRequestOptions::allow_credentials`] to name the
/// credentials an assertion may be produced with.
///
/// <https://w3c.github.io/webauthn/#dictdef-publickeycredentialdescriptor>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[typeshare]
pub struct PublicKeyCredentialDescriptor {
    /// Client platforms MUST ignore descriptors of an unknown type.
    #[serde(rename = "type", deserialize_with = "ignore_unknown")]
    pub ty: PublicKeyCredentialType,

    /// The credential ID, which for roaming authenticators is usually the U2F key handle.
    pub id: Bytes,

    /// Hint as to how the client might reach the authenticator holding the credential.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "ignore_unknown_opt_vec"
    )]
    pub transports: Option<Vec<AuthenticatorTransport>>,
}

impl PublicKeyCredentialDescriptor {
    /// A public key descriptor for `id` without transport hints.
    pub fn new(id: impl Into<Bytes>) -> Self {
        Self {
            ty: PublicKeyCredentialType::PublicKey,
            id: id.into(),
            transports: None,
        }
    }

    /// Checks whether [`Self::ty`] is not of value [`PublicKeyCredentialType::Unknown`].
    pub fn is_known(&self) -> bool {
        match self.ty {
            PublicKeyCredentialType::PublicKey => true,
            PublicKeyCredentialType::Unknown => false,
        }
    }

    /// The CTAP2 form `{"id": bytes, "type": "public-key"}`. Transport hints are not sent to the
    /// authenticator.
    pub fn to_cbor(&self) -> Value {
        MapBuilder::new()
            .insert("id", self.id.to_vec())
            .insert("type", "public-key")
            .build()
    }
}

/// A Relying Party may require [user verification] for some of its operations but not for others,
/// and may use this type to express its needs.
///
/// <https://w3c.github.io/webauthn/#enumdef-userverificationrequirement>
///
/// [user verification]: https://w3c.github.io/webauthn/#user-verification
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[typeshare(serialized_as = "String")]
pub enum UserVerificationRequirement {
    /// The ceremony fails if the user cannot be verified.
    Required,

    /// Verify the user if possible, but do not fail the operation otherwise.
    #[default]
    Preferred,

    /// The Relying Party does not want user verification employed during the operation.
    Discouraged,
}

/// Hints as to how clients might communicate with a particular authenticator.
///
/// <https://w3c.github.io/webauthn/#enum-transport>
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[typeshare(serialized_as = "String")]
pub enum AuthenticatorTransport {
    /// Removable USB.
    Usb,

    /// Near Field Communication (NFC).
    Nfc,

    /// Bluetooth Low Energy.
    Ble,

    /// A phone reached through a relayed tunnel after a proximity check, formerly known as caBLE.
    #[serde(alias = "cable")]
    Hybrid,

    /// A client device-specific transport, i.e. a platform authenticator.
    Internal,
}

impl AuthenticatorTransport {
    /// The WebAuthn string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Nfc => "nfc",
            Self::Ble => "ble",
            Self::Hybrid => "hybrid",
            Self::Internal => "internal",
        }
    }
}

/// An authenticator's attachment modality.
///
/// <https://w3c.github.io/webauthn/#enumdef-authenticatorattachment>
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[typeshare(serialized_as = "String")]
pub enum AuthenticatorAttachment {
    /// Attached using a client device-specific transport and usually not removable.
    Platform,

    /// Removable authenticators that can roam between client devices.
    CrossPlatform,
}

/// The client extension inputs this platform acts upon. Any other extension is dropped while
/// deserializing.
///
/// <https://w3c.github.io/webauthn/#dictdef-authenticationextensionsclientinputs>
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[typeshare]
pub struct AuthenticationExtensionsClientInputs {
    /// The FIDO AppID extension. During registration it is forwarded as `appidExclude`, during
    /// authentication as `appid`, and CTAP1 authenticators may be retried with its hash in place of
    /// the RP ID hash.
    ///
    /// <https://w3c.github.io/webauthn/#sctn-appid-extension>
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appid: Option<String>,

    /// The user verification method extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uvm: Option<bool>,
}

impl AuthenticationExtensionsClientInputs {
    /// CTAP2 authenticator extension inputs, `None` when there are none. `appid_key` is the name
    /// the AppID is sent under, which differs between registration and authentication.
    pub fn to_cbor(&self, appid_key: &str) -> Option<Value> {
        let map = MapBuilder::new()
            .insert_opt(appid_key, self.appid.as_deref())
            .insert_opt("uvm", self.uvm);
        (!map.is_empty()).then(|| map.build())
    }
}
