use std::fmt;

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::{crypto::sha256, encoding};

/// The client data an authenticator signs over, by way of its hash.
///
/// Requests from native apps carry the calling package instead of a web origin. Members are
/// serialized in declaration order and absent ones are left out, so the JSON is stable for a given
/// request.
///
/// <https://w3c.github.io/webauthn/#dictionary-client-data>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedClientData {
    /// [`ClientDataType::Create`] when creating new credentials, [`ClientDataType::Get`] when
    /// getting an assertion.
    #[serde(rename = "type")]
    pub ty: ClientDataType,

    /// The base64url encoding of the challenge provided by the Relying Party.
    pub challenge: String,

    /// The package name of the calling app.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_package_name: Option<String>,

    /// The fully qualified origin of the requester.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl CollectedClientData {
    /// Client data for `challenge` requested by `package`, with the web `origin` when the caller is
    /// a browser.
    pub fn new(
        ty: ClientDataType,
        challenge: &[u8],
        package: Option<&str>,
        origin: Option<&str>,
    ) -> Self {
        Self {
            ty,
            challenge: encoding::base64url(challenge),
            android_package_name: package.map(str::to_owned),
            origin: origin.map(str::to_owned),
        }
    }

    /// The JSON serialization.
    pub fn to_json(&self) -> Vec<u8> {
        // Serializing a struct of strings into a Vec cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// The JSON serialization and its SHA-256 hash.
    pub fn to_json_and_hash(&self) -> (Vec<u8>, [u8; 32]) {
        let json = self.to_json();
        let hash = sha256(&json);
        (json, hash)
    }
}

/// Used to limit the values of [`CollectedClientData::ty`] and serializes to static strings.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[typeshare]
pub enum ClientDataType {
    /// Serializes to the string `"webauthn.create"`
    #[serde(rename = "webauthn.create")]
    Create,

    /// Serializes to the string `"webauthn.get"`
    #[serde(rename = "webauthn.get")]
    Get,
}

impl fmt::Display for ClientDataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "webauthn.create",
            Self::Get => "webauthn.get",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_client_data_layout() {
        let data = CollectedClientData::new(
            ClientDataType::Create,
            &[0xfb, 0xff],
            Some("com.example.app"),
            None,
        );
        assert_eq!(
            String::from_utf8(data.to_json()).unwrap(),
            r#"{"type":"webauthn.create","challenge":"-_8","androidPackageName":"com.example.app"}"#
        );
    }

    #[test]
    fn browser_client_data_has_origin() {
        let data = CollectedClientData::new(
            ClientDataType::Get,
            b"abc",
            Some("com.android.chrome"),
            Some("https://example.com"),
        );
        let (json, hash) = data.to_json_and_hash();
        assert!(String::from_utf8(json.clone())
            .unwrap()
            .ends_with(r#""origin":"https://example.com"}"#));
        assert_eq!(hash, sha256(&json));
        assert_eq!(ClientDataType::Get.to_string(), "webauthn.get");
    }
}
