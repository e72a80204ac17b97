//! <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorMakeCredential>
use std::time::Duration;

use coset::iana::{self, EnumI64};

use crate::{
    cbor::{DecodeError, EncodeError, MapBuilder, MapReader, Value},
    webauthn::{self, PublicKeyCredentialDescriptor},
};

use super::{AttestationObject, Command, Ctap2Command};

/// The Relying Party as sent to the authenticator, where the RP ID is no longer optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyCredentialRpEntity {
    /// The RP ID the credential is scoped to
    pub id: String,
    /// Display name of the Relying Party
    pub name: Option<String>,
}

impl From<&webauthn::PublicKeyCredentialCreationOptions> for PublicKeyCredentialRpEntity {
    fn from(options: &webauthn::PublicKeyCredentialCreationOptions) -> Self {
        Self {
            id: options.rp_id().to_owned(),
            name: Some(options.rp.name.clone()),
        }
    }
}

/// The user account as sent to the authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyCredentialUserEntity {
    /// The user handle
    pub id: Vec<u8>,
    /// Account identifier for display
    pub name: Option<String>,
    /// Account name for display
    pub display_name: Option<String>,
}

impl From<&webauthn::PublicKeyCredentialUserEntity> for PublicKeyCredentialUserEntity {
    fn from(user: &webauthn::PublicKeyCredentialUserEntity) -> Self {
        Self {
            id: user.id.to_vec(),
            name: Some(user.name.clone()),
            display_name: Some(user.display_name.clone()),
        }
    }
}

/// Authenticator options of a makeCredential request. Options that are false are left out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Create a discoverable credential.
    pub rk: bool,
    /// Verify the user with a built-in method. Must not be set together with `pinAuth`.
    pub uv: bool,
}

/// Request parameters for authenticatorMakeCredential.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Hash of the serialized client data
    pub client_data_hash: [u8; 32],
    /// The Relying Party
    pub rp: PublicKeyCredentialRpEntity,
    /// The user account
    pub user: PublicKeyCredentialUserEntity,
    /// Acceptable algorithms, most preferred first
    pub pub_key_cred_params: Vec<iana::Algorithm>,
    /// Credentials the authenticator must not already hold
    pub exclude_list: Vec<PublicKeyCredentialDescriptor>,
    /// Authenticator extension inputs, a map keyed by extension identifier
    pub extensions: Option<Value>,
    /// Authenticator options
    pub options: Options,
    /// First 16 bytes of HMAC-SHA-256(pinToken, clientDataHash)
    pub pin_auth: Option<[u8; 16]>,
    /// PIN protocol version `pin_auth` was computed with
    pub pin_protocol: Option<u8>,
    /// How long to wait for the user
    pub timeout: Option<Duration>,
}

impl Request {
    fn to_value(&self) -> Value {
        let rp = MapBuilder::new()
            .insert("id", self.rp.id.as_str())
            .insert_opt("name", self.rp.name.as_deref())
            .build();
        let user = MapBuilder::new()
            .insert("id", self.user.id.clone())
            .insert_opt("name", self.user.name.as_deref())
            .insert_opt("displayName", self.user.display_name.as_deref())
            .build();
        let params = self
            .pub_key_cred_params
            .iter()
            .map(|alg| {
                MapBuilder::new()
                    .insert("alg", alg.to_i64())
                    .insert("type", "public-key")
                    .build()
            })
            .collect();
        let exclude_list = (!self.exclude_list.is_empty()).then(|| {
            Value::Array(
                self.exclude_list
                    .iter()
                    .map(PublicKeyCredentialDescriptor::to_cbor)
                    .collect(),
            )
        });
        let options = MapBuilder::new()
            .insert_opt("rk", self.options.rk.then_some(true))
            .insert_opt("uv", self.options.uv.then_some(true));

        MapBuilder::new()
            .insert(0x01, self.client_data_hash.to_vec())
            .insert(0x02, rp)
            .insert(0x03, user)
            .insert(0x04, Value::Array(params))
            .insert_opt(0x05, exclude_list)
            .insert_opt(0x06, self.extensions.clone())
            .insert_opt(0x07, (!options.is_empty()).then(|| options.build()))
            .insert_opt(0x08, self.pin_auth.map(|auth| auth.to_vec()))
            .insert_opt(0x09, self.pin_protocol)
            .build()
    }
}

impl Ctap2Command for Request {
    type Response = AttestationObject;
    const COMMAND: Command = Command::MakeCredential;

    fn encode(&self) -> Result<Option<Vec<u8>>, EncodeError> {
        crate::cbor::to_vec(&self.to_value()).map(Some)
    }

    /// The response `{1: fmt, 2: authData, 3: attStmt}` carries exactly the members of an
    /// attestation object.
    fn decode_response(&self, bytes: &[u8]) -> Result<AttestationObject, DecodeError> {
        let map = MapReader::from_slice(bytes)?;
        let att_stmt = map
            .get(0x03)
            .cloned()
            .ok_or_else(|| DecodeError::MissingKey("3".into()))?;
        Ok(AttestationObject::from_parts(
            map.required_text(0x01)?,
            att_stmt,
            map.required_bytes(0x02)?,
        ))
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctap2::AuthenticatorData;

    fn request() -> Request {
        Request {
            client_data_hash: [0x68; 32],
            rp: PublicKeyCredentialRpEntity {
                id: "example.com".into(),
                name: Some("Example".into()),
            },
            user: PublicKeyCredentialUserEntity {
                id: vec![1, 2, 3],
                name: Some("alex".into()),
                display_name: None,
            },
            pub_key_cred_params: vec![iana::Algorithm::ES256],
            exclude_list: Vec::new(),
            extensions: None,
            options: Options::default(),
            pin_auth: None,
            pin_protocol: None,
            timeout: None,
        }
    }

    #[test]
    fn encodes_required_members_only() {
        let encoded = request().encode().unwrap().unwrap();
        let map = MapReader::from_slice(&encoded).unwrap();

        assert_eq!(map.len(), 4);
        assert_eq!(map.required_bytes(0x01).unwrap(), vec![0x68; 32]);
        let rp = map.required_map(0x02).unwrap();
        assert_eq!(rp.required_text("id").unwrap(), "example.com");
        let user = map.required_map(0x03).unwrap();
        assert!(!user.contains("displayName"));
        let params = map.array(0x04).unwrap().unwrap();
        let param = MapReader::from_value(params[0].clone()).unwrap();
        assert_eq!(param.required_integer("alg").unwrap(), -7);
        assert_eq!(param.required_text("type").unwrap(), "public-key");
    }

    #[test]
    fn encodes_pin_and_options() {
        let mut request = request();
        request.options = Options { rk: true, uv: false };
        request.pin_auth = Some([0xaa; 16]);
        request.pin_protocol = Some(1);
        request.exclude_list = vec![PublicKeyCredentialDescriptor::new(vec![7u8; 8])];

        let map = MapReader::from_slice(&request.encode().unwrap().unwrap()).unwrap();
        let options = map.required_map(0x07).unwrap();
        assert_eq!(options.bool("rk").unwrap(), Some(true));
        assert!(!options.contains("uv"));
        assert_eq!(map.required_bytes(0x08).unwrap(), vec![0xaa; 16]);
        assert_eq!(map.required_integer(0x09).unwrap(), 1);
        assert_eq!(map.array(0x05).unwrap().unwrap().len(), 1);
    }

    #[test]
    fn encoding_is_canonical() {
        let encoded = request().encode().unwrap().unwrap();
        // map(4), key 1, bstr(32)
        assert_eq!(&encoded[..4], &[0xa4, 0x01, 0x58, 0x20]);
        let rp_start = 4 + 32;
        // key 2, then the rp map where "id" sorts first as its encoding is shorter
        assert_eq!(&encoded[rp_start..rp_start + 5], &[0x02, 0xa2, 0x62, b'i', b'd']);
    }

    #[test]
    fn decodes_response_into_attestation_object() {
        let auth_data = AuthenticatorData::new([0x11; 32], true, false, 7)
            .to_vec()
            .unwrap();
        let att_stmt = MapBuilder::new().insert("alg", -7).build();
        let response = MapBuilder::new()
            .insert(0x01, "packed")
            .insert(0x02, auth_data.clone())
            .insert(0x03, att_stmt.clone())
            .to_vec()
            .unwrap();

        let object = request().decode_response(&response).unwrap();
        assert_eq!(object.fmt, "packed");
        assert_eq!(object.auth_data, auth_data);
        assert_eq!(object.att_stmt, att_stmt);
        assert_eq!(object.authenticator_data().unwrap().sign_count, 7);
    }

    #[test]
    fn response_without_statement_is_rejected() {
        let response = MapBuilder::new()
            .insert(0x01, "none")
            .insert(0x02, vec![0u8; 37])
            .to_vec()
            .unwrap();
        assert_eq!(
            request().decode_response(&response),
            Err(DecodeError::MissingKey("3".into()))
        );
    }
}
