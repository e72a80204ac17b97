//! <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorGetAssertion>
use std::time::Duration;

use crate::{
    cbor::{DecodeError, EncodeError, MapBuilder, MapReader, Value},
    webauthn::PublicKeyCredentialDescriptor,
};

use super::{AuthenticatorData, Command, Ctap2Command};

/// Authenticator options of a getAssertion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Test for user presence. Sent only when false, as true is the default.
    pub up: bool,
    /// Verify the user with a built-in method. Sent only when true.
    pub uv: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self { up: true, uv: false }
    }
}

/// Request parameters for authenticatorGetAssertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// The RP ID
    pub rp_id: String,
    /// Hash of the serialized client data
    pub client_data_hash: [u8; 32],
    /// Acceptable credentials, empty for discoverable credentials
    pub allow_list: Vec<PublicKeyCredentialDescriptor>,
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

impl Ctap2Command for Request {
    type Response = Response;
    const COMMAND: Command = Command::GetAssertion;

    fn encode(&self) -> Result<Option<Vec<u8>>, EncodeError> {
        let allow_list = (!self.allow_list.is_empty()).then(|| {
            Value::Array(
                self.allow_list
                    .iter()
                    .map(PublicKeyCredentialDescriptor::to_cbor)
                    .collect(),
            )
        });
        let options = MapBuilder::new()
            .insert_opt("up", (!self.options.up).then_some(false))
            .insert_opt("uv", self.options.uv.then_some(true));

        MapBuilder::new()
            .insert(0x01, self.rp_id.as_str())
            .insert(0x02, self.client_data_hash.to_vec())
            .insert_opt(0x03, allow_list)
            .insert_opt(0x04, self.extensions.clone())
            .insert_opt(0x05, (!options.is_empty()).then(|| options.build()))
            .insert_opt(0x06, self.pin_auth.map(|auth| auth.to_vec()))
            .insert_opt(0x07, self.pin_protocol)
            .to_vec()
            .map(Some)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Response, DecodeError> {
        Response::from_slice(bytes)
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A successful getAssertion response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The credential the assertion was made with. May be absent when the allow list held exactly
    /// one credential.
    pub credential: Option<PublicKeyCredentialDescriptor>,

    /// The encoded authenticator data, kept as received since the signature covers it.
    pub auth_data: Vec<u8>,

    /// Signature over `authData ‖ clientDataHash`
    pub signature: Vec<u8>,

    /// The user handle, returned for discoverable credentials.
    pub user_id: Option<Vec<u8>>,

    /// Total number of credentials matching the request.
    pub number_of_credentials: Option<u32>,
}

impl Response {
    /// Decode a getAssertion response body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let map = MapReader::from_slice(bytes)?;
        let credential = map
            .map(0x01)?
            .map(|credential| {
                credential
                    .required_bytes("id")
                    .map(PublicKeyCredentialDescriptor::new)
            })
            .transpose()?;
        let user_id = map
            .map(0x04)?
            .map(|user| user.required_bytes("id"))
            .transpose()?;
        let number_of_credentials = map
            .integer(0x05)?
            .map(|n| {
                u32::try_from(n).map_err(|_| DecodeError::InvalidValue {
                    field: "numberOfCredentials",
                    reason: format!("{n} is out of range"),
                })
            })
            .transpose()?;

        Ok(Self {
            credential,
            auth_data: map.required_bytes(0x02)?,
            signature: map.required_bytes(0x03)?,
            user_id,
            number_of_credentials,
        })
    }

    /// Decode the authenticator data.
    pub fn authenticator_data(&self) -> Result<AuthenticatorData, DecodeError> {
        AuthenticatorData::from_slice(&self.auth_data)
    }

    /// The id of the credential used, falling back to the only entry of `allow_list`.
    pub fn credential_id<'a>(&'a self, allow_list: &'a [PublicKeyCredentialDescriptor]) -> Option<&'a [u8]> {
        match (&self.credential, allow_list) {
            (Some(credential), _) => Some(credential.id.as_slice()),
            (None, [only]) => Some(only.id.as_slice()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        Request {
            rp_id: "example.com".into(),
            client_data_hash: [0x42; 32],
            allow_list: vec![PublicKeyCredentialDescriptor::new(vec![1u8, 2, 3])],
            extensions: None,
            options: Options::default(),
            pin_auth: None,
            pin_protocol: None,
            timeout: Some(Duration::from_secs(30)),
        }
    }

    #[test]
    fn default_options_are_not_sent() {
        let map = MapReader::from_slice(&request().encode().unwrap().unwrap()).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.required_text(0x01).unwrap(), "example.com");
        assert!(!map.contains(0x05));
        assert_eq!(request().timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn check_only_and_uv_options() {
        let mut request = request();
        request.options = Options { up: false, uv: true };
        request.allow_list.clear();
        let map = MapReader::from_slice(&request.encode().unwrap().unwrap()).unwrap();
        let options = map.required_map(0x05).unwrap();
        assert_eq!(options.bool("up").unwrap(), Some(false));
        assert_eq!(options.bool("uv").unwrap(), Some(true));
        assert!(!map.contains(0x03));
    }

    #[test]
    fn decode_full_response() {
        let auth_data = AuthenticatorData::new([7; 32], true, true, 12).to_vec().unwrap();
        let bytes = MapBuilder::new()
            .insert(
                0x01,
                MapBuilder::new()
                    .insert("id", vec![9u8; 16])
                    .insert("type", "public-key")
                    .build(),
            )
            .insert(0x02, auth_data.clone())
            .insert(0x03, vec![0x30u8, 0x44])
            .insert(0x04, MapBuilder::new().insert("id", vec![5u8; 8]).build())
            .insert(0x05, 2)
            .to_vec()
            .unwrap();

        let response = request().decode_response(&bytes).unwrap();
        assert_eq!(response.credential_id(&[]), Some(&[9u8; 16][..]));
        assert_eq!(response.auth_data, auth_data);
        assert_eq!(response.signature, vec![0x30, 0x44]);
        assert_eq!(response.user_id, Some(vec![5; 8]));
        assert_eq!(response.number_of_credentials, Some(2));
        assert!(response.authenticator_data().unwrap().user_verified);
    }

    #[test]
    fn credential_falls_back_to_single_allowed() {
        let bytes = MapBuilder::new()
            .insert(0x02, vec![0u8; 37])
            .insert(0x03, vec![1u8])
            .to_vec()
            .unwrap();
        let response = Response::from_slice(&bytes).unwrap();
        let allowed = request().allow_list;
        assert_eq!(response.credential_id(&allowed), Some(&[1u8, 2, 3][..]));
        assert_eq!(response.credential_id(&[]), None);
    }

    #[test]
    fn signature_is_required() {
        let bytes = MapBuilder::new()
            .insert(0x02, vec![0u8; 37])
            .to_vec()
            .unwrap();
        assert_eq!(
            Response::from_slice(&bytes),
            Err(DecodeError::MissingKey("3".into()))
        );
    }
}
