use crate::{
    cbor::{self, DecodeError, EncodeError, MapBuilder, MapReader, Value},
    ctap2::AuthenticatorData,
};

/// The attestation object handed back to the relying party after registration.
///
/// The authenticator data is kept in its encoded form: when it comes from an authenticator it is
/// covered by the attestation signature and must be passed on byte for byte.
///
/// <https://w3c.github.io/webauthn/#sctn-attestation>
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationObject {
    /// The attestation statement format identifier
    pub fmt: String,
    /// The attestation statement, a CBOR map whose layout depends on [`Self::fmt`]
    pub att_stmt: Value,
    /// The encoded authenticator data
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    /// Format identifier of attestation objects without a statement
    pub const FMT_NONE: &'static str = "none";
    /// Format identifier of U2F attestation
    pub const FMT_FIDO_U2F: &'static str = "fido-u2f";

    /// Wrap the raw members of an authenticator's makeCredential response.
    pub fn from_parts(fmt: impl Into<String>, att_stmt: Value, auth_data: Vec<u8>) -> Self {
        Self {
            fmt: fmt.into(),
            att_stmt,
            auth_data,
        }
    }

    /// An attestation object with format `"none"` and an empty statement.
    pub fn none(auth_data: &AuthenticatorData) -> Result<Self, EncodeError> {
        Ok(Self::from_parts(
            Self::FMT_NONE,
            Value::Map(Vec::new()),
            auth_data.to_vec()?,
        ))
    }

    /// A `"fido-u2f"` attestation object built from a U2F registration.
    ///
    /// <https://w3c.github.io/webauthn/#sctn-fido-u2f-attestation>
    pub fn fido_u2f(
        auth_data: &AuthenticatorData,
        signature: Vec<u8>,
        certificate: Vec<u8>,
    ) -> Result<Self, EncodeError> {
        let att_stmt = MapBuilder::new()
            .insert("sig", signature)
            .insert("x5c", Value::Array(vec![Value::Bytes(certificate)]))
            .build();
        Ok(Self::from_parts(
            Self::FMT_FIDO_U2F,
            att_stmt,
            auth_data.to_vec()?,
        ))
    }

    /// Encode as the canonical map `{"fmt", "attStmt", "authData"}`.
    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        MapBuilder::new()
            .insert("fmt", self.fmt.as_str())
            .insert("attStmt", self.att_stmt.clone())
            .insert("authData", self.auth_data.clone())
            .to_vec()
    }

    /// Decode an encoded attestation object.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let map = MapReader::from_slice(bytes)?;
        let att_stmt = map
            .get("attStmt")
            .cloned()
            .ok_or_else(|| DecodeError::MissingKey("\"attStmt\"".into()))?;
        Ok(Self {
            fmt: map.required_text("fmt")?,
            att_stmt,
            auth_data: map.required_bytes("authData")?,
        })
    }

    /// Decode the authenticator data.
    pub fn authenticator_data(&self) -> Result<AuthenticatorData, DecodeError> {
        AuthenticatorData::from_slice(&self.auth_data)
    }
}
