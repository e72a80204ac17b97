//! Credential identifiers for credentials minted by the platform authenticator.
//!
//! The identifier is self describing: a kind byte, the 32 bytes the key store files the key under,
//! and a hash binding both to the relying party and the public key. Given an identifier from an
//! allow list the platform can look the key up without any other index, and check that the
//! identifier was not replayed for another relying party.

use crate::{
    cbor::DecodeError,
    crypto::{constant_time_eq, sha256_concat},
};

/// Identifier of a platform credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialId {
    kind: u8,
    data: [u8; 32],
    rp_id: String,
    public_key: Vec<u8>,
}

impl CredentialId {
    /// Kind byte for keys protected by the device screen lock.
    pub const PLATFORM_KIND: u8 = 1;

    /// Length of an encoded identifier
    pub const ENCODED_LEN: usize = 1 + 32 + 32;

    /// Create an identifier. `public_key` is the DER encoded SubjectPublicKeyInfo of the
    /// credential.
    pub fn new(
        kind: u8,
        data: [u8; 32],
        rp_id: impl Into<String>,
        public_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            kind,
            data,
            rp_id: rp_id.into(),
            public_key: public_key.into(),
        }
    }

    /// The kind byte
    pub fn kind(&self) -> u8 {
        self.kind
    }

    /// The key store handle
    pub fn data(&self) -> &[u8; 32] {
        &self.data
    }

    /// The relying party the credential is scoped to
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    /// `SHA-256(rp_id ‖ public_key)`
    pub fn binding_hash(&self) -> [u8; 32] {
        sha256_concat([self.rp_id.as_bytes(), self.public_key.as_slice()])
    }

    /// Encode as `kind ‖ data ‖ SHA-256(rp_id ‖ public_key)`.
    pub fn to_vec(&self) -> Vec<u8> {
        std::iter::once(self.kind)
            .chain(self.data)
            .chain(self.binding_hash())
            .collect()
    }

    /// Read back the kind byte and key store handle of an encoded identifier. The binding hash is
    /// not checked, as that needs the public key; use [`Self::matches`] once it has been looked up.
    pub fn decode_type_and_data(encoded: &[u8]) -> Result<(u8, [u8; 32]), DecodeError> {
        match encoded {
            [kind, rest @ ..] if rest.len() >= 32 => {
                let mut data = [0; 32];
                data.copy_from_slice(&rest[..32]);
                Ok((*kind, data))
            }
            _ => Err(DecodeError::Truncated {
                expected: 33,
                actual: encoded.len(),
            }),
        }
    }

    /// Whether `encoded` is exactly the encoding of this identifier.
    pub fn matches(&self, encoded: &[u8]) -> bool {
        constant_time_eq(&self.to_vec(), encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;

    fn credential() -> CredentialId {
        CredentialId::new(
            CredentialId::PLATFORM_KIND,
            [0x42; 32],
            "example.com",
            b"spki bytes".to_vec(),
        )
    }

    #[test]
    fn layout_is_kind_data_hash() {
        let encoded = credential().to_vec();

        assert_eq!(encoded.len(), CredentialId::ENCODED_LEN);
        assert_eq!(encoded[0], 1);
        assert_eq!(&encoded[1..33], &[0x42; 32]);
        assert_eq!(&encoded[33..], &sha256(b"example.comspki bytes"));
    }

    #[test]
    fn type_and_data_survive_decoding() {
        let encoded = credential().to_vec();
        assert_eq!(
            CredentialId::decode_type_and_data(&encoded),
            Ok((1, [0x42; 32]))
        );
        assert_eq!(
            CredentialId::decode_type_and_data(&encoded[..20]),
            Err(DecodeError::Truncated {
                expected: 33,
                actual: 20
            })
        );
    }

    #[test]
    fn binding_hash_ties_the_id_to_its_relying_party() {
        let encoded = credential().to_vec();
        let other_rp = CredentialId::new(1, [0x42; 32], "example.org", b"spki bytes".to_vec());

        assert!(credential().matches(&encoded));
        assert!(!other_rp.matches(&encoded));
    }
}
