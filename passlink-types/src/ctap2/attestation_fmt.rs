use std::io::{Cursor, Read};

use crate::{
    cbor::{self, DecodeError, EncodeError, MapReader},
    cose::CoseKey,
    crypto::sha256,
    ctap2::{Aaguid, Flags},
};

/// The authenticator data structure encodes contextual bindings made by the authenticator. These
/// bindings are controlled by the authenticator itself, and derive their trust from the WebAuthn
/// Relying Party's assessment of the security properties of the authenticator.
///
/// The flags byte is never stored: it is derived from the booleans and from which optional members
/// are present when encoding, so it cannot disagree with the data that follows it.
///
/// <https://w3c.github.io/webauthn/#sctn-authenticator-data>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    /// SHA-256 hash of the RP ID the credential is scoped to.
    pub rp_id_hash: [u8; 32],

    /// Whether the user was present, [`Flags::UP`].
    pub user_present: bool,

    /// Whether the user was verified, [`Flags::UV`].
    pub user_verified: bool,

    /// [`Flags::BE`], only ever carried over from an authenticator's response.
    pub backup_eligible: bool,

    /// [`Flags::BS`], only ever carried over from an authenticator's response.
    pub backed_up: bool,

    /// Signature counter, 32-bit unsigned big-endian integer.
    pub sign_count: u32,

    /// Present during registration, see [`AttestedCredentialData`].
    pub attested_credential_data: Option<AttestedCredentialData>,

    /// Extension-defined authenticator data, an already encoded CBOR map. An empty value is treated
    /// as absent.
    pub extensions: Option<Vec<u8>>,
}

impl AuthenticatorData {
    /// Create authenticator data for an RP ID hash without attested credential data or extensions.
    pub fn new(rp_id_hash: [u8; 32], user_present: bool, user_verified: bool, sign_count: u32) -> Self {
        Self {
            rp_id_hash,
            user_present,
            user_verified,
            backup_eligible: false,
            backed_up: false,
            sign_count,
            attested_credential_data: None,
            extensions: None,
        }
    }

    /// Same as [`Self::new`] but hashing the RP ID.
    pub fn for_rp_id(rp_id: &str, user_present: bool, user_verified: bool, sign_count: u32) -> Self {
        Self::new(sha256(rp_id.as_bytes()), user_present, user_verified, sign_count)
    }

    /// Add an [`AttestedCredentialData`] to the authenticator data.
    pub fn with_attested_credential_data(mut self, acd: AttestedCredentialData) -> Self {
        self.attested_credential_data = Some(acd);
        self
    }

    /// Add already encoded extension outputs.
    pub fn with_extensions(mut self, extensions: Vec<u8>) -> Self {
        self.extensions = Some(extensions);
        self
    }

    fn extension_bytes(&self) -> Option<&[u8]> {
        self.extensions.as_deref().filter(|ext| !ext.is_empty())
    }

    /// The flags byte as it will be encoded.
    pub fn flags(&self) -> Flags {
        let mut flags = Flags::empty();
        flags.set(Flags::UP, self.user_present);
        flags.set(Flags::UV, self.user_verified);
        flags.set(Flags::BE, self.backup_eligible);
        flags.set(Flags::BS, self.backed_up);
        flags.set(Flags::AT, self.attested_credential_data.is_some());
        flags.set(Flags::ED, self.extension_bytes().is_some());
        flags
    }

    /// Encode to `rpIdHash ‖ flags ‖ signCount ‖ attestedCredentialData? ‖ extensions?`.
    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let acd = self
            .attested_credential_data
            .as_ref()
            .map(AttestedCredentialData::to_vec)
            .transpose()?;

        Ok(self
            .rp_id_hash
            .into_iter()
            .chain(std::iter::once(self.flags().into()))
            .chain(self.sign_count.to_be_bytes())
            .chain(acd.into_iter().flatten())
            .chain(self.extension_bytes().into_iter().flatten().copied())
            .collect())
    }

    /// Decode an Authenticator data from a byte slice
    pub fn from_slice(v: &[u8]) -> Result<Self, DecodeError> {
        // hash len (32 bytes) + flags (1 byte) + counter (4 bytes)
        if v.len() < 37 {
            return Err(DecodeError::Truncated {
                expected: 37,
                actual: v.len(),
            });
        }
        let (rp_id_hash, v) = v.split_at(32);
        let (flag_byte, v) = v.split_at(1);
        let (counter, rest) = v.split_at(4);
        let flags = Flags::try_from(flag_byte[0])?;

        let mut reader = Cursor::new(rest);
        let attested_credential_data = flags
            .contains(Flags::AT)
            .then(|| AttestedCredentialData::from_reader(&mut reader))
            .transpose()?;

        let consumed = usize::try_from(reader.position()).unwrap_or(rest.len());
        let remaining = &rest[consumed.min(rest.len())..];
        let extensions = if flags.contains(Flags::ED) {
            // Extensions are the last member, they must be exactly one map.
            MapReader::from_slice(remaining)?;
            Some(remaining.to_vec())
        } else if remaining.is_empty() {
            None
        } else {
            return Err(DecodeError::TrailingBytes(remaining.len()));
        };

        let mut hash = [0; 32];
        hash.copy_from_slice(rp_id_hash);
        let mut sign_count = [0; 4];
        sign_count.copy_from_slice(counter);
        Ok(AuthenticatorData {
            rp_id_hash: hash,
            user_present: flags.contains(Flags::UP),
            user_verified: flags.contains(Flags::UV),
            backup_eligible: flags.contains(Flags::BE),
            backed_up: flags.contains(Flags::BS),
            sign_count: u32::from_be_bytes(sign_count),
            attested_credential_data,
            extensions,
        })
    }
}

/// Attested credential data is a variable-length byte array added to the authenticator data when
/// generating an attestation object for a credential
///
/// <https://w3c.github.io/webauthn/#attested-credential-data>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    /// The AAGUID of the authenticator.
    pub aaguid: Aaguid,

    /// The credential ID whose length is prepended to the byte array. This is not public as it
    /// should not be modifiable to be longer than a u16.
    credential_id: Vec<u8>,

    /// The credential public key, already encoded as a COSE_Key.
    public_key: Vec<u8>,
}

impl AttestedCredentialData {
    /// Create a new [AttestedCredentialData]
    ///
    /// # Error
    /// Returns an error if the length of `credential_id` cannot be represented by a u16.
    pub fn new(
        aaguid: Aaguid,
        credential_id: Vec<u8>,
        public_key: Vec<u8>,
    ) -> Result<Self, EncodeError> {
        check_id_len(&credential_id)?;
        Ok(Self {
            aaguid,
            credential_id,
            public_key,
        })
    }

    /// Create a new [AttestedCredentialData] encoding `key` on the way.
    pub fn with_cose_key(
        aaguid: Aaguid,
        credential_id: Vec<u8>,
        key: &CoseKey,
    ) -> Result<Self, EncodeError> {
        Self::new(aaguid, credential_id, key.to_vec()?)
    }

    /// Get read access to the credential ID
    pub fn credential_id(&self) -> &[u8] {
        &self.credential_id
    }

    /// Get read access to the encoded credential public key
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Decode the credential public key
    pub fn cose_key(&self) -> Result<CoseKey, DecodeError> {
        CoseKey::from_slice(&self.public_key)
    }

    /// Encode to `aaguid ‖ len(credentialId) ‖ credentialId ‖ publicKey`.
    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let len = check_id_len(&self.credential_id)?;
        Ok(self
            .aaguid
            .0
            .into_iter()
            .chain(len.to_be_bytes())
            .chain(self.credential_id.iter().copied())
            .chain(self.public_key.iter().copied())
            .collect())
    }

    fn from_reader(reader: &mut Cursor<&[u8]>) -> Result<Self, DecodeError> {
        let available = reader.get_ref().len();
        let truncated = |expected| DecodeError::Truncated {
            expected,
            actual: available,
        };

        let mut aaguid = [0; 16];
        reader.read_exact(&mut aaguid).map_err(|_| truncated(18))?;

        let mut cred_len = [0; 2];
        reader.read_exact(&mut cred_len).map_err(|_| truncated(18))?;
        let cred_len: usize = u16::from_be_bytes(cred_len).into();

        let mut credential_id = vec![0; cred_len];
        reader
            .read_exact(&mut credential_id)
            .map_err(|_| truncated(18 + cred_len))?;

        let start = usize::try_from(reader.position()).unwrap_or(available);
        cbor::from_reader(&mut *reader)?;
        let end = usize::try_from(reader.position()).unwrap_or(available);
        let public_key = reader.get_ref()[start.min(end)..end.min(available)].to_vec();

        Ok(Self {
            aaguid: Aaguid(aaguid),
            credential_id,
            public_key,
        })
    }
}

fn check_id_len(credential_id: &[u8]) -> Result<u16, EncodeError> {
    u16::try_from(credential_id.len()).map_err(|_| EncodeError::TooLong {
        field: "credential id",
        len: credential_id.len(),
        max: u16::MAX.into(),
    })
}
