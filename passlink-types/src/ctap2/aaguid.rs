use crate::cbor::DecodeError;

/// An Authenticator Attestation GUID is a 128-bit identifier.
///
/// This indicates the type (e.g. make and model) of an Authenticator. U2F authenticators predate
/// it, so credentials registered over CTAP1 and anything attested with `"none"` carry the empty
/// AAGUID of only `0`s.
///
/// <https://w3c.github.io/webauthn/#sctn-authenticator-model>
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Aaguid(pub [u8; Self::LEN]);

impl Aaguid {
    const LEN: usize = 16;

    /// The AAGUID of the platform authenticator, `b93fd961-f2e6-462f-b122-82002247de78`.
    pub const PLATFORM: Self = Self([
        0xb9, 0x3f, 0xd9, 0x61, 0xf2, 0xe6, 0x46, 0x2f, 0xb1, 0x22, 0x82, 0x00, 0x22, 0x47, 0xde,
        0x78,
    ]);

    /// Generate empty AAGUID
    pub const fn new_empty() -> Self {
        Self([0; 16])
    }

    /// Whether this is the all zero AAGUID
    pub fn is_empty(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl From<[u8; 16]> for Aaguid {
    fn from(inner: [u8; 16]) -> Self {
        Aaguid(inner)
    }
}

impl TryFrom<&[u8]> for Aaguid {
    type Error = DecodeError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        value
            .try_into()
            .map(Aaguid)
            .map_err(|_| DecodeError::InvalidValue {
                field: "aaguid",
                reason: format!("byte string of len {} is not of len {}", value.len(), Self::LEN),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::Aaguid;

    #[test]
    fn new_empty_truly_zero() {
        assert_eq!(Aaguid::new_empty().0, [0; 16]);
        assert!(Aaguid::default().is_empty());
        assert!(!Aaguid::PLATFORM.is_empty());
    }

    #[test]
    fn only_sixteen_bytes_convert() {
        let bytes = [
            0x02, 0x2b, 0xeb, 0xfd, 0x62, 0x3c, 0xac, 0x25, 0xce, 0xe4, 0xd0, 0x90, 0xb9, 0xf8,
            0xb5, 0xaf,
        ];
        assert_eq!(Aaguid::try_from(bytes.as_slice()), Ok(Aaguid(bytes)));
        assert!(Aaguid::try_from(&bytes[..15]).is_err());
    }
}
