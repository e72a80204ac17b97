//! Key derivation and the encrypted identifier (EID) the authenticator advertises over BLE.
//!
//! Everything is derived from the 16 byte seed the client puts in its QR code. The EID proves the
//! advertiser saw that QR code and tells the client which relay and tunnel to join.
use aes::Aes256;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use passlink_types::crypto::{constant_time_eq, hmac_sha256};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::TunnelError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const ZERO_IV: [u8; 16] = [0; 16];

/// Length of an advertised EID: one encrypted block and a truncated tag.
pub const EID_LEN: usize = 20;
const TAG_LEN: usize = 4;

/// What a key is derived for, sent as the HKDF info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyPurpose {
    /// AES and HMAC keys protecting the EID
    EidKey,
    /// The id of the tunnel on the relay
    TunnelId,
    /// The pre-shared key of the handshake, also used to identify the socket
    Psk,
}

impl KeyPurpose {
    fn info(self) -> [u8; 4] {
        let purpose = match self {
            Self::EidKey => 1,
            Self::TunnelId => 2,
            Self::Psk => 3,
        };
        [purpose, 0, 0, 0]
    }
}

/// HKDF-SHA-256 of `ikm` into `N` bytes. An empty salt is the same as 32 zero bytes.
///
/// `N` is at most 96 within this crate, far below the 8160 bytes HKDF-SHA-256 can expand to.
pub(crate) fn hkdf_sha256<const N: usize>(ikm: &[u8], salt: &[u8], info: &[u8]) -> Zeroizing<[u8; N]> {
    let hkdf = Hkdf::<Sha256>::new((!salt.is_empty()).then_some(salt), ikm);
    let mut okm = Zeroizing::new([0; N]);
    if hkdf.expand(info, &mut okm[..]).is_err() {
        unreachable!("HKDF-SHA-256 outputs up to 8160 bytes, keys here are at most 96");
    }
    okm
}

/// Derive an `N` byte key for `purpose` from the QR code seed.
pub(crate) fn derive<const N: usize>(seed: &[u8], salt: &[u8], purpose: KeyPurpose) -> Zeroizing<[u8; N]> {
    hkdf_sha256(seed, salt, &purpose.info())
}

/// The tunnel both sides meet on.
pub fn tunnel_id(seed: &[u8]) -> [u8; 16] {
    let id: Zeroizing<[u8; 16]> = derive(seed, &[], KeyPurpose::TunnelId);
    *id
}

/// The AES-256 key followed by the HMAC key protecting EIDs.
pub fn eid_key(seed: &[u8]) -> Zeroizing<[u8; 64]> {
    derive(seed, &[], KeyPurpose::EidKey)
}

/// The key both sides hand to the handshake once the tunnel is up.
pub fn socket_hash_key(seed: &[u8], plaintext: &EidPlaintext) -> Zeroizing<[u8; 32]> {
    derive(seed, plaintext.as_bytes(), KeyPurpose::Psk)
}

/// Check and decrypt an advertised EID with the key derived from `seed`.
pub fn decrypt_eid(eid: &[u8], seed: &[u8]) -> Result<[u8; 16], TunnelError> {
    if eid.len() != EID_LEN {
        return Err(TunnelError::InvalidEid);
    }
    let key = eid_key(seed);
    let (aes_key, hmac_key) = key.split_at(32);
    let (block, tag) = eid.split_at(EID_LEN - TAG_LEN);

    let expected = Zeroizing::new(hmac_sha256(hmac_key, block));
    if !constant_time_eq(&expected[..TAG_LEN], tag) {
        log::debug!("EID tag does not match");
        return Err(TunnelError::InvalidEid);
    }

    let mut plaintext = Zeroizing::new([0; 16]);
    plaintext.copy_from_slice(block);
    Aes256CbcDec::new(aes_key.into(), &ZERO_IV.into())
        .decrypt_padded_mut::<NoPadding>(&mut plaintext[..])
        .map_err(|_| TunnelError::InvalidEid)?;
    if plaintext[0] != 0 {
        log::debug!("EID has reserved bits set");
        return Err(TunnelError::InvalidEid);
    }
    Ok(*plaintext)
}

/// Encrypt and tag `plaintext` with an EID key from [`eid_key`].
pub fn generate_eid(eid_key: &[u8; 64], plaintext: &EidPlaintext) -> [u8; EID_LEN] {
    let (aes_key, hmac_key) = eid_key.split_at(32);
    let mut block = *plaintext.as_bytes();
    if Aes256CbcEnc::new(aes_key.into(), &ZERO_IV.into())
        .encrypt_padded_mut::<NoPadding>(&mut block, 16)
        .is_err()
    {
        unreachable!("a single block needs no padding");
    }
    let tag = hmac_sha256(hmac_key, &block);

    let mut eid = [0; EID_LEN];
    eid[..16].copy_from_slice(&block);
    eid[16..].copy_from_slice(&tag[..TAG_LEN]);
    eid
}

/// The plaintext of an EID.
///
/// | bytes  | content                        |
/// |--------|--------------------------------|
/// | 0      | reserved, zero                 |
/// | 1..11  | nonce                          |
/// | 11..14 | routing id of the tunnel       |
/// | 14..16 | relay domain id, little endian |
#[derive(Clone, PartialEq, Eq)]
pub struct EidPlaintext([u8; 16]);

impl EidPlaintext {
    /// Wrap a decrypted EID, rejecting reserved bits.
    pub fn parse(plaintext: [u8; 16]) -> Result<Self, TunnelError> {
        if plaintext[0] != 0 {
            return Err(TunnelError::InvalidEid);
        }
        Ok(Self(plaintext))
    }

    /// The routing id the relay assigned to the tunnel.
    pub fn routing_id(&self) -> [u8; 3] {
        [self.0[11], self.0[12], self.0[13]]
    }

    /// Which relay the tunnel lives on, see [`decode_domain`](crate::dga::decode_domain).
    pub fn domain_id(&self) -> u16 {
        u16::from_le_bytes([self.0[14], self.0[15]])
    }

    /// The raw plaintext.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Debug for EidPlaintext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EidPlaintext")
            .field("routing_id", &self.routing_id())
            .field("domain_id", &self.domain_id())
            .finish_non_exhaustive()
    }
}

/// The plaintext an authenticator advertises for a tunnel on relay 0, with the current time in
/// milliseconds as its nonce.
pub fn generated_seed(routing_id: &[u8; 3], timestamp_millis: u64) -> EidPlaintext {
    let mut plaintext = [0; 16];
    plaintext[1..9].copy_from_slice(&timestamp_millis.to_be_bytes());
    plaintext[11..14].copy_from_slice(routing_id);
    EidPlaintext(plaintext)
}
