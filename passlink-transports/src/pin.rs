//! PIN protocol one, as run by the platform.
//!
//! <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#gettingSharedSecret>
use aes::Aes256;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use p256::{ecdh::EphemeralSecret, elliptic_curve::sec1::ToEncodedPoint, PublicKey};
use passlink_types::{
    cose::CoseKey,
    crypto::{hmac_sha256, sha256},
    ctap2::client_pin::{platform_key_agreement, GetKeyAgreement, GetPinToken},
    DecodeError,
};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::{ConnectionError, CtapConnection, CtapConnectionExt};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const ZERO_IV: [u8; 16] = [0; 16];

fn invalid(field: &'static str, reason: impl Into<String>) -> ConnectionError {
    ConnectionError::Malformed(DecodeError::InvalidValue {
        field,
        reason: reason.into(),
    })
}

/// Decode an authenticator's COSE key agreement key into a curve point.
pub(crate) fn public_key(key: &CoseKey) -> Result<PublicKey, ConnectionError> {
    let mut sec1 = vec![0x04];
    sec1.extend(key.fixed_x()?);
    sec1.extend(key.fixed_y()?);
    PublicKey::from_sec1_bytes(&sec1).map_err(|_| invalid("keyAgreement", "not a P-256 point"))
}

/// The platform half of a key agreement: its COSE key and the shared secret.
pub(crate) fn agree(
    authenticator_key: &CoseKey,
) -> Result<(CoseKey, Zeroizing<[u8; 32]>), ConnectionError> {
    let peer = public_key(authenticator_key)?;
    let secret = EphemeralSecret::random(&mut OsRng);
    let shared = secret.diffie_hellman(&peer);
    let shared_secret = Zeroizing::new(sha256(shared.raw_secret_bytes().as_slice()));

    let point = secret.public_key().to_encoded_point(false);
    let (Some(x), Some(y)) = (point.x(), point.y()) else {
        return Err(invalid("keyAgreement", "identity point"));
    };
    Ok((platform_key_agreement(x.to_vec(), y.to_vec()), shared_secret))
}

/// AES-256-CBC with a zero IV over whole blocks.
pub(crate) fn encrypt(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, ConnectionError> {
    let mut buffer = data.to_vec();
    Aes256CbcEnc::new(key.into(), &ZERO_IV.into())
        .encrypt_padded_mut::<NoPadding>(&mut buffer, data.len())
        .map_err(|_| invalid("PIN", "not a whole number of blocks"))?;
    Ok(buffer)
}

/// The inverse of [`encrypt`].
pub(crate) fn decrypt(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, ConnectionError> {
    let mut buffer = data.to_vec();
    Aes256CbcDec::new(key.into(), &ZERO_IV.into())
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| invalid("pinToken", "not a whole number of blocks"))?;
    Ok(buffer)
}

/// Exchange `pin` for a PIN token.
pub async fn get_pin_token(
    connection: &mut dyn CtapConnection,
    pin: &str,
) -> Result<Zeroizing<Vec<u8>>, ConnectionError> {
    let authenticator_key = connection.run_ctap2(&GetKeyAgreement).await?;
    let (key_agreement, shared_secret) = agree(&authenticator_key)?;

    let pin_hash = Zeroizing::new(sha256(pin.as_bytes()));
    let encrypted = encrypt(&shared_secret, &pin_hash[..16])?;
    let mut pin_hash_enc = [0; 16];
    pin_hash_enc.copy_from_slice(&encrypted);

    let encrypted_token = connection
        .run_ctap2(&GetPinToken {
            key_agreement,
            pin_hash_enc,
        })
        .await?;
    log::debug!("received a PIN token of {} bytes", encrypted_token.len());
    Ok(Zeroizing::new(decrypt(&shared_secret, &encrypted_token)?))
}

/// The `pinAuth` parameter proving possession of `token` for `client_data_hash`.
pub fn pin_auth(token: &[u8], client_data_hash: &[u8; 32]) -> [u8; 16] {
    let mut auth = [0; 16];
    auth.copy_from_slice(&hmac_sha256(token, client_data_hash)[..16]);
    auth
}
