//! The handshake that keys a hybrid tunnel and the crypter of the frames after it.
//!
//! The pattern is Noise KNpsk0 over P-256, AES-256-GCM and SHA-256. The client's static key is
//! known to the phone from the QR code and the pre-shared key is the
//! [socket hash key](EstablishedTunnel::socket_hash_key) of the tunnel, so only the phone that
//! scanned the QR code and decrypted nothing but its own EID can complete it.
//!
//! | message | sender | content                                  |
//! |---------|--------|------------------------------------------|
//! | 1       | client | ephemeral key ‖ tag of an empty payload  |
//! | 2       | phone  | ephemeral key ‖ tag of an empty payload  |
//!
//! Both ends then split the chaining key into one key per direction.
use std::fmt;

use aes_gcm::{
    aead::{Aead, Payload},
    Aes256Gcm, KeyInit, Nonce,
};
use p256::{ecdh::diffie_hellman, elliptic_curve::sec1::ToEncodedPoint, PublicKey, SecretKey};
use passlink_types::crypto::sha256_concat;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::{
    connection::TunnelCrypter, crypto::hkdf_sha256, frame::PostHandshakeMessage,
    transport::EstablishedTunnel, TunnelError,
};

const PROTOCOL_NAME: &[u8] = b"Noise_KNpsk0_P256_AESGCM_SHA256";

/// Prologue of handshakes started from a QR code.
const QR_PROLOGUE: [u8; 1] = [1];

/// An uncompressed P-256 point.
const POINT_LEN: usize = 65;
const TAG_LEN: usize = 16;

/// Length of both handshake messages.
pub const HANDSHAKE_LEN: usize = POINT_LEN + TAG_LEN;

/// Frames are padded to a multiple of this many bytes, the last of which counts the padding.
const PADDING_GRANULARITY: usize = 32;

fn failed(reason: &str) -> TunnelError {
    TunnelError::Handshake(reason.into())
}

fn uncompressed(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes().to_vec()
}

fn ecdh(secret: &SecretKey, public: &PublicKey) -> Zeroizing<[u8; 32]> {
    let shared = diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let mut bytes = Zeroizing::new([0; 32]);
    bytes.copy_from_slice(shared.raw_secret_bytes().as_slice());
    bytes
}

/// The AES-GCM nonce of message number `counter`: big endian in the last bytes.
fn nonce(counter: u32) -> [u8; 12] {
    let mut nonce = [0; 12];
    nonce[8..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

fn seal(key: &[u8; 32], counter: u32, msg: &[u8], aad: &[u8]) -> Result<Vec<u8>, TunnelError> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|_| failed("bad key length"))?
        .encrypt(Nonce::from_slice(&nonce(counter)), Payload { msg, aad })
        .map_err(|_| failed("encryption failed"))
}

fn open(key: &[u8; 32], counter: u32, msg: &[u8], aad: &[u8]) -> Result<Vec<u8>, TunnelError> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|_| failed("bad key length"))?
        .decrypt(Nonce::from_slice(&nonce(counter)), Payload { msg, aad })
        .map_err(|_| failed("message does not authenticate"))
}

/// Split a handshake message into the sender's ephemeral key and the tag that follows it.
fn parse_message(message: &[u8]) -> Result<(PublicKey, &[u8], &[u8]), TunnelError> {
    if message.len() != HANDSHAKE_LEN {
        log::debug!("handshake message of {} bytes", message.len());
        return Err(failed("handshake message has the wrong length"));
    }
    let (point, tag) = message.split_at(POINT_LEN);
    let key = PublicKey::from_sec1_bytes(point).map_err(|_| failed("not a P-256 point"))?;
    Ok((key, point, tag))
}

/// The hash and chaining key both ends evolve in step.
struct SymmetricState {
    chaining_key: Zeroizing<[u8; 32]>,
    hash: [u8; 32],
    key: Zeroizing<[u8; 32]>,
    counter: u32,
}

impl SymmetricState {
    /// Start a handshake authenticating the client key `initiator`, mixing in `psk`.
    fn new(initiator: &PublicKey, psk: &[u8; 32]) -> Self {
        let mut name = [0; 32];
        name[..PROTOCOL_NAME.len()].copy_from_slice(PROTOCOL_NAME);
        let mut state = Self {
            chaining_key: Zeroizing::new(name),
            hash: name,
            key: Zeroizing::new([0; 32]),
            counter: 0,
        };
        state.mix_hash(&QR_PROLOGUE);
        state.mix_hash(&uncompressed(initiator));
        state.mix_key_and_hash(psk);
        state
    }

    fn mix_hash(&mut self, data: &[u8]) {
        self.hash = sha256_concat([self.hash.as_slice(), data]);
    }

    fn mix_key(&mut self, ikm: &[u8]) {
        let okm: Zeroizing<[u8; 64]> = hkdf_sha256(ikm, self.chaining_key.as_slice(), &[]);
        self.chaining_key.copy_from_slice(&okm[..32]);
        self.key.copy_from_slice(&okm[32..]);
        self.counter = 0;
    }

    fn mix_key_and_hash(&mut self, ikm: &[u8]) {
        let okm: Zeroizing<[u8; 96]> = hkdf_sha256(ikm, self.chaining_key.as_slice(), &[]);
        self.chaining_key.copy_from_slice(&okm[..32]);
        self.mix_hash(&okm[32..64]);
        self.key.copy_from_slice(&okm[64..]);
        self.counter = 0;
    }

    /// Mix in the ephemeral key a message starts with.
    fn mix_ephemeral(&mut self, point: &[u8]) {
        self.mix_hash(point);
        self.mix_key(point);
    }

    fn next_counter(&mut self) -> Result<u32, TunnelError> {
        let counter = self.counter;
        self.counter = counter.checked_add(1).ok_or_else(|| failed("nonce exhausted"))?;
        Ok(counter)
    }

    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TunnelError> {
        let counter = self.next_counter()?;
        let ciphertext = seal(&self.key, counter, plaintext, &self.hash)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, TunnelError> {
        let counter = self.next_counter()?;
        let plaintext = open(&self.key, counter, ciphertext, &self.hash)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// The key of the initiator's messages, then the key of the responder's.
    fn split(&self) -> (Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>) {
        let okm: Zeroizing<[u8; 64]> = hkdf_sha256(&[], self.chaining_key.as_slice(), &[]);
        let mut initiator = Zeroizing::new([0; 32]);
        let mut responder = Zeroizing::new([0; 32]);
        initiator.copy_from_slice(&okm[..32]);
        responder.copy_from_slice(&okm[32..]);
        (initiator, responder)
    }
}

/// The client's half of a handshake, waiting for the phone to answer.
pub struct Initiator {
    state: SymmetricState,
    identity: SecretKey,
    ephemeral: SecretKey,
}

impl Initiator {
    /// Start a handshake as the client whose QR code showed `identity`, keyed by `psk`. Returns
    /// the first message, to be sent as is.
    pub fn start(identity: &SecretKey, psk: &[u8; 32]) -> Result<(Self, Vec<u8>), TunnelError> {
        let mut state = SymmetricState::new(&identity.public_key(), psk);
        let ephemeral = SecretKey::random(&mut OsRng);
        let point = uncompressed(&ephemeral.public_key());
        state.mix_ephemeral(&point);
        let tag = state.encrypt_and_hash(&[])?;

        let initiator = Self {
            state,
            identity: identity.clone(),
            ephemeral,
        };
        Ok((initiator, [point, tag].concat()))
    }

    /// Check the phone's answer and derive the keys of the tunnel.
    pub fn finish(mut self, message: &[u8]) -> Result<NoiseCrypter, TunnelError> {
        let (peer, point, tag) = parse_message(message)?;
        self.state.mix_ephemeral(point);
        self.state.mix_key(&ecdh(&self.ephemeral, &peer)[..]);
        self.state.mix_key(&ecdh(&self.identity, &peer)[..]);
        self.state.decrypt_and_hash(tag)?;

        let (write, read) = self.state.split();
        Ok(NoiseCrypter::new(read, write))
    }
}

impl fmt::Debug for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initiator").finish_non_exhaustive()
    }
}

/// Answer the first handshake `message` as the phone that scanned the QR code of `initiator`.
/// Returns the answer and the crypter of the tunnel.
pub fn respond(
    initiator: &PublicKey,
    psk: &[u8; 32],
    message: &[u8],
) -> Result<(Vec<u8>, NoiseCrypter), TunnelError> {
    let mut state = SymmetricState::new(initiator, psk);
    let (peer, point, tag) = parse_message(message)?;
    state.mix_ephemeral(point);
    state.decrypt_and_hash(tag)?;

    let ephemeral = SecretKey::random(&mut OsRng);
    let own = uncompressed(&ephemeral.public_key());
    state.mix_ephemeral(&own);
    state.mix_key(&ecdh(&ephemeral, &peer)[..]);
    state.mix_key(&ecdh(&ephemeral, initiator)[..]);
    let tag = state.encrypt_and_hash(&[])?;

    let (read, write) = state.split();
    Ok(([own, tag].concat(), NoiseCrypter::new(read, write)))
}

/// Run the client's handshake over `tunnel`, authenticating with `identity`.
pub async fn initiate(
    tunnel: &mut EstablishedTunnel,
    identity: &SecretKey,
) -> Result<NoiseCrypter, TunnelError> {
    let (initiator, hello) = Initiator::start(identity, tunnel.socket_hash_key())?;
    tunnel.send(hello).await?;
    let answer = tunnel.recv().await?;
    let crypter = initiator.finish(&answer)?;
    log::debug!("handshake with the phone on {} done", tunnel.websocket().url());
    Ok(crypter)
}

/// Run the phone's handshake over `tunnel` with the client that showed `initiator` in its QR
/// code, then send `introduction` as the first encrypted message.
pub async fn accept(
    tunnel: &mut EstablishedTunnel,
    initiator: &PublicKey,
    introduction: &PostHandshakeMessage,
) -> Result<NoiseCrypter, TunnelError> {
    let hello = tunnel.recv().await?;
    let (answer, mut crypter) = respond(initiator, tunnel.socket_hash_key(), &hello)?;
    tunnel.send(answer).await?;
    let introduction = crypter.encrypt(&introduction.encode()?)?;
    tunnel.send(introduction).await?;
    Ok(crypter)
}

/// AES-256-GCM over padded frames with one key and one message counter per direction.
pub struct NoiseCrypter {
    read_key: Zeroizing<[u8; 32]>,
    write_key: Zeroizing<[u8; 32]>,
    read_counter: u32,
    write_counter: u32,
}

impl NoiseCrypter {
    fn new(read_key: Zeroizing<[u8; 32]>, write_key: Zeroizing<[u8; 32]>) -> Self {
        Self {
            read_key,
            write_key,
            read_counter: 0,
            write_counter: 0,
        }
    }
}

impl TunnelCrypter for NoiseCrypter {
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TunnelError> {
        let zeros = PADDING_GRANULARITY - 1 - plaintext.len() % PADDING_GRANULARITY;
        let mut padded = Zeroizing::new(Vec::with_capacity(plaintext.len() + zeros + 1));
        padded.extend_from_slice(plaintext);
        padded.resize(plaintext.len() + zeros, 0);
        padded.push(u8::try_from(zeros).map_err(|_| failed("padding too long"))?);

        let counter = self.write_counter;
        self.write_counter = counter
            .checked_add(1)
            .ok_or_else(|| failed("write counter exhausted"))?;
        seal(&self.write_key, counter, &padded, &[])
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, TunnelError> {
        let counter = self.read_counter;
        let padded = Zeroizing::new(open(&self.read_key, counter, ciphertext, &[])?);
        self.read_counter = counter
            .checked_add(1)
            .ok_or_else(|| failed("read counter exhausted"))?;

        let Some((&zeros, rest)) = padded.split_last() else {
            return Err(failed("empty frame"));
        };
        let len = rest
            .len()
            .checked_sub(usize::from(zeros))
            .ok_or_else(|| failed("padding longer than the frame"))?;
        Ok(rest[..len].to_vec())
    }
}

impl fmt::Debug for NoiseCrypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseCrypter")
            .field("read_counter", &self.read_counter)
            .field("write_counter", &self.write_counter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
