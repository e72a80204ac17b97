use std::sync::{Arc, Mutex};

use passlink_types::encoding::try_from_hex;
use tokio::sync::oneshot;

use super::*;
use crate::{
    crypto::EID_LEN,
    fake::LoopbackRelay,
    frame::TunnelFrame,
    qr::QrCodeData,
    transport::{AuthenticatorTunnel, ClientTunnel, MockEidAdvertiser},
};

const PSK: [u8; 32] = [0x5a; 32];
const SEED: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

/// The client's and the phone's crypter after a handshake between them.
fn pair() -> (NoiseCrypter, NoiseCrypter) {
    let identity = SecretKey::random(&mut OsRng);
    let (initiator, hello) = Initiator::start(&identity, &PSK).unwrap();
    assert_eq!(hello.len(), HANDSHAKE_LEN);
    assert_eq!(hello[0], 0x04);

    let (answer, phone) = respond(&identity.public_key(), &PSK, &hello).unwrap();
    assert_eq!(answer.len(), HANDSHAKE_LEN);
    (initiator.finish(&answer).unwrap(), phone)
}

#[test]
fn protocol_name_is_the_initial_hash() {
    let identity = SecretKey::random(&mut OsRng);
    let mut state = SymmetricState {
        chaining_key: Zeroizing::new([0; 32]),
        hash: [0; 32],
        key: Zeroizing::new([0; 32]),
        counter: 0,
    };
    let mut name = [0; 32];
    name[..31].copy_from_slice(b"Noise_KNpsk0_P256_AESGCM_SHA256");
    state.hash = name;
    state.chaining_key = Zeroizing::new(name);
    state.mix_hash(&[1]);
    state.mix_hash(&uncompressed(&identity.public_key()));
    state.mix_key_and_hash(&PSK);

    let fresh = SymmetricState::new(&identity.public_key(), &PSK);
    assert_eq!(fresh.hash, state.hash);
    assert_eq!(*fresh.chaining_key, *state.chaining_key);
    assert_eq!(*fresh.key, *state.key);
}

#[test]
fn frames_travel_both_ways() {
    let (mut client, mut phone) = pair();

    let request = client.encrypt(&[0x01, 0x02, 0x03]).unwrap();
    assert_eq!(phone.decrypt(&request).unwrap(), vec![0x01, 0x02, 0x03]);
    let response = phone.encrypt(&[0x00]).unwrap();
    assert_eq!(client.decrypt(&response).unwrap(), vec![0x00]);

    // keys differ per direction
    let again = client.encrypt(&[0x01]).unwrap();
    assert!(client.decrypt(&again).is_err());
}

#[test]
fn frames_are_padded_to_32_bytes() {
    let (mut client, mut phone) = pair();
    for (len, sealed) in [(0, 48), (1, 48), (31, 48), (32, 80), (100, 144)] {
        let plaintext = vec![0xab; len];
        let ciphertext = client.encrypt(&plaintext).unwrap();
        assert_eq!(ciphertext.len(), sealed, "{len} bytes");
        assert_eq!(phone.decrypt(&ciphertext).unwrap(), plaintext);
    }
}

#[test]
fn frames_are_read_in_order_only() {
    let (mut client, mut phone) = pair();
    let first = client.encrypt(b"first").unwrap();
    let second = client.encrypt(b"second").unwrap();

    assert!(phone.decrypt(&second).is_err());
    // a failed frame does not advance the counter
    assert_eq!(phone.decrypt(&first).unwrap(), b"first");
    assert!(phone.decrypt(&first).is_err());
    assert_eq!(phone.decrypt(&second).unwrap(), b"second");
}

#[test]
fn tampered_frames_are_rejected() {
    let (mut client, mut phone) = pair();
    let mut frame = client.encrypt(b"hello").unwrap();
    frame[3] ^= 1;
    assert!(matches!(phone.decrypt(&frame), Err(TunnelError::Handshake(_))));
}

#[test]
fn phone_needs_the_same_psk() {
    let identity = SecretKey::random(&mut OsRng);
    let (_, hello) = Initiator::start(&identity, &PSK).unwrap();
    let err = respond(&identity.public_key(), &[0; 32], &hello).unwrap_err();
    assert!(matches!(err, TunnelError::Handshake(_)));
}

#[test]
fn phone_needs_the_client_key_of_the_qr_code() {
    let identity = SecretKey::random(&mut OsRng);
    let other = SecretKey::random(&mut OsRng).public_key();
    let (_, hello) = Initiator::start(&identity, &PSK).unwrap();
    assert!(respond(&other, &PSK, &hello).is_err());
}

#[test]
fn client_rejects_a_tampered_answer() {
    let identity = SecretKey::random(&mut OsRng);
    let (initiator, hello) = Initiator::start(&identity, &PSK).unwrap();
    let (mut answer, _) = respond(&identity.public_key(), &PSK, &hello).unwrap();
    let last = answer.len() - 1;
    answer[last] ^= 0x80;
    assert!(matches!(
        initiator.finish(&answer),
        Err(TunnelError::Handshake(_))
    ));
}

#[test]
fn malformed_messages_are_rejected() {
    let identity = SecretKey::random(&mut OsRng);
    let (_, hello) = Initiator::start(&identity, &PSK).unwrap();
    let public_key = identity.public_key();

    assert!(respond(&public_key, &PSK, &hello[..HANDSHAKE_LEN - 1]).is_err());
    assert!(respond(&public_key, &PSK, &[hello.as_slice(), &[0]].concat()).is_err());
    // not a point on the curve
    let mut off_curve = hello.clone();
    off_curve[1..POINT_LEN].fill(0xff);
    assert!(respond(&public_key, &PSK, &off_curve).is_err());
}

#[test]
fn nonces_count_in_the_last_bytes() {
    assert_eq!(nonce(0), [0; 12]);
    assert_eq!(
        nonce(0x0102_0304).to_vec(),
        try_from_hex("000000000000000001020304").unwrap()
    );
}

#[tokio::test]
async fn client_and_phone_meet_through_the_relay() {
    let relay = Arc::new(LoopbackRelay::default());
    let identity = SecretKey::random(&mut OsRng);
    let qr_code = QrCodeData::new(identity.public_key(), SEED, 1_700_000_000);

    let (advertised, scanned) = oneshot::channel::<[u8; EID_LEN]>();
    let advertised = Mutex::new(Some(advertised));
    let mut advertiser = MockEidAdvertiser::new();
    advertiser.expect_advertise().times(1).returning(move |eid| {
        advertised.lock().unwrap().take().unwrap().send(eid).unwrap();
        Ok(())
    });
    let introduction = PostHandshakeMessage {
        get_info: Some(vec![0xa0]),
        features: vec!["ctap".into()],
    };

    let phone = async {
        let mut tunnel = AuthenticatorTunnel::new(relay.clone(), Arc::new(advertiser))
            .connect(&qr_code)
            .await
            .unwrap();
        let mut crypter = accept(&mut tunnel, &qr_code.public_key, &introduction)
            .await
            .unwrap();
        let request = crypter.decrypt(&tunnel.recv().await.unwrap()).unwrap();
        let response = crypter
            .encrypt(&TunnelFrame::Ctap(vec![0x00]).encode())
            .unwrap();
        tunnel.send(response).await.unwrap();
        request
    };
    let client = async {
        let eid = scanned.await.unwrap();
        let mut tunnel = ClientTunnel::new(relay.clone())
            .connect(&eid, &SEED)
            .await
            .unwrap();
        let mut crypter = initiate(&mut tunnel, &identity).await.unwrap();

        let first = crypter.decrypt(&tunnel.recv().await.unwrap()).unwrap();
        assert_eq!(PostHandshakeMessage::decode(&first).unwrap(), introduction);
        let request = crypter
            .encrypt(&TunnelFrame::Ctap(vec![0x04]).encode())
            .unwrap();
        tunnel.send(request).await.unwrap();
        let response = crypter.decrypt(&tunnel.recv().await.unwrap()).unwrap();
        tunnel.close().await;
        response
    };

    let (request, response) = tokio::join!(phone, client);
    assert_eq!(
        TunnelFrame::decode(&request).unwrap(),
        TunnelFrame::Ctap(vec![0x04])
    );
    assert_eq!(
        TunnelFrame::decode(&response).unwrap(),
        TunnelFrame::Ctap(vec![0x00])
    );
}
