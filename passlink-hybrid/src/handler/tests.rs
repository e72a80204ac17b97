use std::{sync::Mutex, time::Duration};

use p256::{PublicKey, SecretKey};
use passlink_transports::MockStatusListener;
use passlink_types::{
    cbor::{MapBuilder, Value},
    cose::CoseKey,
    ctap2::{Aaguid, AttestedCredentialData, AuthenticatorData},
    crypto::sha256,
    webauthn::AuthenticatorTransport,
};
use rand::rngs::OsRng;
use serde_json::json;

use super::*;
use crate::{
    connection::TunnelCrypter,
    crypto::{eid_key, generate_eid, generated_seed, socket_hash_key},
    fake::FakeRelay,
    frame::{PostHandshakeMessage, TunnelFrame},
    noise::{respond, NoiseCrypter, HANDSHAKE_LEN},
};

const PHONE: DeviceCapabilities = DeviceCapabilities {
    bluetooth: true,
    nfc: false,
    usb_host: false,
    network: true,
};

const KEY_HANDLE: [u8; 4] = [0xca, 0xfe, 0xba, 0xbe];

fn introduction() -> Vec<u8> {
    let info = MapBuilder::new()
        .insert(0x01, Value::Array(vec!["FIDO_2_0".into()]))
        .insert(0x03, vec![0x11u8; 16])
        .to_vec()
        .unwrap();
    PostHandshakeMessage {
        get_info: Some(info),
        features: vec!["ctap".into()],
    }
    .encode()
    .unwrap()
}

fn assertion() -> Vec<u8> {
    let body = MapBuilder::new()
        .insert(
            0x01,
            MapBuilder::new()
                .insert("type", "public-key")
                .insert("id", KEY_HANDLE.to_vec())
                .build(),
        )
        .insert(
            0x02,
            AuthenticatorData::for_rp_id("example.com", true, true, 3)
                .to_vec()
                .unwrap(),
        )
        .insert(0x03, vec![0x30u8, 0x45])
        .to_vec()
        .unwrap();
    [vec![0x00], body].concat()
}

fn attestation() -> Vec<u8> {
    let acd = AttestedCredentialData::with_cose_key(
        Aaguid::new_empty(),
        KEY_HANDLE.to_vec(),
        &CoseKey::es256([1; 32], [2; 32]),
    )
    .unwrap();
    let auth_data = AuthenticatorData::for_rp_id("example.com", true, true, 0)
        .with_attested_credential_data(acd)
        .to_vec()
        .unwrap();
    let body = MapBuilder::new()
        .insert(0x01, "none")
        .insert(0x02, auth_data)
        .insert(0x03, MapBuilder::new().build())
        .to_vec()
        .unwrap();
    [vec![0x00], body].concat()
}

/// A phone that answers make credential and get assertion.
#[derive(Default)]
struct Phone {
    /// The client key and pre-shared key, learnt from the QR code
    scanned: Option<(PublicKey, [u8; 32])>,
    crypter: Option<NoiseCrypter>,
    /// Decrypted frames from the client
    received: Vec<Vec<u8>>,
    /// Corrupt the handshake answer
    tamper: bool,
    /// Never answer the handshake
    silent: bool,
}

impl Phone {
    fn answer(&mut self, message: &[u8]) -> Vec<Vec<u8>> {
        let Some(crypter) = self.crypter.as_mut() else {
            if self.silent {
                return Vec::new();
            }
            let (client, psk) = self.scanned.as_ref().expect("the QR code was not scanned");
            let (mut answer, mut crypter) = respond(client, psk, message).unwrap();
            if self.tamper {
                answer[HANDSHAKE_LEN - 1] ^= 1;
            }
            let introduction = crypter.encrypt(&introduction()).unwrap();
            self.crypter = Some(crypter);
            return vec![answer, introduction];
        };

        let frame = crypter.decrypt(message).unwrap();
        self.received.push(frame.clone());
        let reply = match TunnelFrame::decode(&frame).unwrap() {
            TunnelFrame::Ctap(request) => match request.first() {
                Some(0x01) => attestation(),
                Some(0x02) => assertion(),
                _ => vec![0x01],
            },
            _ => return Vec::new(),
        };
        vec![crypter.encrypt(&TunnelFrame::Ctap(reply).encode()).unwrap()]
    }
}

fn relay(phone: &Arc<Mutex<Phone>>) -> Arc<FakeRelay> {
    let phone = phone.clone();
    Arc::new(FakeRelay::new().with_responder(move |message| phone.lock().unwrap().answer(message)))
}

/// A link whose phone scans the QR code and advertises for routing ID aabbcc.
fn link(phone: &Arc<Mutex<Phone>>) -> MockHybridLink {
    let phone = phone.clone();
    let mut link = MockHybridLink::new();
    link.expect_await_eid().times(1).returning(move |qr_code| {
        let qr = QrCodeData::parse(qr_code).unwrap();
        assert_eq!(qr.version, 2);
        let plaintext = generated_seed(&[0xaa, 0xbb, 0xcc], 0);
        let psk = socket_hash_key(qr.seed.as_slice(), &plaintext);
        phone.lock().unwrap().scanned = Some((qr.public_key, *psk));
        Ok(generate_eid(&eid_key(qr.seed.as_slice()), &plaintext).to_vec())
    });
    link
}

fn handler(phone: &Arc<Mutex<Phone>>, relay: &Arc<FakeRelay>) -> HybridTransportHandler {
    HybridTransportHandler::new(
        Arc::new(link(phone)),
        relay.clone(),
        SecretKey::random(&mut OsRng),
        &PHONE,
    )
}

fn sign_options() -> RequestOptions {
    serde_json::from_value(json!({
        "type": "sign",
        "options": {
            "challenge": "AAECAw",
            "rpId": "example.com",
            "allowCredentials": [{ "type": "public-key", "id": "yv66vg" }]
        }
    }))
    .unwrap()
}

fn register_options() -> RequestOptions {
    serde_json::from_value(json!({
        "type": "register",
        "options": {
            "rp": { "id": "example.com", "name": "Example" },
            "user": { "id": "AQID", "name": "jdoe", "displayName": "J. Doe" },
            "challenge": "AAECAw",
            "pubKeyCredParams": [{ "type": "public-key", "alg": -7 }]
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn phone_signs_through_the_tunnel() {
    let phone = Arc::new(Mutex::new(Phone::default()));
    let relay = relay(&phone);
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let seen = statuses.clone();
    let mut listener = MockStatusListener::new();
    listener
        .expect_on_status_changed()
        .returning(move |transport, status| {
            assert_eq!(transport, Transport::Hybrid);
            seen.lock().unwrap().push(status);
        });
    let handler = handler(&phone, &relay).with_status_listener(Arc::new(listener));

    let response = handler
        .start(&sign_options(), &CallerIdentity::default())
        .await
        .unwrap();

    let AuthenticatorResponse::Assertion(assertion) = response else {
        panic!("expected an assertion");
    };
    assert_eq!(assertion.key_handle.as_slice(), &KEY_HANDLE);
    let auth_data = AuthenticatorData::from_slice(&assertion.authenticator_data).unwrap();
    assert_eq!(auth_data.rp_id_hash, sha256(b"example.com"));
    assert_eq!(auth_data.sign_count, 3);
    assert_eq!(
        *statuses.lock().unwrap(),
        vec![Status::WaitingForDevice, Status::WaitingForUser]
    );

    // joined the relay the phone advertised
    let (url, protocol) = relay.requests().remove(0);
    assert_eq!(url.host_str(), Some("cable.ua5v.com"));
    assert!(url.path().starts_with("/cable/connect/AABBCC/"));
    assert_eq!(protocol, "fido.cable");
    // nothing but the handshake crossed the relay in the clear
    let sent = relay.sent();
    assert_eq!(sent[0].len(), HANDSHAKE_LEN);
    assert!(sent[1..].iter().all(|frame| frame.len() % 32 == 16));
    // the tunnel is shut down afterwards
    assert_eq!(phone.lock().unwrap().received.last(), Some(&vec![0x00]));
    assert_eq!(relay.closed(), 1);
}

#[tokio::test]
async fn phone_registers_through_the_tunnel() {
    let phone = Arc::new(Mutex::new(Phone::default()));
    let relay = relay(&phone);

    let response = handler(&phone, &relay)
        .start(&register_options(), &CallerIdentity::default())
        .await
        .unwrap();

    let AuthenticatorResponse::Attestation(attestation) = response else {
        panic!("expected an attestation");
    };
    assert_eq!(attestation.key_handle.as_slice(), &KEY_HANDLE);
    assert_eq!(
        attestation.transports,
        vec![AuthenticatorTransport::Hybrid, AuthenticatorTransport::Internal]
    );
    assert_eq!(relay.closed(), 1);
}

#[tokio::test]
async fn failed_handshake_closes_the_tunnel() {
    let phone = Arc::new(Mutex::new(Phone {
        tamper: true,
        ..Phone::default()
    }));
    let relay = relay(&phone);

    let err = handler(&phone, &relay)
        .start(&sign_options(), &CallerIdentity::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Unavailable(_)));
    // only the client's half of the handshake went out
    assert_eq!(relay.sent().len(), 1);
    assert!(phone.lock().unwrap().received.is_empty());
    assert_eq!(relay.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_phone_times_out() {
    let phone = Arc::new(Mutex::new(Phone {
        silent: true,
        ..Phone::default()
    }));
    let relay = relay(&phone);
    let handler = handler(&phone, &relay)
        .with_config(HybridConfig::default().with_connect_timeout(Duration::from_secs(10)));

    let err = handler
        .start(&sign_options(), &CallerIdentity::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Unavailable(reason) if reason.contains("timed out")));
    assert_eq!(relay.closed(), 1);
}

#[tokio::test]
async fn no_phone_no_tunnel() {
    let relay = Arc::new(FakeRelay::new());
    let mut link = MockHybridLink::new();
    link.expect_await_eid()
        .returning(|_| Err(TunnelError::Advertise("scan cancelled".into())));
    let handler = HybridTransportHandler::new(
        Arc::new(link),
        relay.clone(),
        SecretKey::random(&mut OsRng),
        &PHONE,
    );

    let err = handler
        .start(&sign_options(), &CallerIdentity::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Unavailable(_)));
    assert!(relay.requests().is_empty());
}

#[test]
fn needs_bluetooth_and_network() {
    let link = Arc::new(MockHybridLink::new());
    let relay = Arc::new(FakeRelay::new());
    let identity = SecretKey::random(&mut OsRng);
    let handler = HybridTransportHandler::new(link.clone(), relay.clone(), identity.clone(), &PHONE);
    assert!(handler.is_supported());
    assert_eq!(handler.transport(), Transport::Hybrid);

    let offline = DeviceCapabilities {
        network: false,
        ..PHONE
    };
    assert!(!HybridTransportHandler::new(link, relay, identity, &offline).is_supported());
}
