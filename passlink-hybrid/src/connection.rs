//! CTAP2 through an established tunnel.
use std::{fmt, time::Duration};

use passlink_transports::{Capabilities, ConnectionError, CtapConnection};
use passlink_types::{
    ctap2::{get_info, Command},
    webauthn::AuthenticatorTransport,
    DecodeError,
};

use crate::{
    frame::{PostHandshakeMessage, TunnelFrame},
    transport::EstablishedTunnel,
    TunnelError,
};

/// Encrypts the frames of a tunnel once the handshake is done.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
pub trait TunnelCrypter: Send + Sync {
    /// Encrypt an outgoing frame.
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TunnelError>;

    /// Decrypt an incoming frame.
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, TunnelError>;
}

/// A phone reached through a hybrid tunnel.
pub struct TunnelConnection {
    tunnel: EstablishedTunnel,
    crypter: Box<dyn TunnelCrypter>,
    capabilities: Capabilities,
    features: Vec<String>,
    timeout: Duration,
}

impl TunnelConnection {
    /// Wait for the authenticator to introduce itself over `tunnel`. `timeout` bounds that wait
    /// and every command without a timeout of its own.
    pub async fn open(
        tunnel: EstablishedTunnel,
        crypter: Box<dyn TunnelCrypter>,
        timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let mut connection = Self {
            tunnel,
            crypter,
            capabilities: Capabilities::CTAP2,
            features: Vec::new(),
            timeout,
        };
        match tokio::time::timeout(timeout, connection.introduction()).await {
            Ok(Ok(())) => Ok(connection),
            Ok(Err(e)) => {
                connection.tunnel.close().await;
                Err(e)
            }
            Err(_) => {
                connection.tunnel.close().await;
                Err(ConnectionError::Timeout)
            }
        }
    }

    /// Read the post-handshake message, which carries the `authenticatorGetInfo` response.
    async fn introduction(&mut self) -> Result<(), ConnectionError> {
        let message = self.read().await?;
        if !PostHandshakeMessage::matches(&message) {
            return Err(DecodeError::InvalidValue {
                field: "post-handshake message",
                reason: "not a CBOR map".into(),
            }
            .into());
        }

        let introduction = PostHandshakeMessage::decode(&message)?;
        if let Some(info) = introduction.get_info {
            let info = get_info::Response::from_slice(&info)?;
            self.capabilities |= Capabilities::from_info(&info);
        }
        self.features = introduction.features;
        log::debug!(
            "hybrid authenticator supports {:?} and {:?}",
            self.capabilities,
            self.features
        );
        Ok(())
    }

    /// What the authenticator accepts besides CTAP.
    pub fn features(&self) -> &[String] {
        &self.features
    }

    async fn read(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let message = self.tunnel.recv().await?;
        Ok(self.crypter.decrypt(&message)?)
    }

    async fn write(&mut self, frame: TunnelFrame) -> Result<(), ConnectionError> {
        let message = self.crypter.encrypt(&frame.encode())?;
        Ok(self.tunnel.send(message).await?)
    }

    async fn read_ctap(&mut self) -> Result<Vec<u8>, ConnectionError> {
        loop {
            let message = self.read().await?;
            if PostHandshakeMessage::matches(&message) {
                log::debug!("ignoring a repeated post-handshake message");
                continue;
            }
            match TunnelFrame::decode(&message)? {
                TunnelFrame::Ctap(response) => return Ok(response),
                TunnelFrame::Update(update) => {
                    log::debug!("authenticator sent an update of {} bytes", update.len())
                }
                TunnelFrame::Json(json) => {
                    log::debug!("authenticator sent {} bytes of JSON", json.len())
                }
                TunnelFrame::Shutdown(_) => return Err(ConnectionError::Disconnected),
            }
        }
    }

    /// Say goodbye and close the tunnel.
    pub async fn close(mut self) {
        if let Err(e) = self.write(TunnelFrame::Shutdown(Vec::new())).await {
            log::debug!("could not send the shutdown frame: {e}");
        }
        self.tunnel.close().await;
    }
}

impl fmt::Debug for TunnelConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConnection")
            .field("tunnel", &self.tunnel)
            .field("capabilities", &self.capabilities)
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl CtapConnection for TunnelConnection {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn transports(&self) -> Vec<AuthenticatorTransport> {
        vec![AuthenticatorTransport::Hybrid, AuthenticatorTransport::Internal]
    }

    async fn exchange_ctap1(&mut self, _apdu: Vec<u8>) -> Result<Vec<u8>, ConnectionError> {
        Err(ConnectionError::Unsupported("CTAP1"))
    }

    async fn exchange_ctap2(
        &mut self,
        command: Command,
        payload: Option<Vec<u8>>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ConnectionError> {
        let mut request = vec![u8::from(command)];
        request.extend(payload.unwrap_or_default());
        self.write(TunnelFrame::Ctap(request)).await?;

        let timeout = timeout.unwrap_or(self.timeout);
        tokio::time::timeout(timeout, self.read_ctap())
            .await
            .map_err(|_| ConnectionError::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use passlink_transports::CtapConnectionExt;
    use passlink_types::{
        cbor::{MapBuilder, Value},
        encoding::try_from_hex,
    };

    use super::*;
    use crate::{fake::FakeRelay, transport::ClientTunnel};

    const SEED: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

    /// Flips every bit, enough to tell plaintext from ciphertext.
    struct Inverting;

    impl TunnelCrypter for Inverting {
        fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TunnelError> {
            Ok(plaintext.iter().map(|b| !b).collect())
        }

        fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, TunnelError> {
            Ok(ciphertext.iter().map(|b| !b).collect())
        }
    }

    fn invert(data: &[u8]) -> Vec<u8> {
        data.iter().map(|b| !b).collect()
    }

    fn get_info() -> Vec<u8> {
        MapBuilder::new()
            .insert(0x01, Value::Array(vec!["FIDO_2_0".into()]))
            .insert(0x03, vec![0x11u8; 16])
            .insert(
                0x04,
                MapBuilder::new()
                    .insert("rk", true)
                    .insert("uv", true)
                    .build(),
            )
            .to_vec()
            .unwrap()
    }

    fn introduction() -> Vec<u8> {
        PostHandshakeMessage {
            get_info: Some(get_info()),
            features: vec!["ctap".into()],
        }
        .encode()
        .unwrap()
    }

    async fn connect(relay: FakeRelay) -> (Arc<FakeRelay>, Result<TunnelConnection, ConnectionError>) {
        let relay = Arc::new(relay);
        let eid = try_from_hex("6ac0c419d1455365eaa7d6eeba2a82d110dfd3c4").unwrap();
        let tunnel = ClientTunnel::new(relay.clone())
            .connect(&eid, &SEED)
            .await
            .unwrap();
        let connection =
            TunnelConnection::open(tunnel, Box::new(Inverting), Duration::from_secs(5)).await;
        (relay, connection)
    }

    #[tokio::test]
    async fn capabilities_come_from_the_introduction() {
        let (_, connection) = connect(FakeRelay::new().with_greeting(invert(&introduction()))).await;
        let connection = connection.unwrap();
        assert_eq!(
            connection.capabilities(),
            Capabilities::CTAP2 | Capabilities::RESIDENT_KEY | Capabilities::USER_VERIFICATION
        );
        assert_eq!(connection.features(), ["ctap".to_owned()]);
        assert_eq!(
            connection.transports(),
            vec![AuthenticatorTransport::Hybrid, AuthenticatorTransport::Internal]
        );
    }

    #[tokio::test]
    async fn introduction_without_get_info() {
        let bare = PostHandshakeMessage::default().encode().unwrap();
        let (_, connection) = connect(FakeRelay::new().with_greeting(invert(&bare))).await;
        assert_eq!(connection.unwrap().capabilities(), Capabilities::CTAP2);
    }

    #[tokio::test]
    async fn a_frame_is_no_introduction() {
        let frame = TunnelFrame::Ctap(vec![0x00]).encode();
        let (relay, connection) = connect(FakeRelay::new().with_greeting(invert(&frame))).await;
        assert!(matches!(connection, Err(ConnectionError::Malformed(_))));
        assert_eq!(relay.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_authenticators_time_out() {
        let (_, connection) = connect(FakeRelay::new()).await;
        assert!(matches!(connection, Err(ConnectionError::Timeout)));
    }

    #[tokio::test]
    async fn ctap2_commands_are_framed_and_encrypted() {
        let relay = FakeRelay::new()
            .with_greeting(invert(&introduction()))
            .with_responder(|message| {
                let frame = TunnelFrame::decode(&invert(message)).unwrap();
                match frame {
                    TunnelFrame::Ctap(request) if request == [0x04] => vec![
                        invert(&TunnelFrame::Update(vec![0xa0]).encode()),
                        invert(&TunnelFrame::Json(b"{}".to_vec()).encode()),
                        invert(&TunnelFrame::Ctap([vec![0x00], get_info()].concat()).encode()),
                    ],
                    _ => Vec::new(),
                }
            });
        let (relay, connection) = connect(relay).await;
        let mut connection = connection.unwrap();

        let info = connection.run_ctap2(&get_info::Request).await.unwrap();
        assert_eq!(info.aaguid.0, [0x11; 16]);
        assert_eq!(relay.sent(), vec![invert(&[0x01, 0x04])]);

        assert!(matches!(
            connection.exchange_ctap1(vec![0x00, 0x03, 0x00, 0x00]).await,
            Err(ConnectionError::Unsupported("CTAP1"))
        ));

        connection.close().await;
        assert_eq!(relay.sent().last(), Some(&invert(&[0x00])));
        assert_eq!(relay.closed(), 1);
    }

    #[tokio::test]
    async fn shutdown_ends_the_exchange() {
        let relay = FakeRelay::new()
            .with_greeting(invert(&introduction()))
            .with_responder(|_| vec![invert(&TunnelFrame::Shutdown(Vec::new()).encode())]);
        let (_, connection) = connect(relay).await;
        let mut connection = connection.unwrap();
        assert!(matches!(
            connection.exchange_ctap2(Command::GetInfo, None, None).await,
            Err(ConnectionError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn frames_that_do_not_decrypt_fail_the_exchange() {
        let relay = FakeRelay::new().with_greeting(invert(&introduction()));
        let (relay, connection) = connect(relay).await;
        let mut connection = connection.unwrap();
        connection.crypter = {
            let mut crypter = MockTunnelCrypter::new();
            crypter.expect_encrypt().returning(|frame| Ok(frame.to_vec()));
            crypter
                .expect_decrypt()
                .returning(|_| Err(TunnelError::Handshake("bad tag".into())));
            Box::new(crypter)
        };
        relay.push(vec![0x01]);
        assert!(matches!(
            connection.exchange_ctap2(Command::GetInfo, None, None).await,
            Err(ConnectionError::Io(_))
        ));
    }
}
