use std::time::Duration;

use passlink_types::{
    ctap2::{get_info, Command, Ctap2Command, StatusCode},
    u2f::{split_status_word, Ctap1Command, ResponseStatusWords},
    webauthn::AuthenticatorTransport,
    DecodeError,
};

use crate::ConnectionError;

bitflags::bitflags! {
    /// What an open connection can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u16 {
        /// U2F APDUs
        const CTAP1 = 1 << 0;
        /// CTAP 2.0 commands
        const CTAP2 = 1 << 1;
        /// CTAP 2.1 commands
        const CTAP2_1 = 1 << 2;
        /// A PIN is set, commands need a PIN token
        const CLIENT_PIN = 1 << 3;
        /// Built-in user verification such as a fingerprint reader
        const USER_VERIFICATION = 1 << 4;
        /// Discoverable credentials
        const RESIDENT_KEY = 1 << 5;
        /// The wink command
        const WINK = 1 << 6;
    }
}

impl Capabilities {
    /// What an authenticator announces in its `authenticatorGetInfo` response.
    pub fn from_info(info: &get_info::Response) -> Self {
        let mut capabilities = Self::CTAP2;
        capabilities.set(Self::CTAP2_1, info.supports_fido_2_1());
        capabilities.set(Self::CLIENT_PIN, info.options.client_pin == Some(true));
        capabilities.set(
            Self::USER_VERIFICATION,
            info.options.user_verification == Some(true),
        );
        capabilities.set(Self::RESIDENT_KEY, info.options.resident_key);
        capabilities
    }
}

/// A channel to one authenticator, over which raw CTAP messages are exchanged.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
#[async_trait::async_trait]
pub trait CtapConnection: Send + Sync {
    /// What the authenticator on the other end supports.
    fn capabilities(&self) -> Capabilities;

    /// The transports to report for credentials created over this connection.
    fn transports(&self) -> Vec<AuthenticatorTransport>;

    /// Send an APDU, returning the response including its status word.
    async fn exchange_ctap1(&mut self, apdu: Vec<u8>) -> Result<Vec<u8>, ConnectionError>;

    /// Send a CTAP2 command, returning the response including its status byte.
    async fn exchange_ctap2(
        &mut self,
        command: Command,
        payload: Option<Vec<u8>>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ConnectionError>;
}

/// Typed commands on top of a [`CtapConnection`].
#[async_trait::async_trait]
pub trait CtapConnectionExt: CtapConnection {
    /// Run a U2F command, failing on any status word other than success.
    async fn run_ctap1<C>(&mut self, command: &C) -> Result<C::Response, ConnectionError>
    where
        C: Ctap1Command + Sync,
        C::Response: Send;

    /// Run a CTAP2 command, failing on any status other than success.
    async fn run_ctap2<C>(&mut self, command: &C) -> Result<C::Response, ConnectionError>
    where
        C: Ctap2Command + Sync,
        C::Response: Send;
}

#[async_trait::async_trait]
impl<T: CtapConnection + ?Sized> CtapConnectionExt for T {
    async fn run_ctap1<C>(&mut self, command: &C) -> Result<C::Response, ConnectionError>
    where
        C: Ctap1Command + Sync,
        C::Response: Send,
    {
        if !self.capabilities().contains(Capabilities::CTAP1) {
            return Err(ConnectionError::Unsupported("CTAP1"));
        }
        let apdu = command.apdu()?;
        let response = self.exchange_ctap1(apdu).await?;
        let (body, sw) = split_status_word(&response)?;
        if sw != ResponseStatusWords::NoError.as_primitive() {
            return Err(ConnectionError::Ctap1Status(sw));
        }
        Ok(command.decode_response(body)?)
    }

    async fn run_ctap2<C>(&mut self, command: &C) -> Result<C::Response, ConnectionError>
    where
        C: Ctap2Command + Sync,
        C::Response: Send,
    {
        if !self.capabilities().contains(Capabilities::CTAP2) {
            return Err(ConnectionError::Unsupported("CTAP2"));
        }
        let payload = command.encode()?;
        let response = self
            .exchange_ctap2(C::COMMAND, payload, command.timeout())
            .await?;
        let (&status, body) = response.split_first().ok_or(DecodeError::Truncated {
            expected: 1,
            actual: 0,
        })?;
        let status = StatusCode::from(status);
        if !status.is_success() {
            return Err(ConnectionError::Ctap2Status(status));
        }
        Ok(command.decode_response(body)?)
    }
}

#[cfg(test)]
mod tests {
    use passlink_types::{
        ctap2::{get_info, Ctap2Error},
        u2f::VersionRequest,
    };

    use super::*;

    #[tokio::test]
    async fn ctap1_status_word_is_checked() {
        let mut connection = MockCtapConnection::new();
        connection
            .expect_capabilities()
            .return_const(Capabilities::CTAP1);
        connection
            .expect_exchange_ctap1()
            .times(1)
            .returning(|_| Ok(b"U2F_V2\x90\x00".to_vec()));
        assert_eq!(connection.run_ctap1(&VersionRequest).await.unwrap(), "U2F_V2");

        connection.checkpoint();
        connection
            .expect_capabilities()
            .return_const(Capabilities::CTAP1);
        connection
            .expect_exchange_ctap1()
            .returning(|_| Ok(vec![0x69, 0x85]));
        let err = connection.run_ctap1(&VersionRequest).await.unwrap_err();
        assert!(err.is_status_word(ResponseStatusWords::ConditionsNotSatisfied));
    }

    #[tokio::test]
    async fn unsupported_commands_send_nothing() {
        let mut connection = MockCtapConnection::new();
        connection
            .expect_capabilities()
            .return_const(Capabilities::CTAP1);
        connection.expect_exchange_ctap2().never();
        assert!(matches!(
            connection.run_ctap2(&get_info::Request).await,
            Err(ConnectionError::Unsupported("CTAP2"))
        ));
    }

    #[tokio::test]
    async fn ctap2_status_is_surfaced() {
        let mut connection = MockCtapConnection::new();
        connection
            .expect_capabilities()
            .return_const(Capabilities::CTAP2);
        connection
            .expect_exchange_ctap2()
            .withf(|command, payload, _| *command == Command::GetInfo && payload.is_none())
            .returning(|_, _, _| Ok(vec![0x2E]));
        let err = connection.run_ctap2(&get_info::Request).await.unwrap_err();
        assert_eq!(err.ctap2_error(), Some(Ctap2Error::NoCredentials));
    }

    #[tokio::test]
    async fn empty_ctap2_response_is_malformed() {
        let mut connection = MockCtapConnection::new();
        connection
            .expect_capabilities()
            .return_const(Capabilities::CTAP2);
        connection
            .expect_exchange_ctap2()
            .returning(|_, _, _| Ok(Vec::new()));
        assert!(matches!(
            connection.run_ctap2(&get_info::Request).await,
            Err(ConnectionError::Malformed(DecodeError::Truncated { .. }))
        ));
    }
}
