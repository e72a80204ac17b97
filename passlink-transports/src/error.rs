use passlink_types::{
    ctap2::{Ctap2Error, StatusCode},
    u2f::ResponseStatusWords,
    DecodeError, EncodeError,
};

use crate::hid::FramingError;

/// Failures of a single exchange with an authenticator.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The command is not one the connection advertised. Nothing was sent.
    #[error("the connection does not support {0}")]
    Unsupported(&'static str),
    /// The authenticator did not answer in time.
    #[error("timed out waiting for the authenticator")]
    Timeout,
    /// The authenticator went away.
    #[error("the authenticator disconnected")]
    Disconnected,
    /// The underlying transport failed.
    #[error("transport failure: {0}")]
    Io(String),
    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(#[from] DecodeError),
    /// The request could not be encoded.
    #[error("could not encode the request: {0}")]
    Encode(#[from] EncodeError),
    /// A CTAP1 response ended with a status word other than success.
    #[error("authenticator returned status word {0:#06x}")]
    Ctap1Status(u16),
    /// A CTAP2 response started with a status other than success.
    #[error("authenticator returned {0}")]
    Ctap2Status(StatusCode),
}

impl ConnectionError {
    /// The CTAP2 error the authenticator reported, if it is one the specification defines.
    pub fn ctap2_error(&self) -> Option<Ctap2Error> {
        match self {
            Self::Ctap2Status(status) => status.known(),
            _ => None,
        }
    }

    /// Whether the authenticator answered with the CTAP1 status word `sw`.
    pub fn is_status_word(&self, sw: ResponseStatusWords) -> bool {
        matches!(self, Self::Ctap1Status(status) if *status == sw.as_primitive())
    }
}

impl From<FramingError> for ConnectionError {
    fn from(e: FramingError) -> Self {
        Self::Io(e.to_string())
    }
}

/// The error categories surfaced to the caller, named after the `DOMException`s WebAuthn uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No transport or authenticator can serve the request.
    NotSupported,
    /// The user or the authenticator refused.
    NotAllowed,
    /// The authenticator already holds an excluded credential.
    InvalidState,
    /// A message could not be encoded or decoded.
    Data,
    /// The operation took too long.
    Timeout,
    /// Anything else.
    Unknown,
}

/// Failures of a transport attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport is not implemented on this host.
    #[error("the transport is not supported")]
    NotSupported,
    /// No attached authenticator can be used.
    #[error("no suitable authenticator was found")]
    NoSuitableDevice,
    /// The platform refused access to the authenticator.
    #[error("permission to use the authenticator was denied")]
    PermissionDenied,
    /// The request cannot be expressed with what the authenticator supports.
    #[error("the authenticator cannot serve this request: {0}")]
    UnsupportedRequest(&'static str),
    /// A PIN is required but none was supplied.
    #[error("a PIN is required")]
    MissingPin,
    /// The supplied PIN was rejected.
    #[error("the PIN is incorrect")]
    WrongPin,
    /// The authenticator refused, for example because it holds an excluded credential.
    #[error("the operation is not allowed")]
    NotAllowed,
    /// The transport could not be brought up.
    #[error("the transport is unavailable: {0}")]
    Unavailable(String),
    /// An exchange with the authenticator failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl From<DecodeError> for TransportError {
    fn from(e: DecodeError) -> Self {
        Self::Connection(e.into())
    }
}

impl From<EncodeError> for TransportError {
    fn from(e: EncodeError) -> Self {
        Self::Connection(e.into())
    }
}

impl TransportError {
    /// The category to report to the caller.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotSupported | Self::NoSuitableDevice | Self::UnsupportedRequest(_) => {
                ErrorCode::NotSupported
            }
            Self::PermissionDenied | Self::MissingPin | Self::WrongPin | Self::NotAllowed => {
                ErrorCode::NotAllowed
            }
            Self::Unavailable(_) => ErrorCode::Unknown,
            Self::Connection(e) => match e {
                ConnectionError::Unsupported(_) => ErrorCode::NotSupported,
                ConnectionError::Timeout => ErrorCode::Timeout,
                ConnectionError::Disconnected | ConnectionError::Io(_) => ErrorCode::Unknown,
                ConnectionError::Malformed(_) | ConnectionError::Encode(_) => ErrorCode::Data,
                ConnectionError::Ctap1Status(sw) => match ResponseStatusWords::try_from(*sw) {
                    Ok(ResponseStatusWords::WrongData)
                    | Ok(ResponseStatusWords::ConditionsNotSatisfied) => ErrorCode::NotAllowed,
                    _ => ErrorCode::Unknown,
                },
                ConnectionError::Ctap2Status(status) => match status.known() {
                    Some(Ctap2Error::CredentialExcluded) => ErrorCode::InvalidState,
                    Some(
                        Ctap2Error::UserActionTimeout
                        | Ctap2Error::ActionTimeout
                        | Ctap2Error::KeepAliveCancel,
                    ) => ErrorCode::Timeout,
                    Some(
                        Ctap2Error::NotAllowed
                        | Ctap2Error::OperationDenied
                        | Ctap2Error::NoCredentials
                        | Ctap2Error::PinInvalid
                        | Ctap2Error::PinBlocked
                        | Ctap2Error::PinAuthInvalid
                        | Ctap2Error::PinAuthBlocked
                        | Ctap2Error::PinNotSet
                        | Ctap2Error::PuatRequired,
                    ) => ErrorCode::NotAllowed,
                    Some(
                        Ctap2Error::UnsupportedAlgorithm
                        | Ctap2Error::UnsupportedOption
                        | Ctap2Error::InvalidOption,
                    ) => ErrorCode::NotSupported,
                    Some(Ctap2Error::InvalidCbor | Ctap2Error::CborUnexpectedType) => {
                        ErrorCode::Data
                    }
                    _ => ErrorCode::Unknown,
                },
            },
        }
    }

    /// Whether an authenticator was reached and the request failed there, as opposed to no
    /// authenticator being usable at all.
    pub fn is_device_failure(&self) -> bool {
        !matches!(
            self,
            Self::NotSupported
                | Self::NoSuitableDevice
                | Self::PermissionDenied
                | Self::Unavailable(_)
        )
    }
}
