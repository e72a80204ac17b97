//! <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorGetInfo>
use coset::iana::{self, EnumI64};

use crate::cbor::{DecodeError, EncodeError, MapReader, Value};

use super::{Aaguid, Command, Ctap2Command};

/// authenticatorGetInfo takes no parameters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Request;

impl Ctap2Command for Request {
    type Response = Response;
    const COMMAND: Command = Command::GetInfo;

    fn encode(&self) -> Result<Option<Vec<u8>>, EncodeError> {
        Ok(None)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Response, DecodeError> {
        Response::from_slice(bytes)
    }
}

/// Protocol versions an authenticator can advertise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// CTAP1/U2F
    U2fV2,
    /// CTAP 2.0
    Fido2_0,
    /// Pre-release of CTAP 2.1
    Fido2_1Pre,
    /// CTAP 2.1
    Fido2_1,
    /// Anything this library does not know about
    Unknown(String),
}

impl Version {
    /// The string form used on the wire
    pub fn as_str(&self) -> &str {
        match self {
            Self::U2fV2 => "U2F_V2",
            Self::Fido2_0 => "FIDO_2_0",
            Self::Fido2_1Pre => "FIDO_2_1_PRE",
            Self::Fido2_1 => "FIDO_2_1",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for Version {
    fn from(value: String) -> Self {
        match value.as_str() {
            "U2F_V2" => Self::U2fV2,
            "FIDO_2_0" => Self::Fido2_0,
            "FIDO_2_1_PRE" => Self::Fido2_1Pre,
            "FIDO_2_1" => Self::Fido2_1,
            _ => Self::Unknown(value),
        }
    }
}

/// The options map of a GetInfo response.
///
/// Absent entries carry the defaults the protocol assigns to them, which is why some accessors
/// return `Option<bool>`: for those, absence means "not supported" while `false` means "supported
/// but not configured".
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Options {
    /// `plat`: the authenticator is attached to the client device.
    pub platform_device: bool,
    /// `rk`: the authenticator can store discoverable credentials.
    pub resident_key: bool,
    /// `clientPin`: `Some(true)` when a PIN is set, `Some(false)` when one could be set.
    pub client_pin: Option<bool>,
    /// `up`: the authenticator can test for user presence. Defaults to true.
    pub user_presence: bool,
    /// `uv`: `Some(true)` when built-in user verification is configured.
    pub user_verification: Option<bool>,
    /// `pinUvAuthToken`
    pub pin_uv_auth_token: Option<bool>,
    /// `makeCredUvNotRqd`
    pub make_cred_uv_not_required: bool,
    /// `alwaysUv`
    pub always_uv: Option<bool>,
}

impl Options {
    fn from_reader(map: Option<MapReader>) -> Result<Self, DecodeError> {
        let Some(map) = map else {
            return Ok(Self {
                user_presence: true,
                ..Self::default()
            });
        };
        Ok(Self {
            platform_device: map.bool("plat")?.unwrap_or(false),
            resident_key: map.bool("rk")?.unwrap_or(false),
            client_pin: map.bool("clientPin")?,
            user_presence: map.bool("up")?.unwrap_or(true),
            user_verification: map.bool("uv")?,
            pin_uv_auth_token: map.bool("pinUvAuthToken")?,
            make_cred_uv_not_required: map.bool("makeCredUvNotRqd")?.unwrap_or(false),
            always_uv: map.bool("alwaysUv")?,
        })
    }
}

/// An Authenticator's metadata and capabilities.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Response {
    /// List of supported versions.
    pub versions: Vec<Version>,

    /// List of supported extension identifiers.
    pub extensions: Vec<String>,

    /// The claimed AAGUID.
    pub aaguid: Aaguid,

    /// List of supported options.
    pub options: Options,

    /// Maximum message size supported by the authenticator.
    pub max_msg_size: Option<u64>,

    /// List of supported PIN protocol versions.
    pub pin_protocols: Vec<u8>,

    /// Maximum number of credentials in an allow or exclude list.
    pub max_credential_count_in_list: Option<u64>,

    /// Maximum credential id length.
    pub max_credential_id_length: Option<u64>,

    /// Transports the authenticator is reachable over, as WebAuthn transport strings.
    pub transports: Option<Vec<String>>,

    /// Supported credential algorithms in order of preference. Unrecognized entries are skipped.
    pub algorithms: Option<Vec<iana::Algorithm>>,

    /// Whether the PIN must be changed before it can be used.
    pub force_pin_change: bool,

    /// Minimum PIN length in code points.
    pub min_pin_length: Option<u64>,

    /// Vendor firmware version.
    pub firmware_version: Option<u64>,
}

impl Response {
    /// Decode a GetInfo response body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let map = MapReader::from_slice(bytes)?;
        let aaguid = Aaguid::try_from(map.required_bytes(0x03)?.as_slice())?;

        let pin_protocols = map
            .array(0x06)?
            .unwrap_or_default()
            .iter()
            .map(|v| small_uint(v, "pinUvAuthProtocols"))
            .collect::<Result<_, _>>()?;

        // Algorithms are informational so an unparsable entry does not fail the whole response.
        let algorithms = map.array(0x0A).ok().flatten().map(|entries| {
            entries
                .into_iter()
                .filter_map(|entry| {
                    let entry = MapReader::from_value(entry).ok()?;
                    let alg = i64::try_from(entry.integer("alg").ok()??).ok()?;
                    iana::Algorithm::from_i64(alg)
                })
                .collect()
        });

        Ok(Self {
            versions: map
                .text_array(0x01)?
                .unwrap_or_default()
                .into_iter()
                .map(Version::from)
                .collect(),
            extensions: map.text_array(0x02)?.unwrap_or_default(),
            aaguid,
            options: Options::from_reader(map.map(0x04)?)?,
            max_msg_size: uint(&map, 0x05, "maxMsgSize")?,
            pin_protocols,
            max_credential_count_in_list: uint(&map, 0x07, "maxCredentialCountInList")?,
            max_credential_id_length: uint(&map, 0x08, "maxCredentialIdLength")?,
            transports: map.text_array(0x09)?,
            algorithms,
            force_pin_change: map.bool(0x0C)?.unwrap_or(false),
            min_pin_length: uint(&map, 0x0D, "minPINLength")?,
            firmware_version: uint(&map, 0x0E, "firmwareVersion")?,
        })
    }

    /// Whether `version` is listed
    pub fn supports(&self, version: &Version) -> bool {
        self.versions.contains(version)
    }

    /// Whether the authenticator speaks CTAP 2.1
    pub fn supports_fido_2_1(&self) -> bool {
        self.supports(&Version::Fido2_1)
    }

    /// Whether `pinProtocol` 1 is available. Authenticators that predate the `pinUvAuthProtocols`
    /// member only ever implemented version 1.
    pub fn supports_pin_protocol_one(&self) -> bool {
        self.pin_protocols.is_empty() || self.pin_protocols.contains(&1)
    }
}

fn uint(map: &MapReader, key: i64, field: &'static str) -> Result<Option<u64>, DecodeError> {
    map.integer(key)?
        .map(|value| {
            u64::try_from(value).map_err(|_| DecodeError::InvalidValue {
                field,
                reason: format!("{value} is not an unsigned integer"),
            })
        })
        .transpose()
}

fn small_uint(value: &Value, field: &'static str) -> Result<u8, DecodeError> {
    value
        .as_integer()
        .and_then(|i| u8::try_from(i).ok())
        .ok_or_else(|| DecodeError::InvalidValue {
            field,
            reason: "expected a small unsigned integer".into(),
        })
}
