//! Elliptic curve public keys in [COSE_Key] format.
//!
//! Relying parties compare coordinates byte for byte, so every coordinate is encoded at exactly the
//! width of the curve's field elements no matter how the platform handed it over. Big integer
//! representations commonly add a leading sign byte or drop leading zeroes; both are normalised
//! here while preserving the numeric value.
//!
//! [COSE_Key]: https://www.rfc-editor.org/rfc/rfc9052#section-7

use coset::{
    iana::{self, EnumI64},
    AsCborValue, CoseKeyBuilder, Label, RegisteredLabel, RegisteredLabelWithPrivate,
};

use crate::cbor::{self, DecodeError, EncodeError, Value};

/// An EC2 public key as it appears in attested credential data and in the client PIN key
/// agreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    /// The signature or key agreement algorithm the key is used with.
    pub algorithm: iana::Algorithm,
    /// The curve the point lies on.
    pub curve: iana::EllipticCurve,
    x: Vec<u8>,
    y: Vec<u8>,
    point_size: usize,
}

impl CoseKey {
    /// Create a key from its coordinates. The width of each coordinate defaults to the field size
    /// of `curve`.
    pub fn new(
        algorithm: iana::Algorithm,
        curve: iana::EllipticCurve,
        x: impl Into<Vec<u8>>,
        y: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            algorithm,
            curve,
            x: x.into(),
            y: y.into(),
            point_size: field_size(curve),
        }
    }

    /// Shorthand for a P-256 key used with [`iana::Algorithm::ES256`].
    pub fn es256(x: impl Into<Vec<u8>>, y: impl Into<Vec<u8>>) -> Self {
        Self::new(iana::Algorithm::ES256, iana::EllipticCurve::P_256, x, y)
    }

    /// Override the width coordinates are padded to.
    pub fn with_point_size(mut self, point_size: usize) -> Self {
        self.point_size = point_size;
        self
    }

    /// Width of each encoded coordinate
    pub fn point_size(&self) -> usize {
        self.point_size
    }

    /// The x coordinate as given
    pub fn x(&self) -> &[u8] {
        &self.x
    }

    /// The y coordinate as given
    pub fn y(&self) -> &[u8] {
        &self.y
    }

    /// The x coordinate padded to [`Self::point_size`]
    pub fn fixed_x(&self) -> Result<Vec<u8>, EncodeError> {
        fixed_width("x coordinate", &self.x, self.point_size)
    }

    /// The y coordinate padded to [`Self::point_size`]
    pub fn fixed_y(&self) -> Result<Vec<u8>, EncodeError> {
        fixed_width("y coordinate", &self.y, self.point_size)
    }

    /// Build the COSE structure as a CBOR value.
    pub fn to_value(&self) -> Result<Value, EncodeError> {
        CoseKeyBuilder::new_ec2_pub_key(self.curve, self.fixed_x()?, self.fixed_y()?)
            .algorithm(self.algorithm)
            .build()
            .to_cbor_value()
            .map_err(|e| EncodeError::Cbor(e.to_string()))
    }

    /// Encode as `{1: 2, 3: alg, -1: crv, -2: x, -3: y}` in canonical order.
    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        cbor::to_vec(&self.to_value()?)
    }

    /// Decode a COSE EC2 public key.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::from_value(cbor::from_slice(bytes)?)
    }

    /// Read a COSE EC2 public key out of an already decoded CBOR value.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let key =
            coset::CoseKey::from_cbor_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        if key.kty != RegisteredLabel::Assigned(iana::KeyType::EC2) {
            return Err(DecodeError::InvalidValue {
                field: "kty",
                reason: format!("{:?} is not an EC2 key", key.kty),
            });
        }
        let algorithm = match key.alg {
            Some(RegisteredLabelWithPrivate::Assigned(alg)) => alg,
            Some(other) => {
                return Err(DecodeError::InvalidValue {
                    field: "alg",
                    reason: format!("unsupported algorithm {other:?}"),
                })
            }
            None => return Err(DecodeError::MissingKey("alg".into())),
        };

        let param = |p: iana::Ec2KeyParameter| {
            key.params
                .iter()
                .find_map(|(label, value)| (*label == Label::Int(p.to_i64())).then_some(value))
        };
        let curve = param(iana::Ec2KeyParameter::Crv)
            .and_then(Value::as_integer)
            .and_then(|crv| i64::try_from(crv).ok())
            .and_then(iana::EllipticCurve::from_i64)
            .ok_or_else(|| DecodeError::MissingKey("crv".into()))?;
        let x = param(iana::Ec2KeyParameter::X)
            .and_then(Value::as_bytes)
            .ok_or_else(|| DecodeError::MissingKey("x".into()))?;
        let y = param(iana::Ec2KeyParameter::Y)
            .and_then(Value::as_bytes)
            .ok_or_else(|| DecodeError::MissingKey("y".into()))?;

        Ok(Self::new(algorithm, curve, x.clone(), y.clone()))
    }
}

/// Byte width of a field element of `curve`.
fn field_size(curve: iana::EllipticCurve) -> usize {
    match curve {
        iana::EllipticCurve::P_384 => 48,
        iana::EllipticCurve::P_521 => 66,
        _ => 32,
    }
}

/// Strip any leading zero bytes and left pad back to exactly `size` bytes.
fn fixed_width(field: &'static str, bytes: &[u8], size: usize) -> Result<Vec<u8>, EncodeError> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first..];
    if significant.len() > size {
        return Err(EncodeError::TooLong {
            field,
            len: significant.len(),
            max: size,
        });
    }
    let mut out = vec![0; size - significant.len()];
    out.extend_from_slice(significant);
    Ok(out)
}
