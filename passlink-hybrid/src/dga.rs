//! Relay hostnames, generated from a domain id so that new relays can be added without shipping a
//! table.
use passlink_types::crypto::sha256_concat;

use crate::TunnelError;

/// Domains that predate the generated ones.
const ASSIGNED_DOMAINS: [&str; 2] = ["cable.ua5v.com", "cable.auth.com"];

const TLDS: [&str; 4] = ["com", "org", "net", "info"];

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

const DOMAIN_SEED: &[u8] = b"caBLEv2 tunnel server domain";

/// The hostname of the relay with `domain_id`.
pub fn decode_domain(domain_id: u16) -> Result<String, TunnelError> {
    if let Some(domain) = ASSIGNED_DOMAINS.get(usize::from(domain_id)) {
        return Ok((*domain).to_owned());
    }
    if domain_id >= 256 {
        return Err(TunnelError::InvalidDomain(domain_id));
    }

    let digest = sha256_concat([DOMAIN_SEED, &domain_id.to_le_bytes()[..], &[0u8][..]]);
    let mut first = [0; 8];
    first.copy_from_slice(&digest[..8]);
    let mut value = u64::from_le_bytes(first);

    let tld = TLDS[usize::from(digest[0] & 3)];
    value >>= 2;

    let mut label = String::new();
    while value != 0 {
        let digit = value.to_le_bytes()[0] & 0x1f;
        label.push(char::from(BASE32_ALPHABET[usize::from(digit)]));
        value >>= 5;
    }
    Ok(format!("cable.{label}.{tld}"))
}
