//! Utility functions for encoding datatypes in a consistent way across the `passlink` libraries.

use data_encoding::{BASE64URL_NOPAD, BASE64_NOPAD, HEXLOWER_PERMISSIVE, HEXUPPER};

/// Convert bytes to base64url without padding
pub fn base64url(data: &[u8]) -> String {
    BASE64URL_NOPAD.encode(data)
}

/// Try parsing from base64 with or without padding
pub(crate) fn try_from_base64(input: &str) -> Option<Vec<u8>> {
    BASE64_NOPAD
        .decode(input.trim_end_matches('=').as_bytes())
        .ok()
}

/// Try parsing from base64url with or without padding
pub fn try_from_base64url(input: &str) -> Option<Vec<u8>> {
    BASE64URL_NOPAD
        .decode(input.trim_end_matches('=').as_bytes())
        .ok()
}

/// Convert bytes to uppercase hexadecimal.
pub fn hex(data: &[u8]) -> String {
    HEXUPPER.encode(data)
}

/// Try parsing hexadecimal in either case.
pub fn try_from_hex(input: &str) -> Option<Vec<u8>> {
    HEXLOWER_PERMISSIVE.decode(input.trim().as_bytes()).ok()
}
