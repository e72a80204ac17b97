//! Websocket URLs of the relay.
use passlink_types::encoding::hex;
use url::Url;

use crate::TunnelError;

fn parse(url: String) -> Result<Url, TunnelError> {
    Url::parse(&url).map_err(|e| TunnelError::Socket(Some(format!("invalid relay URL {url}: {e}"))))
}

/// Where the authenticator opens a fresh tunnel for the client to join.
pub fn new_tunnel_url(domain: &str, tunnel_id: &[u8; 16]) -> Result<Url, TunnelError> {
    parse(format!("wss://{domain}/cable/new/{}", hex(tunnel_id)))
}

/// Where the client joins the tunnel the relay routed to `routing_id`.
pub fn connect_tunnel_url(
    domain: &str,
    routing_id: &[u8; 3],
    tunnel_id: &[u8; 16],
) -> Result<Url, TunnelError> {
    parse(format!(
        "wss://{domain}/cable/connect/{}/{}",
        hex(routing_id),
        hex(tunnel_id)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TUNNEL_ID: [u8; 16] = [
        0xde, 0x1d, 0x81, 0x50, 0xb4, 0x5f, 0x03, 0x34, 0x9b, 0x2b, 0x00, 0xa5, 0x2e, 0x2e, 0x89,
        0x3e,
    ];

    #[test]
    fn new_tunnel() {
        let url = new_tunnel_url("cable.ua5v.com", &TUNNEL_ID).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://cable.ua5v.com/cable/new/DE1D8150B45F03349B2B00A52E2E893E"
        );
    }

    #[test]
    fn connect_tunnel() {
        let url = connect_tunnel_url("cable.auth.com", &[0xaa, 0xbb, 0xcc], &TUNNEL_ID).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://cable.auth.com/cable/connect/AABBCC/DE1D8150B45F03349B2B00A52E2E893E"
        );
        assert_eq!(url.host_str(), Some("cable.auth.com"));
    }

    #[test]
    fn bad_domains_are_rejected() {
        assert!(new_tunnel_url("bad host", &TUNNEL_ID).is_err());
    }
}
