use std::time::Duration;

use crate::{dga, TunnelError};

/// Knobs of the hybrid transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridConfig {
    /// How long to wait for the relay to connect a tunnel.
    pub connect_timeout: Duration,
    /// Relay host to use instead of the one the domain id names.
    pub domain_override: Option<String>,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            domain_override: None,
        }
    }
}

impl HybridConfig {
    /// Set the tunnel connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Talk to `domain` whatever relay the peer names.
    pub fn with_domain_override(mut self, domain: impl Into<String>) -> Self {
        self.domain_override = Some(domain.into());
        self
    }

    /// The relay to use for `domain_id`.
    pub fn relay_domain(&self, domain_id: u16) -> Result<String, TunnelError> {
        match &self.domain_override {
            Some(domain) => Ok(domain.clone()),
            None => dga::decode_domain(domain_id),
        }
    }
}
