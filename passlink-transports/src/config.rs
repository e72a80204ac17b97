use std::time::Duration;

/// Timing knobs of the transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// How long to wait for each CTAPHID response, keep-alives reset it.
    pub hid_read_timeout: Duration,
    /// Upper bound on reading a USB HID report descriptor.
    pub descriptor_timeout: Duration,
    /// Delay between CTAP1 requests while the authenticator waits for a touch.
    pub user_presence_retry_delay: Duration,
    /// How long a CTAP2 command that waits on the user may take.
    pub ctap2_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            hid_read_timeout: Duration::from_secs(1),
            descriptor_timeout: Duration::from_secs(5),
            user_presence_retry_delay: Duration::from_millis(100),
            ctap2_timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Set the CTAPHID read timeout.
    pub fn with_hid_read_timeout(mut self, timeout: Duration) -> Self {
        self.hid_read_timeout = timeout;
        self
    }

    /// Set the report descriptor timeout.
    pub fn with_descriptor_timeout(mut self, timeout: Duration) -> Self {
        self.descriptor_timeout = timeout;
        self
    }

    /// Set the delay between CTAP1 user presence retries.
    pub fn with_user_presence_retry_delay(mut self, delay: Duration) -> Self {
        self.user_presence_retry_delay = delay;
        self
    }

    /// Set the timeout of CTAP2 commands that wait on the user.
    pub fn with_ctap2_timeout(mut self, timeout: Duration) -> Self {
        self.ctap2_timeout = timeout;
        self
    }
}
