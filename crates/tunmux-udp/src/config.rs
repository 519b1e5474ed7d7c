use serde::Deserialize;
use std::time::Duration;
use tunmux_connpool::{TunnelError, TunnelResult};

/// Per-flow parameters of a [`UdpHandler`](crate::UdpHandler)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// A flow with no datagram from the TUN device for this long closes
    #[serde(rename = "idle_timeout_ms", with = "duration_ms")]
    pub idle_timeout: Duration,

    /// Datagrams queued between the TUN reader and the tunnel
    pub queue_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(1),
            queue_size: 0x40,
        }
    }
}

impl UdpConfig {
    pub fn validate(&self) -> TunnelResult<()> {
        if self.idle_timeout.is_zero() {
            return Err(TunnelError::InvalidConfig(
                "idle_timeout must be greater than 0".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(TunnelError::InvalidConfig(
                "queue_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
