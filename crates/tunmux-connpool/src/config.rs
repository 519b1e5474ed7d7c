//! Tunnel configuration

use crate::error::{TunnelError, TunnelResult};
use serde::Deserialize;
use std::time::Duration;

/// Flow-control and buffering parameters of a [`Tunnel`](crate::Tunnel)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// A sync handshake runs after every `sync_ratio` data messages
    pub sync_ratio: u32,

    /// How many sync windows the sender may run ahead of the last ack
    pub ack_window: u32,

    /// Capacity of the read loop's message channel
    pub read_buffer: usize,

    /// Sleep between checks while waiting for an ack
    #[serde(rename = "ack_poll_interval_ms", with = "duration_ms")]
    pub ack_poll_interval: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            sync_ratio: 8,
            ack_window: 1,
            read_buffer: 5,
            ack_poll_interval: Duration::from_millis(1),
        }
    }
}

impl TunnelConfig {
    /// Check the configuration. A `sync_ratio` of 1 would run the handshake
    /// on every message and is rejected.
    pub fn validate(&self) -> TunnelResult<()> {
        if self.sync_ratio < 2 {
            return Err(TunnelError::InvalidConfig(format!(
                "sync_ratio must be at least 2, got {}",
                self.sync_ratio
            )));
        }
        if self.read_buffer == 0 {
            return Err(TunnelError::InvalidConfig(
                "read_buffer must be greater than 0".to_string(),
            ));
        }
        if self.ack_poll_interval.is_zero() {
            return Err(TunnelError::InvalidConfig(
                "ack_poll_interval must be greater than 0".to_string(),
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
