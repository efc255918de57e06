use std::time::Duration;

use serde::Deserialize;

use crate::error::{ReliableError, Result};
use crate::wire::ResetParams;

/// Smallest usable window.
pub const MIN_WINDOW: u16 = 4;
/// Largest window; sequence numbers must fit the wire's `u16`.
pub const MAX_WINDOW: u16 = 4096;
/// Shortest retransmit timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Channel parameters proposed in the reset handshake.
///
/// Both ends end up with the larger timeout and the smaller window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReliableConfig {
    /// Sequence space; at most half of it is in flight.
    pub window: u16,
    /// Retransmit (and reset resend) interval.
    #[serde(rename = "timeout_ms", deserialize_with = "millis")]
    pub timeout: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            window: 8,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl ReliableConfig {
    pub fn new(window: u16, timeout: Duration) -> Result<Self> {
        let config = Self { window, timeout };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_WINDOW..=MAX_WINDOW).contains(&self.window) {
            return Err(ReliableError::Config(format!(
                "window {} outside {MIN_WINDOW}..={MAX_WINDOW}",
                self.window
            )));
        }
        if self.timeout < MIN_TIMEOUT {
            return Err(ReliableError::Config(format!(
                "timeout {:?} below {MIN_TIMEOUT:?}",
                self.timeout
            )));
        }
        Ok(())
    }

    /// Largest number of unacknowledged messages.
    pub fn in_flight_limit(&self) -> u16 {
        self.window / 2
    }

    /// Parameters to propose to the peer.
    pub fn params(&self, session: u32) -> ResetParams {
        ResetParams {
            timeout_ms: self.timeout.as_millis().min(u128::from(u32::MAX)) as u32,
            window: self.window,
            session: Some(session),
        }
    }

    /// Combine with the peer's proposal: larger timeout, smaller window.
    pub fn merge(&self, peer: &ResetParams) -> Self {
        let timeout = self
            .timeout
            .max(Duration::from_millis(peer.timeout_ms.into()))
            .max(MIN_TIMEOUT);
        let window = self.window.min(peer.window).clamp(MIN_WINDOW, MAX_WINDOW);
        Self { window, timeout }
    }
}

fn millis<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}
