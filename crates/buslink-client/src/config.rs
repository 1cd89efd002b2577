//! Client configuration

use std::time::Duration;

/// Default period between retransmissions of an unacknowledged request.
pub const DEFAULT_RESEND_INTERVAL: Duration = Duration::from_millis(500);

/// Default idle time before a liveness probe is issued.
pub const DEFAULT_HEARTBEAT_DELAY: Duration = Duration::from_secs(10);

/// Default deadline for a single request/response exchange.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing parameters for a tunnel session.
///
/// A zero duration is unusable and falls back to the documented default
/// during validation, so `ClientConfig::default()` and a zero-initialised
/// config behave identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long to wait for a response until the request is resent.
    pub resend_interval: Duration,

    /// How much time has to elapse without any incoming communication until
    /// a heartbeat is triggered.
    pub heartbeat_delay: Duration,

    /// How long to wait for the response to a connect, send or heartbeat
    /// exchange before giving up on it.
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            resend_interval: DEFAULT_RESEND_INTERVAL,
            heartbeat_delay: DEFAULT_HEARTBEAT_DELAY,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Replace unusable durations with their defaults.
    pub fn validated(self) -> Self {
        Self {
            resend_interval: if self.resend_interval.is_zero() {
                DEFAULT_RESEND_INTERVAL
            } else {
                self.resend_interval
            },
            heartbeat_delay: if self.heartbeat_delay.is_zero() {
                DEFAULT_HEARTBEAT_DELAY
            } else {
                self.heartbeat_delay
            },
            response_timeout: if self.response_timeout.is_zero() {
                DEFAULT_RESPONSE_TIMEOUT
            } else {
                self.response_timeout
            },
        }
    }
}
