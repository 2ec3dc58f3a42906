use std::time::Duration;

use crate::errors::ServiceError;

/// Timeouts applied once to an adapter's shared transport.
///
/// A connect timeout surfaces as an upstream connect fault; read and call
/// timeouts hit while streaming surface as read faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportTimeouts {
    pub connect: Duration,
    /// Maximum idle gap between two body reads.
    pub read: Duration,
    /// Upper bound for the whole call, body included.
    pub call: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(60),
            call: Duration::from_secs(300),
        }
    }
}

impl TransportTimeouts {
    /// Reads `CHAT_STREAM_{CONNECT,READ,CALL}_TIMEOUT_MS`, keeping defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self, ServiceError> {
        let defaults = Self::default();
        Ok(Self {
            connect: env_millis("CHAT_STREAM_CONNECT_TIMEOUT_MS")?.unwrap_or(defaults.connect),
            read: env_millis("CHAT_STREAM_READ_TIMEOUT_MS")?.unwrap_or(defaults.read),
            call: env_millis("CHAT_STREAM_CALL_TIMEOUT_MS")?.unwrap_or(defaults.call),
        })
    }

    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = timeout;
        self
    }

    pub fn read(mut self, timeout: Duration) -> Self {
        self.read = timeout;
        self
    }

    pub fn call(mut self, timeout: Duration) -> Self {
        self.call = timeout;
        self
    }
}

/// Returns a trimmed, non-empty env value.
pub(crate) fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_millis(key: &str) -> Result<Option<Duration>, ServiceError> {
    let Some(raw) = env_string(key) else {
        return Ok(None);
    };
    parse_millis(&raw)
        .map(Some)
        .ok_or_else(|| ServiceError::Config(format!("{key} must be a positive integer, got `{raw}`")))
}

fn parse_millis(raw: &str) -> Option<Duration> {
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(ms) => Some(Duration::from_millis(ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_millis_rejects_zero_and_garbage() {
        assert_eq!(parse_millis("1500"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_millis("0"), None);
        assert_eq!(parse_millis("soon"), None);
    }

    #[test]
    fn builder_overrides_single_timeout() {
        let timeouts = TransportTimeouts::default().read(Duration::from_secs(5));
        assert_eq!(timeouts.read, Duration::from_secs(5));
        assert_eq!(timeouts.connect, TransportTimeouts::default().connect);
    }
}
