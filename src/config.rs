//! Connection configuration.

use std::time::Duration;

use serde::Deserialize;

/// Tunables for one connection wrapper.
///
/// Deserializes from the driver configuration file with human-readable
/// durations (`"30s"`, `"1m"`). Loading and merging of configuration sources
/// is the driver core's concern; this crate only consumes the result.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnConfig {
    /// Inactivity window after which the cached channel is closed. Zero
    /// falls back to one minute.
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,
    /// Connect timeout for the default dialer. Zero disables it.
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    /// TCP keepalive interval for the default dialer.
    #[serde(with = "humantime_serde")]
    pub tcp_keepalive: Option<Duration>,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(60),
            dial_timeout: Duration::from_secs(5),
            tcp_keepalive: None,
        }
    }
}
