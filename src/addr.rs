//! Endpoint addressing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host/port identity of a single cluster node.
///
/// `Addr` is the key the balancer uses to track endpoint health, so it is
/// cheap to clone, hash and compare. Two connections to the same `Addr`
/// pessimize the same balancer entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Addr {
    /// Host name or IP address of the node.
    pub host: String,
    /// gRPC port of the node.
    pub port: u16,
}

impl Addr {
    /// Create an address from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error produced when parsing an [`Addr`] from a `host:port` string.
#[derive(Debug, Error)]
pub enum AddrParseError {
    /// The string has no `:` separator.
    #[error("missing ':' separator in address")]
    MissingPort,
    /// The host part before the separator is empty.
    #[error("empty host in address")]
    EmptyHost,
    /// The port part is not a valid 16-bit integer.
    #[error("invalid port in address: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

impl FromStr for Addr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or(AddrParseError::MissingPort)?;
        if host.is_empty() {
            return Err(AddrParseError::EmptyHost);
        }
        Ok(Self::new(host, port.parse::<u16>()?))
    }
}
