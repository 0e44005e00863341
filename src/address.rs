//! The address of the server endpoint a pool's connections are established against.

use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::error::{Error, ErrorKind};

const DEFAULT_PORT: u16 = 27017;

/// The address of a single server endpoint: a hostname and an optional port. Two addresses
/// compare equal if their hosts match and their (possibly defaulted) ports match.
#[derive(Clone, Debug, Eq, Serialize)]
pub struct Address {
    /// The hostname or IP address of the server.
    pub host: String,

    /// The TCP port the server listens on. Defaults to 27017 when absent.
    pub port: Option<u16>,
}

impl Address {
    /// Constructs an address directly from a host and an optional port.
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a `host` or `host:port` string into an `Address`.
    pub fn parse(address: impl AsRef<str>) -> Result<Self, Error> {
        let address = address.as_ref();
        let mut parts = address.split(':');

        let host = match parts.next() {
            Some(part) if !part.is_empty() => part.to_string(),
            _ => {
                return Err(ErrorKind::Config {
                    message: format!("invalid address: \"{}\"; host cannot be empty", address),
                }
                .into())
            }
        };

        let port = match parts.next() {
            Some(part) => {
                let port: u16 = part.parse().map_err(|_| ErrorKind::Config {
                    message: format!(
                        "port must be a valid 16-bit unsigned integer, instead got: {}",
                        part
                    ),
                })?;
                if parts.next().is_some() {
                    return Err(ErrorKind::Config {
                        message: format!(
                            "address \"{}\" contains more than one ':'",
                            address
                        ),
                    }
                    .into());
                }
                Some(port)
            }
            None => None,
        };

        Ok(Self { host, port })
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        Self::parse(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port.unwrap_or(DEFAULT_PORT))
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port.unwrap_or(DEFAULT_PORT) == other.port.unwrap_or(DEFAULT_PORT)
    }
}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.unwrap_or(DEFAULT_PORT).hash(state);
    }
}
