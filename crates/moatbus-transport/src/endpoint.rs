use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

/// Where a bus byte stream lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket path, typically a simulated shared bus.
    Unix(PathBuf),
    /// `host:port` of a TCP serial bridge.
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = TransportError;

    /// `tcp:HOST:PORT` selects TCP, anything else is a socket path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(TransportError::InvalidEndpoint(s.to_string()));
        }
        match s.strip_prefix("tcp:") {
            Some(addr) => {
                let valid = addr
                    .rsplit_once(':')
                    .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                    .unwrap_or(false);
                if !valid {
                    return Err(TransportError::InvalidEndpoint(s.to_string()));
                }
                Ok(Endpoint::Tcp(addr.to_string()))
            }
            None => Ok(Endpoint::Unix(PathBuf::from(s))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}
