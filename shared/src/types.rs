use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::protocol::DEFAULT_PORT;

/// Network endpoint of a registered (or registering) server.
///
/// The port is optional on input and defaults to [`DEFAULT_PORT`], so
/// `10.0.0.5` and `10.0.0.5:4950` are the same address. The `Display` form
/// is the canonical `ip:port` string used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerAddress(SocketAddr);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid server address: {0:?}")]
pub struct AddressError(pub String);

impl ServerAddress {
    /// Parse `ip`, `ip:port`, `[v6]:port` or a bare IPv6 literal.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        if let Ok(addr) = SocketAddr::from_str(s) {
            return Ok(Self(addr));
        }
        IpAddr::from_str(s)
            .map(|ip| Self(SocketAddr::new(ip, DEFAULT_PORT)))
            .map_err(|_| AddressError(s.to_string()))
    }

    /// The bare IP, used for per-host accounting.
    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Address as written in LIST replies: the port is left out when it
    /// is the default one.
    pub fn list_form(&self) -> String {
        if self.0.port() == DEFAULT_PORT {
            self.0.ip().to_string()
        } else {
            self.0.to_string()
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<SocketAddr> for ServerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl TryFrom<String> for ServerAddress {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ServerAddress> for String {
    fn from(addr: ServerAddress) -> Self {
        addr.to_string()
    }
}

/// A registered server as reported by the master's status API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSummary {
    pub address: ServerAddress,

    /// Free-text description, unescaped
    pub description: String,

    pub tags: BTreeSet<String>,

    /// When the server completed its describe handshake
    pub registered_at: DateTime<Utc>,

    /// Seconds since the last ANNOUNCE or DESCRIPTION
    pub idle_secs: u64,

    /// Seconds left before the entry expires without a keep-alive
    pub expires_in_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port_normalizes() {
        let bare = ServerAddress::parse("10.0.0.5").unwrap();
        let explicit = ServerAddress::parse("10.0.0.5:4950").unwrap();
        assert_eq!(bare, explicit);
        assert_eq!(bare.to_string(), "10.0.0.5:4950");
    }

    #[test]
    fn test_list_form_omits_default_port() {
        let addr = ServerAddress::parse("10.0.0.5:4950").unwrap();
        assert_eq!(addr.list_form(), "10.0.0.5");

        let addr = ServerAddress::parse("10.0.0.5:5000").unwrap();
        assert_eq!(addr.list_form(), "10.0.0.5:5000");
    }

    #[test]
    fn test_ipv6_forms() {
        let bare = ServerAddress::parse("::1").unwrap();
        let bracketed = ServerAddress::parse("[::1]:4950").unwrap();
        assert_eq!(bare, bracketed);
        assert_eq!(bare.list_form(), "::1");

        let other = ServerAddress::parse("[::1]:7000").unwrap();
        assert_eq!(other.list_form(), "[::1]:7000");
        assert_eq!(ServerAddress::parse(&other.list_form()).unwrap(), other);
    }

    #[test]
    fn test_invalid_address() {
        assert!(ServerAddress::parse("").is_err());
        assert!(ServerAddress::parse("example.com").is_err());
        assert!(ServerAddress::parse("10.0.0.5:port").is_err());
    }

    #[test]
    fn test_ip_ignores_port() {
        let a = ServerAddress::parse("10.0.0.5:1").unwrap();
        let b = ServerAddress::parse("10.0.0.5:2").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.ip(), b.ip());
    }
}
