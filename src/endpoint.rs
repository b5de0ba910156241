//! Address representation: one enum spanning IPv4, IPv6 and Unix-domain
//! addresses, since every socket facade in this crate needs to name a peer
//! regardless of address family.

use std::fmt;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Kind};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    V4(SocketAddrV4),
    V6(SocketAddrV6),
    Unix(PathBuf),
}

impl Endpoint {
    pub fn tcp(addr: SocketAddr) -> Endpoint {
        match addr {
            SocketAddr::V4(v4) => Endpoint::V4(v4),
            SocketAddr::V6(v6) => Endpoint::V6(v6),
        }
    }

    pub fn unix(path: impl AsRef<Path>) -> Endpoint {
        Endpoint::Unix(path.as_ref().to_path_buf())
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Endpoint::Unix(_))
    }

    /// The `std::net` view of this address, for the families that have one.
    pub fn as_socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Endpoint::V4(v4) => Some(SocketAddr::V4(*v4)),
            Endpoint::V6(v6) => Some(SocketAddr::V6(*v6)),
            Endpoint::Unix(_) => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::V4(v4) => write!(f, "{v4}"),
            Endpoint::V6(v6) => write!(f, "[{}]:{}", v6.ip(), v6.port()),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Parses `host:port`, `[v6]:port`, or `unix:<path>`, the three textual
/// forms this type accepts.
impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Endpoint, Error> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(Error::new(Kind::InvalidEndpoint));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        match s.parse::<SocketAddr>() {
            Ok(SocketAddr::V4(v4)) => Ok(Endpoint::V4(v4)),
            Ok(SocketAddr::V6(v6)) => Ok(Endpoint::V6(v6)),
            Err(_) => Err(Error::new(Kind::InvalidEndpoint)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_v4() {
        let ep: Endpoint = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(ep.to_string(), "127.0.0.1:8080");
        assert!(matches!(ep, Endpoint::V4(_)));
    }

    #[test]
    fn round_trips_v6() {
        let ep: Endpoint = "[::1]:9090".parse().unwrap();
        assert_eq!(ep.to_string(), "[::1]:9090");
        assert!(matches!(ep, Endpoint::V6(_)));
    }

    #[test]
    fn round_trips_unix() {
        let ep: Endpoint = "unix:/tmp/my.sock".parse().unwrap();
        assert_eq!(ep.to_string(), "unix:/tmp/my.sock");
        assert!(ep.is_unix());
    }

    #[test]
    fn rejects_garbage() {
        assert!("not-an-endpoint".parse::<Endpoint>().is_err());
        assert!("unix:".parse::<Endpoint>().is_err());
    }
}
