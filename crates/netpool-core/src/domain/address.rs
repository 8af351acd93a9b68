//! Transport address URIs.
//!
//! A server is named by a URI of the form `scheme://rest`:
//!
//! ```text
//! tcp://127.0.0.1:8080          plain TCP, IPv4
//! tcp://[::1]:8080              plain TCP, IPv6 (brackets required)
//! ssl://0.0.0.0:8443            TLS over TCP (`tls://` is accepted too)
//! local:///run/netpool.sock     Unix domain socket path
//! ```
//!
//! For TCP and TLS the port is mandatory and a trailing slash is rejected.
//! For local sockets `rest` is an opaque, OS-specific path.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing a [`ServerAddress`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The string has no `scheme://` prefix.
    #[error("address `{0}` has no scheme (expected tcp://, ssl:// or local://)")]
    MissingScheme(String),

    /// The scheme is not one netpool knows how to listen on.
    #[error("unknown address scheme `{0}`")]
    UnknownScheme(String),

    /// The TCP part is not `<ipv4>:<port>` or `[<ipv6>]:<port>`.
    #[error("invalid TCP address `{0}`: expected <ipv4>:<port> or [<ipv6>]:<port>")]
    InvalidTcpAddress(String),

    /// TCP addresses must not end in `/`.
    #[error("TCP address `{0}` must not end with a slash")]
    TrailingSlash(String),

    /// `local://` was given without a path.
    #[error("local socket name is empty")]
    EmptyLocalName,
}

/// A parsed listening address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerAddress {
    /// Plain TCP.
    Tcp(SocketAddr),
    /// TLS over TCP.
    Ssl(SocketAddr),
    /// Local IPC endpoint (Unix domain socket path).
    Local(String),
}

impl ServerAddress {
    /// Parses a `scheme://rest` URI.
    ///
    /// The scheme is matched case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] when the scheme is missing or unknown, or the
    /// transport-specific part is malformed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use netpool_core::ServerAddress;
    ///
    /// let addr = ServerAddress::parse("tcp://127.0.0.1:7878").unwrap();
    /// assert_eq!(addr.scheme(), "tcp");
    /// assert_eq!(addr.rest(), "127.0.0.1:7878");
    /// ```
    pub fn parse(uri: &str) -> Result<Self, AddressError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| AddressError::MissingScheme(uri.to_string()))?;

        match scheme.to_ascii_lowercase().as_str() {
            "tcp" => parse_tcp(rest).map(Self::Tcp),
            "ssl" | "tls" => parse_tcp(rest).map(Self::Ssl),
            "local" => {
                if rest.is_empty() {
                    Err(AddressError::EmptyLocalName)
                } else {
                    Ok(Self::Local(rest.to_string()))
                }
            }
            other => Err(AddressError::UnknownScheme(other.to_string())),
        }
    }

    /// Canonical scheme name (`tcp`, `ssl` or `local`).
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            Self::Ssl(_) => "ssl",
            Self::Local(_) => "local",
        }
    }

    /// The transport-specific part, as a transport's `server_address()`
    /// reports it.
    pub fn rest(&self) -> String {
        match self {
            Self::Tcp(addr) | Self::Ssl(addr) => addr.to_string(),
            Self::Local(name) => name.clone(),
        }
    }

    /// Returns `true` for encrypted transports.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Ssl(_))
    }
}

impl FromStr for ServerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme(), self.rest())
    }
}

/// Parses the `<ipv4>:<port>` / `[<ipv6>]:<port>` grammar used by TCP and TLS.
///
/// `SocketAddr`'s parser already enforces the mandatory port and the
/// bracketed IPv6 form; the trailing-slash check exists so the error message
/// is specific.
pub fn parse_tcp(rest: &str) -> Result<SocketAddr, AddressError> {
    if rest.ends_with('/') {
        return Err(AddressError::TrailingSlash(rest.to_string()));
    }
    rest.parse::<SocketAddr>()
        .map_err(|_| AddressError::InvalidTcpAddress(rest.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_ipv4() {
        // Act
        let addr = ServerAddress::parse("tcp://127.0.0.1:8080").unwrap();

        // Assert
        assert_eq!(addr, ServerAddress::Tcp("127.0.0.1:8080".parse().unwrap()));
        assert!(!addr.is_encrypted());
    }

    #[test]
    fn test_parse_tcp_ipv6_requires_brackets() {
        assert!(ServerAddress::parse("tcp://[::1]:9000").is_ok());
        assert_eq!(
            ServerAddress::parse("tcp://::1:9000"),
            Err(AddressError::InvalidTcpAddress("::1:9000".to_string()))
        );
    }

    #[test]
    fn test_parse_tcp_without_port_is_rejected() {
        assert!(matches!(
            ServerAddress::parse("tcp://127.0.0.1"),
            Err(AddressError::InvalidTcpAddress(_))
        ));
    }

    #[test]
    fn test_parse_tcp_with_trailing_slash_is_rejected() {
        assert_eq!(
            ServerAddress::parse("tcp://127.0.0.1:80/"),
            Err(AddressError::TrailingSlash("127.0.0.1:80/".to_string()))
        );
    }

    #[test]
    fn test_parse_ssl_and_tls_alias() {
        let ssl = ServerAddress::parse("ssl://0.0.0.0:8443").unwrap();
        let tls = ServerAddress::parse("TLS://0.0.0.0:8443").unwrap();

        assert_eq!(ssl, tls);
        assert!(ssl.is_encrypted());
        assert_eq!(ssl.scheme(), "ssl");
    }

    #[test]
    fn test_parse_local_keeps_path_verbatim() {
        let addr = ServerAddress::parse("local:///tmp/netpool.sock").unwrap();
        assert_eq!(addr, ServerAddress::Local("/tmp/netpool.sock".to_string()));
        assert_eq!(addr.to_string(), "local:///tmp/netpool.sock");
    }

    #[test]
    fn test_parse_local_empty_name_is_rejected() {
        assert_eq!(
            ServerAddress::parse("local://"),
            Err(AddressError::EmptyLocalName)
        );
    }

    #[test]
    fn test_parse_missing_scheme() {
        assert!(matches!(
            ServerAddress::parse("127.0.0.1:80"),
            Err(AddressError::MissingScheme(_))
        ));
    }

    #[test]
    fn test_parse_unknown_scheme() {
        assert_eq!(
            ServerAddress::parse("udp://127.0.0.1:53"),
            Err(AddressError::UnknownScheme("udp".to_string()))
        );
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        let original: ServerAddress = "tcp://[::1]:7000".parse().unwrap();
        let reparsed: ServerAddress = original.to_string().parse().unwrap();
        assert_eq!(original, reparsed);
    }
}
