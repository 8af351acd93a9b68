//! Address URI → started, registered server.
//!
//! ```text
//! "ssl://0.0.0.0:8443" ──parse──► ServerAddress::Ssl ──► TcpTransport::with_tls
//!                                                            │
//!                        Server::new(protocol, transport) ◄──┘
//!                                    │ start()
//!                                    ▼
//!                        ServerRegistry::add_server(name)
//! ```
//!
//! A server that fails to start is never registered, and a server whose
//! name is already taken is stopped again before the error is returned.

use std::sync::Arc;

use netpool_core::{AddressError, Protocol, ServerAddress, ServerOptions, StopMode};
use thiserror::Error;
use tracing::info;

use crate::application::registry::{RegistryError, ServerRegistry};
use crate::application::server::{Server, ServerError};
use crate::application::transport::{Transport, TransportError};
use crate::infrastructure::transport::{TcpTransport, TlsSettings};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An `ssl://` address was given without certificates.
    #[error("{0} requires TLS settings")]
    MissingTlsSettings(String),
}

/// Builds the transport adapter for `address`.
///
/// `tls` is required for `ssl://` and ignored for the other schemes.
///
/// # Errors
///
/// - [`LaunchError::MissingTlsSettings`] for `ssl://` without `tls`.
/// - [`LaunchError::Transport`] for `local://` on platforms without
///   Unix-domain sockets.
pub fn transport_for(
    address: &ServerAddress,
    tls: Option<TlsSettings>,
) -> Result<Arc<dyn Transport>, LaunchError> {
    match address {
        ServerAddress::Tcp(addr) => Ok(Arc::new(TcpTransport::new(*addr))),
        ServerAddress::Ssl(addr) => {
            let tls = tls.ok_or_else(|| LaunchError::MissingTlsSettings(address.to_string()))?;
            Ok(Arc::new(TcpTransport::with_tls(*addr, tls)))
        }
        #[cfg(unix)]
        ServerAddress::Local(path) => Ok(Arc::new(
            crate::infrastructure::transport::LocalTransport::new(path),
        )),
        #[cfg(not(unix))]
        ServerAddress::Local(_) => Err(TransportError::Unsupported("local").into()),
    }
}

/// Parses `address`, starts a server on it and registers it as `name`.
///
/// # Errors
///
/// Any [`LaunchError`]; nothing is left registered or listening on error.
pub fn start_server(
    registry: &ServerRegistry,
    name: &str,
    address: &str,
    protocol: Arc<dyn Protocol>,
    options: ServerOptions,
    tls: Option<TlsSettings>,
) -> Result<Arc<Server>, LaunchError> {
    let parsed = ServerAddress::parse(address)?;
    let transport = transport_for(&parsed, tls)?;
    let server = Arc::new(Server::new(protocol, transport, options)?);

    server.start()?;

    if let Err(e) = registry.add_server(name, Arc::clone(&server)) {
        server.stop(StopMode::InterruptClients);
        return Err(e.into());
    }

    info!(
        name = %name,
        server = %server.id(),
        address = %format!("{}://{}", parsed.scheme(), server.address()),
        "server launched"
    );
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::echo::EchoProtocol;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    #[test]
    fn test_ssl_without_tls_settings_is_rejected() {
        let address = ServerAddress::parse("ssl://127.0.0.1:0").unwrap();

        let result = transport_for(&address, None);

        assert!(matches!(result, Err(LaunchError::MissingTlsSettings(_))));
    }

    #[test]
    fn test_start_server_registers_and_serves() {
        // Arrange
        let registry = ServerRegistry::new();

        // Act
        let server = start_server(
            &registry,
            "echo",
            "tcp://127.0.0.1:0",
            Arc::new(EchoProtocol),
            ServerOptions::default(),
            None,
        )
        .unwrap();

        // Assert
        assert!(server.is_running());
        assert_eq!(registry.default_server_name().as_deref(), Some("echo"));

        let mut client = TcpStream::connect(server.address()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.write_all(b"abc").unwrap();
        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        drop(client);
        assert_eq!(registry.stop_all(StopMode::InterruptClients), 1);
    }

    #[test]
    fn test_duplicate_name_leaves_second_server_stopped() {
        // Arrange
        let registry = ServerRegistry::new();
        let first = start_server(
            &registry,
            "echo",
            "tcp://127.0.0.1:0",
            Arc::new(EchoProtocol),
            ServerOptions::default(),
            None,
        )
        .unwrap();

        // Act
        let result = start_server(
            &registry,
            "echo",
            "tcp://127.0.0.1:0",
            Arc::new(EchoProtocol),
            ServerOptions::default(),
            None,
        );

        // Assert
        assert!(matches!(
            result,
            Err(LaunchError::Registry(RegistryError::DuplicateName(_)))
        ));
        assert!(Arc::ptr_eq(&registry.server("echo").unwrap(), &first));
        first.stop(StopMode::InterruptClients);
    }

    #[test]
    fn test_bad_address_is_reported() {
        let registry = ServerRegistry::new();

        let result = start_server(
            &registry,
            "bad",
            "tcp://localhost",
            Arc::new(EchoProtocol),
            ServerOptions::default(),
            None,
        );

        assert!(matches!(result, Err(LaunchError::Address(_))));
        assert!(registry.is_empty());
    }
}
