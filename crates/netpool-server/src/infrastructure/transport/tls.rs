//! TLS settings and the server-side handshake used by the `ssl://` transport.
//!
//! The handshake does not run on the accept thread.  The accept loop parks
//! the raw TCP stream like any other; the worker that is handed the
//! descriptor performs the handshake inside `create_socket`, bounded by
//! [`TlsSettings::handshake_timeout`].  A failed or slow handshake only costs
//! that worker one session.  Connections refused as busy are the exception:
//! the busy message is written from the accept thread, so their handshake
//! runs there under the much shorter [`BUSY_HANDSHAKE_TIMEOUT`].

use std::io;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::{ServerConfig, ServerConnection, StreamOwned};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::application::transport::TransportError;

/// Default bound on the server-side TLS handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the handshake of a connection that is only told "busy".
pub const BUSY_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(250);

/// A TLS stream as handed to the protocol.
pub type TlsStream = StreamOwned<ServerConnection, TcpStream>;

/// Server certificate configuration plus the handshake bound.
#[derive(Clone)]
pub struct TlsSettings {
    config: Arc<ServerConfig>,
    handshake_timeout: Duration,
}

impl TlsSettings {
    /// Wraps an existing rustls configuration.
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Builds a configuration from a DER certificate chain and private key,
    /// using the ring provider and its safe default protocol versions.
    ///
    /// # Errors
    ///
    /// [`TransportError::Tls`] if rustls rejects the key or the chain.
    pub fn from_der(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, TransportError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        Ok(Self::new(Arc::new(config)))
    }

    /// Loads a PEM certificate chain and a PEM private key from disk.
    ///
    /// # Errors
    ///
    /// [`TransportError::Tls`] if either file is missing, holds no usable
    /// PEM section, or rustls rejects the pair.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, TransportError> {
        let chain = CertificateDer::pem_file_iter(cert_path)
            .map_err(|e| pem_error(cert_path, e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| pem_error(cert_path, e))?;
        if chain.is_empty() {
            return Err(TransportError::Tls(format!(
                "{}: no certificates found",
                cert_path.display()
            )));
        }
        let key = PrivateKeyDer::from_pem_file(key_path).map_err(|e| pem_error(key_path, e))?;
        Self::from_der(chain, key)
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    /// Runs the server side of the handshake on `stream`.
    ///
    /// The stream's read and write timeouts bound every step; they are
    /// cleared again once the session is established, leaving further
    /// timeouts to the protocol.
    ///
    /// # Errors
    ///
    /// `TimedOut` when the deadline passes, `UnexpectedEof` when the peer
    /// hangs up mid-handshake, or the rustls error wrapped as `InvalidData`.
    pub fn accept(&self, stream: TcpStream) -> io::Result<TlsStream> {
        self.accept_within(stream, self.handshake_timeout)
    }

    /// [`accept`](Self::accept) with an explicit bound instead of
    /// [`handshake_timeout`](Self::handshake_timeout).
    ///
    /// # Errors
    ///
    /// As for `accept`.
    pub fn accept_within(
        &self,
        mut stream: TcpStream,
        timeout: Duration,
    ) -> io::Result<TlsStream> {
        let mut conn = ServerConnection::new(Arc::clone(&self.config))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let deadline = Instant::now() + timeout;

        stream.set_write_timeout(Some(timeout))?;
        while conn.is_handshaking() {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .filter(|d| !d.is_zero())
                .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))?;
            stream.set_read_timeout(Some(remaining))?;

            let (read, written) = conn.complete_io(&mut stream)?;
            if read == 0 && written == 0 && conn.is_handshaking() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed during TLS handshake",
                ));
            }
        }
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;

        Ok(StreamOwned::new(conn, stream))
    }
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

fn pem_error(path: &Path, e: rustls_pki_types::pem::Error) -> TransportError {
    TransportError::Tls(format!("{}: {e}", path.display()))
}

#[cfg(test)]
pub(crate) mod test_certs {
    //! Self-signed `localhost` certificates for TLS tests.

    use super::*;
    use rustls_pki_types::PrivatePkcs8KeyDer;

    pub(crate) struct TestCert {
        pub cert: CertificateDer<'static>,
        pub cert_pem: String,
        pub key_der: Vec<u8>,
        pub key_pem: String,
    }

    pub(crate) fn localhost() -> TestCert {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        TestCert {
            cert: cert.der().clone(),
            cert_pem: cert.pem(),
            key_der: key_pair.serialize_der(),
            key_pem: key_pair.serialize_pem(),
        }
    }

    impl TestCert {
        pub(crate) fn settings(&self) -> TlsSettings {
            TlsSettings::from_der(
                vec![self.cert.clone()],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone())),
            )
            .unwrap()
        }

        /// A client config that trusts only this certificate.
        pub(crate) fn client_config(&self) -> Arc<rustls::ClientConfig> {
            let mut roots = rustls::RootCertStore::empty();
            roots.add(self.cert.clone()).unwrap();
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            Arc::new(
                rustls::ClientConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()
                    .unwrap()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_certs::localhost;
    use super::*;
    use std::fs;
    use std::net::TcpListener;
    use std::thread;

    fn temp_path(suffix: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("netpool-{}-{suffix}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_from_pem_files_loads_chain_and_key() {
        // Arrange
        let cert = localhost();
        let cert_path = temp_path("cert.pem");
        let key_path = temp_path("key.pem");
        fs::write(&cert_path, &cert.cert_pem).unwrap();
        fs::write(&key_path, &cert.key_pem).unwrap();

        // Act
        let result = TlsSettings::from_pem_files(&cert_path, &key_path);

        // Assert
        assert!(result.is_ok());
        assert_eq!(
            result.unwrap().handshake_timeout(),
            DEFAULT_HANDSHAKE_TIMEOUT
        );
        let _ = fs::remove_file(cert_path);
        let _ = fs::remove_file(key_path);
    }

    #[test]
    fn test_from_pem_files_reports_missing_file() {
        let missing = temp_path("missing.pem");

        let err = TlsSettings::from_pem_files(&missing, &missing).unwrap_err();

        assert!(matches!(err, TransportError::Tls(msg) if msg.contains("missing.pem")));
    }

    #[test]
    fn test_accept_times_out_on_silent_client() {
        // Arrange: a client that connects and never speaks.
        let settings = localhost()
            .settings()
            .with_handshake_timeout(Duration::from_millis(100));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });
        let (stream, _) = listener.accept().unwrap();

        // Act
        let started = Instant::now();
        let result = settings.accept(stream);

        // Assert
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_millis(450));
        client.join().unwrap();
    }

    #[test]
    fn test_accept_fails_when_client_hangs_up() {
        let settings = localhost().settings();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(TcpStream::connect(addr).unwrap());
        let (stream, _) = listener.accept().unwrap();

        assert!(settings.accept(stream).is_err());
    }
}
