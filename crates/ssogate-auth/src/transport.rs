//! TLS client connections to the identity provider.
//!
//! A [`TransportClient`] is built once from [`TransportConfig`] and holds the
//! shared rustls client configuration (trust store, protocol versions). Each
//! call to [`TransportClient::connect`] yields a [`Connection`] that owns one
//! socket and one TLS session. Connections are never pooled or shared.
//!
//! Every connect, read and write is bounded by a deadline. A [`Connection`]
//! releases its socket on [`Connection::disconnect`] and, failing that, when
//! it is dropped.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, warn};

use crate::config::TransportConfig;

/// Errors raised by the secure transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The host name is not a valid TLS server name.
    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    /// The trust store could not be assembled.
    #[error("Trust store error: {0}")]
    TrustStore(String),

    /// The TCP connection could not be established.
    #[error("Failed to connect to {peer}: {source}")]
    Connect {
        /// `host:port` of the peer.
        peer: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// The TLS handshake failed, including certificate validation failures.
    #[error("TLS handshake with {peer} failed: {source}")]
    Handshake {
        /// `host:port` of the peer.
        peer: String,
        /// Underlying TLS error.
        #[source]
        source: io::Error,
    },

    /// An operation did not complete before its deadline.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The configured deadline.
        elapsed: Duration,
    },

    /// The peer reset or truncated the connection.
    #[error("Connection closed by peer")]
    Closed,

    /// The connection was already released.
    #[error("Connection is not open")]
    NotConnected,

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl TransportError {
    /// Returns `true` if the peer closed or reset the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::NotConnected)
    }

    /// Returns `true` for transient failures after which a caller could
    /// restart the whole exchange.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe => Self::Closed,
            _ => Self::Io(err),
        }
    }
}

/// Factory for TLS connections sharing one client configuration.
#[derive(Clone)]
pub struct TransportClient {
    tls: Arc<ClientConfig>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

impl TransportClient {
    /// Builds a client trusting the webpki root set plus any extra roots
    /// named in the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TrustStore`] if the extra roots cannot be
    /// read or parsed.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        if let Some(path) = &config.extra_root_certificates {
            let added = add_pem_roots(&mut roots, path)?;
            debug!(path = %path.display(), added, "Loaded extra trusted roots");
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let tls = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::TrustStore(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self::with_tls_config(
            Arc::new(tls),
            config.connect_timeout,
            config.io_timeout,
        ))
    }

    /// Builds a client from an existing rustls configuration.
    #[must_use]
    pub fn with_tls_config(
        tls: Arc<ClientConfig>,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Self {
        Self {
            tls,
            connect_timeout,
            io_timeout,
        }
    }

    /// Opens a TCP connection and performs the TLS handshake.
    ///
    /// The peer certificate is validated against the trust store and the
    /// requested host name. There is no plaintext fallback.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`], [`TransportError::Handshake`] or
    /// [`TransportError::Timeout`].
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Connection<TlsStream<TcpStream>>, TransportError> {
        let peer = format!("{host}:{port}");
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| TransportError::InvalidServerName(host.to_string()))?;

        let tcp = timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "connect",
                elapsed: self.connect_timeout,
            })?
            .map_err(|source| TransportError::Connect {
                peer: peer.clone(),
                source,
            })?;
        tcp.set_nodelay(true).map_err(TransportError::Io)?;

        let connector = TlsConnector::from(Arc::clone(&self.tls));
        let stream = timeout(self.connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "TLS handshake",
                elapsed: self.connect_timeout,
            })?
            .map_err(|source| TransportError::Handshake {
                peer: peer.clone(),
                source,
            })?;

        debug!(peer = %peer, "TLS connection established");
        Ok(Connection::new(stream, peer, self.io_timeout))
    }
}

fn add_pem_roots(roots: &mut RootCertStore, path: &Path) -> Result<usize, TransportError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| TransportError::TrustStore(format!("{}: {e}", path.display())))?;
    let mut added = 0;
    for cert in certs {
        let cert = cert.map_err(|e| TransportError::TrustStore(format!("{}: {e}", path.display())))?;
        roots
            .add(cert)
            .map_err(|e| TransportError::TrustStore(format!("{}: {e}", path.display())))?;
        added += 1;
    }
    if added == 0 {
        return Err(TransportError::TrustStore(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(added)
}

/// One open connection to a peer.
///
/// Generic over the byte stream so the HTTP layer can be exercised over
/// in-memory pipes; production connections are
/// `Connection<TlsStream<TcpStream>>`.
pub struct Connection<S> {
    stream: Option<S>,
    peer: String,
    io_timeout: Duration,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an already established stream.
    #[must_use]
    pub fn new(stream: S, peer: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            peer: peer.into(),
            io_timeout,
        }
    }

    /// Returns `host:port` of the peer.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Returns `true` until the connection is released.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Reads up to `buf.len()` bytes.
    ///
    /// Returns `Ok(0)` on an orderly close. A reset or truncated stream is
    /// [`TransportError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on failure or when the deadline passes.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let deadline = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        timeout(deadline, stream.read(buf))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "read",
                elapsed: deadline,
            })?
            .map_err(TransportError::from_io)
    }

    /// Writes some prefix of `buf`, returning how many bytes were accepted.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on failure or when the deadline passes.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let deadline = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let written = timeout(deadline, stream.write(buf))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "write",
                elapsed: deadline,
            })?
            .map_err(TransportError::from_io)?;
        if written == 0 && !buf.is_empty() {
            return Err(TransportError::Closed);
        }
        Ok(written)
    }

    /// Writes all of `buf`, looping over partial writes, then flushes.
    ///
    /// # Errors
    ///
    /// Returns the first [`TransportError`] encountered.
    pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<(), TransportError> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            buf = &buf[n..];
        }
        let deadline = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        timeout(deadline, stream.flush())
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "flush",
                elapsed: deadline,
            })?
            .map_err(TransportError::from_io)
    }

    /// Shuts the connection down and releases the socket.
    ///
    /// Idempotent. Shutdown errors are logged and otherwise ignored; the
    /// socket is released regardless.
    pub async fn disconnect(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        match timeout(self.io_timeout, stream.shutdown()).await {
            Ok(Ok(())) => debug!(peer = %self.peer, "Connection closed"),
            Ok(Err(e)) => debug!(peer = %self.peer, error = %e, "Error during shutdown"),
            Err(_) => warn!(peer = %self.peer, "Shutdown timed out"),
        }
    }
}
