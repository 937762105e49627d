//! Entry point listener: TCP accept with backpressure, then TLS handshake.
//!
//! # Responsibilities
//! - Bind the entry point's socket once, for the process lifetime
//! - Enforce max_connections limit via semaphore
//! - Run each handshake against the TLS state current at accept time
//! - Classify handshake failures and hand successful streams to the forwarder

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tokio_rustls::server::TlsStream;

use crate::config::EntryPointConfig;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::forward::{self, Upstream};
use crate::observability::metrics::{self, outcome};
use crate::tls::{EntryPointTlsManager, MaterialError, VerificationError};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The configured address is not a socket address.
    #[error("entry point '{entry_point}': invalid address '{address}'")]
    Address { entry_point: String, address: String },

    /// Failed to bind to address.
    #[error("entry point '{entry_point}': failed to bind {address}: {source}")]
    Bind {
        entry_point: String,
        address: String,
        #[source]
        source: io::Error,
    },

    /// The upstream TLS settings are unusable.
    #[error("entry point '{entry_point}': {source}")]
    Upstream {
        entry_point: String,
        #[source]
        source: MaterialError,
    },

    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),

    /// The connection limit semaphore was closed.
    #[error("listener closed")]
    Closed,
}

/// Why a TLS handshake did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// The client certificate was presented but rejected.
    UntrustedClient(VerificationError),
    /// A required client certificate was not presented.
    MissingClientCertificate,
    /// The handshake did not finish within the entry point's timeout.
    Timeout,
    /// Anything else (protocol error, client hung up, ...).
    Other(String),
}

impl HandshakeFailure {
    pub fn from_io(error: &io::Error) -> Self {
        let tls_error = error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>());

        match tls_error {
            Some(e @ (rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented)) => {
                match VerificationError::from_rustls(e) {
                    VerificationError::MissingCertificate => Self::MissingClientCertificate,
                    other => Self::UntrustedClient(other),
                }
            }
            Some(e) => Self::Other(e.to_string()),
            None => Self::Other(error.to_string()),
        }
    }

    /// Metric label for this failure.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::UntrustedClient(_) => outcome::UNTRUSTED_CLIENT,
            Self::MissingClientCertificate => outcome::MISSING_CLIENT_CERT,
            Self::Timeout => outcome::TIMEOUT,
            Self::Other(_) => outcome::ERROR,
        }
    }
}

impl std::fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UntrustedClient(e) => write!(f, "{}", e),
            Self::MissingClientCertificate => write!(f, "client certificate required but not provided"),
            Self::Timeout => write!(f, "handshake timed out"),
            Self::Other(message) => write!(f, "{}", message),
        }
    }
}

/// A bounded TLS listener for one entry point.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections wait until a slot becomes available.
pub struct EntryPointListener {
    name: Arc<str>,
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
    handshake_timeout: Duration,
    upstream: Option<Arc<Upstream>>,
    manager: Arc<EntryPointTlsManager>,
    tracker: ConnectionTracker,
}

impl EntryPointListener {
    /// Bind the entry point's address.
    pub async fn bind(
        config: &EntryPointConfig,
        manager: Arc<EntryPointTlsManager>,
        tracker: ConnectionTracker,
    ) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.address.parse().map_err(|_| ListenerError::Address {
            entry_point: config.name.clone(),
            address: config.address.clone(),
        })?;

        let upstream = match (&config.upstream, &config.upstream_tls) {
            (Some(address), Some(tls)) => {
                let upstream =
                    Upstream::with_tls(address, tls).map_err(|source| ListenerError::Upstream {
                        entry_point: config.name.clone(),
                        source,
                    })?;
                Some(upstream)
            }
            (Some(address), None) => Some(Upstream::plain(address)),
            (None, _) => None,
        };

        let bind_error = |source| ListenerError::Bind {
            entry_point: config.name.clone(),
            address: config.address.clone(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        tracing::info!(
            entry_point = %config.name,
            address = %local_addr,
            max_connections = config.max_connections,
            upstream = config.upstream.as_deref().unwrap_or("-"),
            upstream_tls = upstream.as_ref().is_some_and(Upstream::is_tls),
            "Entry point bound"
        );

        Ok(Self {
            name: Arc::from(config.name.as_str()),
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            upstream: upstream.map(Arc::new),
            manager,
            tracker,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            entry_point = %self.name,
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Accept connections until shutdown is signalled.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(entry_point = %self.name, "Entry point stopped accepting");
                    break;
                }
                accepted = self.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => {
                        let guard = self.tracker.track(self.name.clone());
                        let session = Session {
                            manager: self.manager.clone(),
                            upstream: self.upstream.clone(),
                            handshake_timeout: self.handshake_timeout,
                            peer_addr,
                        };
                        tokio::spawn(async move {
                            session.serve(stream, guard).await;
                            drop(permit);
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(entry_point = %self.name, error = %e, "Transient accept error");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }
    }
}

/// Everything one connection task needs.
struct Session {
    manager: Arc<EntryPointTlsManager>,
    upstream: Option<Arc<Upstream>>,
    handshake_timeout: Duration,
    peer_addr: SocketAddr,
}

impl Session {
    async fn serve(self, stream: TcpStream, guard: ConnectionGuard) {
        let entry_point = guard.entry_point();
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(connection_id = %guard.id(), error = %e, "Failed to set TCP_NODELAY");
        }

        // One state per handshake: certificate and client policy come from the same generation.
        let state = self.manager.current();
        let generation = state.generation();
        let handshake = state.acceptor().accept(stream);

        let mut tls = match tokio::time::timeout(self.handshake_timeout, handshake).await {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => {
                let failure = HandshakeFailure::from_io(&e);
                self.log_failure(&guard, generation, &failure);
                return;
            }
            Err(_) => {
                self.log_failure(&guard, generation, &HandshakeFailure::Timeout);
                return;
            }
        };

        metrics::record_handshake(entry_point, outcome::SUCCESS);
        log_established(&tls, &guard, self.peer_addr, generation);

        match self.upstream.as_deref() {
            Some(upstream) => match forward::forward(&mut tls, upstream).await {
                Ok(transfer) => tracing::debug!(
                    connection_id = %guard.id(),
                    entry_point = %entry_point,
                    upstream = %upstream.address(),
                    sent = transfer.client_to_upstream,
                    received = transfer.upstream_to_client,
                    "Connection finished"
                ),
                Err(e) => tracing::warn!(
                    connection_id = %guard.id(),
                    entry_point = %entry_point,
                    upstream = %upstream.address(),
                    error = %e,
                    "Forwarding failed"
                ),
            },
            None => {
                if let Err(e) = forward::close(&mut tls).await {
                    tracing::debug!(connection_id = %guard.id(), error = %e, "Close after handshake failed");
                }
            }
        }
    }

    fn log_failure(&self, guard: &ConnectionGuard, generation: u64, failure: &HandshakeFailure) {
        metrics::record_handshake(guard.entry_point(), failure.outcome());
        match failure {
            HandshakeFailure::UntrustedClient(_) | HandshakeFailure::MissingClientCertificate => {
                tracing::warn!(
                    connection_id = %guard.id(),
                    entry_point = %guard.entry_point(),
                    peer_addr = %self.peer_addr,
                    generation,
                    reason = %failure,
                    "Client certificate rejected"
                );
            }
            HandshakeFailure::Timeout | HandshakeFailure::Other(_) => {
                tracing::debug!(
                    connection_id = %guard.id(),
                    entry_point = %guard.entry_point(),
                    peer_addr = %self.peer_addr,
                    generation,
                    reason = %failure,
                    "TLS handshake failed"
                );
            }
        }
    }
}

fn log_established(
    tls: &TlsStream<TcpStream>,
    guard: &ConnectionGuard,
    peer_addr: SocketAddr,
    generation: u64,
) {
    let (_, connection) = tls.get_ref();
    let alpn = connection
        .alpn_protocol()
        .map(|p| String::from_utf8_lossy(p).into_owned());
    let client_certificate = connection
        .peer_certificates()
        .is_some_and(|chain| !chain.is_empty());

    tracing::debug!(
        connection_id = %guard.id(),
        entry_point = %guard.entry_point(),
        peer_addr = %peer_addr,
        sni = connection.server_name().unwrap_or("-"),
        alpn = alpn.as_deref().unwrap_or("-"),
        client_certificate,
        generation,
        "TLS handshake completed"
    );
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_wrap(error: rustls::Error) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, error)
    }

    #[test]
    fn classifies_untrusted_issuer() {
        let e = io_wrap(rustls::Error::InvalidCertificate(
            rustls::CertificateError::UnknownIssuer,
        ));
        let failure = HandshakeFailure::from_io(&e);
        assert_eq!(
            failure,
            HandshakeFailure::UntrustedClient(VerificationError::UntrustedIssuer)
        );
        assert_eq!(failure.to_string(), "untrusted issuer");
        assert_eq!(failure.outcome(), outcome::UNTRUSTED_CLIENT);
    }

    #[test]
    fn classifies_missing_certificate() {
        let e = io_wrap(rustls::Error::NoCertificatesPresented);
        assert_eq!(
            HandshakeFailure::from_io(&e),
            HandshakeFailure::MissingClientCertificate
        );
    }

    #[test]
    fn classifies_plain_io_errors_as_other() {
        let e = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(HandshakeFailure::from_io(&e), HandshakeFailure::Other(_)));
    }
}
