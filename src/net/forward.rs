//! Pass-through of decrypted traffic to an entry point's upstream.
//!
//! The upstream is reached over plain TCP, or over TLS when root CAs are
//! configured for it.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::schema::UpstreamTlsConfig;
use crate::tls::material::parse_ca_pool;
use crate::tls::{crypto_provider, MaterialError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bytes moved in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Where decrypted traffic goes, and how.
#[derive(Clone)]
pub struct Upstream {
    address: Arc<str>,
    tls: Option<UpstreamTls>,
}

#[derive(Clone)]
struct UpstreamTls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("address", &self.address)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl Upstream {
    /// Plain TCP upstream.
    pub fn plain(address: &str) -> Self {
        Self {
            address: Arc::from(address),
            tls: None,
        }
    }

    /// TLS upstream whose certificate must chain to one of `config.root_cas`.
    pub fn with_tls(address: &str, config: &UpstreamTlsConfig) -> Result<Self, MaterialError> {
        let roots = parse_ca_pool(&config.root_cas)?;
        if roots.is_empty() {
            return Err(MaterialError::UpstreamTls {
                message: format!(
                    "{} root CA source(s) hold no certificate",
                    config.root_cas.len()
                ),
            });
        }

        let name = match &config.server_name {
            Some(name) => name.clone(),
            None => host_of(address).to_string(),
        };
        let server_name =
            ServerName::try_from(name.clone()).map_err(|e| MaterialError::UpstreamTls {
                message: format!("invalid server name '{name}': {e}"),
            })?;

        let client_config = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| MaterialError::UpstreamTls {
                message: e.to_string(),
            })?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            address: Arc::from(address),
            tls: Some(UpstreamTls {
                connector: TlsConnector::from(Arc::new(client_config)),
                server_name,
            }),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }
}

/// Host part of `host:port`, without IPv6 brackets.
fn host_of(address: &str) -> &str {
    let host = address
        .rsplit_once(':')
        .map_or(address, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Connect to `upstream` and copy bytes both ways until either side closes.
pub async fn forward<S>(client: &mut S, upstream: &Upstream) -> io::Result<Transfer>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let backend = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&*upstream.address))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "upstream connect timed out"))??;
    backend.set_nodelay(true)?;

    let (client_to_upstream, upstream_to_client) = match &upstream.tls {
        None => {
            let mut backend = backend;
            tokio::io::copy_bidirectional(client, &mut backend).await?
        }
        Some(tls) => {
            let handshake = tls.connector.connect(tls.server_name.clone(), backend);
            let mut backend = tokio::time::timeout(CONNECT_TIMEOUT, handshake)
                .await
                .map_err(|_| {
                    io::Error::new(io::ErrorKind::TimedOut, "upstream TLS handshake timed out")
                })??;
            tokio::io::copy_bidirectional(client, &mut backend).await?
        }
    };

    Ok(Transfer {
        client_to_upstream,
        upstream_to_client,
    })
}

/// Close a connection that has nowhere to go (no upstream configured).
pub async fn close<S>(client: &mut S) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    client.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::testing::TestCa;
    use crate::tls::FileOrContent;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer};
    use rustls::ServerConfig;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    /// TLS server that answers one 4-byte message with "pong".
    async fn start_tls_upstream(ca: &TestCa, name: &str) -> String {
        let (cert, key) = ca.issue_server(&[name]);
        let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();
        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key.as_bytes())
            .unwrap()
            .unwrap();
        let config = ServerConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let Ok(mut tls) = acceptor.accept(socket).await else {
                return;
            };
            let mut buf = [0u8; 4];
            if tls.read_exact(&mut buf).await.is_ok() {
                let _ = tls.write_all(b"pong").await;
                // Hold the session until the gateway closes its side.
                let mut rest = Vec::new();
                let _ = tls.read_to_end(&mut rest).await;
                let _ = tls.shutdown().await;
            }
        });
        addr
    }

    async fn ping(upstream: Upstream) -> io::Result<Transfer> {
        let (mut client, mut proxied) = tokio::io::duplex(64);
        let task = tokio::spawn(async move { forward(&mut proxied, &upstream).await });

        client.write_all(b"ping").await?;
        let mut reply = [0u8; 4];
        let read = client.read_exact(&mut reply).await;
        drop(client);
        let transfer = task.await.unwrap()?;
        read?;
        assert_eq!(&reply, b"pong");
        Ok(transfer)
    }

    #[tokio::test]
    async fn copies_both_directions() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = upstream.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"pong").await.unwrap();
            let mut rest = Vec::new();
            socket.read_to_end(&mut rest).await.unwrap();
        });

        let transfer = ping(Upstream::plain(&upstream_addr)).await.unwrap();
        assert_eq!(transfer.client_to_upstream, 4);
        assert_eq!(transfer.upstream_to_client, 4);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (_client, mut proxied) = tokio::io::duplex(64);
        assert!(forward(&mut proxied, &Upstream::plain(&addr)).await.is_err());
    }

    #[tokio::test]
    async fn tls_upstream_trusted_via_inline_root() {
        let ca = TestCa::new("backend-ca");
        let addr = start_tls_upstream(&ca, "backend.internal").await;
        let config = UpstreamTlsConfig {
            root_cas: vec![ca.pem().into()],
            server_name: Some("backend.internal".to_string()),
        };

        let upstream = Upstream::with_tls(&addr, &config).unwrap();
        assert!(upstream.is_tls());
        let transfer = ping(upstream).await.unwrap();
        assert_eq!(transfer.upstream_to_client, 4);
    }

    #[tokio::test]
    async fn tls_upstream_trusted_via_root_file() {
        let ca = TestCa::new("backend-ca");
        let addr = start_tls_upstream(&ca, "backend.internal").await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, ca.pem().as_bytes()).unwrap();
        let config = UpstreamTlsConfig {
            root_cas: vec![FileOrContent::new(file.path().to_string_lossy())],
            server_name: Some("backend.internal".to_string()),
        };

        ping(Upstream::with_tls(&addr, &config).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn tls_upstream_with_foreign_root_is_refused() {
        let ca = TestCa::new("backend-ca");
        let other = TestCa::new("other-ca");
        let addr = start_tls_upstream(&ca, "backend.internal").await;
        let config = UpstreamTlsConfig {
            root_cas: vec![other.pem().into()],
            server_name: Some("backend.internal".to_string()),
        };

        let (_client, mut proxied) = tokio::io::duplex(64);
        let upstream = Upstream::with_tls(&addr, &config).unwrap();
        assert!(forward(&mut proxied, &upstream).await.is_err());
    }

    #[test]
    fn tls_upstream_needs_a_root() {
        let err = Upstream::with_tls("backend:443", &UpstreamTlsConfig::default()).unwrap_err();
        assert!(matches!(err, MaterialError::UpstreamTls { .. }));
    }

    #[test]
    fn server_name_defaults_to_upstream_host() {
        assert_eq!(host_of("backend.internal:443"), "backend.internal");
        assert_eq!(host_of("[::1]:443"), "::1");
        assert_eq!(host_of("127.0.0.1:8443"), "127.0.0.1");
    }
}
