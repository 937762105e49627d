//! TLS subsystem error types.

use thiserror::Error;

/// Certificate, key, or CA material could not be turned into usable TLS state.
#[derive(Debug, Error)]
pub enum MaterialError {
    /// A file-backed source could not be read.
    #[error("failed to read '{source_name}': {source}")]
    Read {
        /// Path of the unreadable source.
        source_name: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// PEM decoding failed.
    #[error("invalid PEM in {source_name}: {message}")]
    Pem {
        /// Display name of the source (path or "inline content").
        source_name: String,
        /// Error message.
        message: String,
    },

    /// The certificate source decoded but held no certificate.
    #[error("no certificate found in {source_name}")]
    NoCertificate {
        /// Display name of the source.
        source_name: String,
    },

    /// The key source decoded but held no private key.
    #[error("no private key found in {source_name}")]
    NoPrivateKey {
        /// Display name of the source.
        source_name: String,
    },

    /// The private key is of a type the crypto provider cannot sign with.
    #[error("unsupported private key in {source_name}: {message}")]
    UnsupportedKey {
        /// Display name of the source.
        source_name: String,
        /// Error message.
        message: String,
    },

    /// The leaf certificate could not be parsed as X.509.
    #[error("malformed certificate in {source_name}: {message}")]
    Malformed {
        /// Display name of the source.
        source_name: String,
        /// Error message.
        message: String,
    },

    /// Certificate and private key do not belong together.
    #[error("private key does not match certificate from {source_name}")]
    KeyMismatch {
        /// Display name of the certificate source.
        source_name: String,
    },

    /// rustls could not build a client verifier from the trust pool.
    #[error("invalid client CA pool: {message}")]
    TrustPool {
        /// Error message.
        message: String,
    },

    /// Client certificates are required but no CA source yielded a certificate.
    #[error("client certificates are required but {sources} CA source(s) hold no certificate")]
    NoClientCa {
        /// Number of CA sources that were read.
        sources: usize,
    },

    /// The upstream TLS client could not be set up.
    #[error("invalid upstream TLS settings: {message}")]
    UpstreamTls {
        /// Error message.
        message: String,
    },

    /// The self-signed fallback certificate could not be generated.
    #[error("failed to generate fallback certificate: {0}")]
    Fallback(String),
}

/// A peer certificate chain was not accepted by a client-auth policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// No configured CA issued the chain.
    #[error("untrusted issuer")]
    UntrustedIssuer,

    /// The policy requires a client certificate and none was presented.
    #[error("client certificate required but not provided")]
    MissingCertificate,

    /// The chain was rejected for another reason (expired, malformed, ...).
    #[error("client certificate rejected: {reason}")]
    Rejected {
        /// Reason reported by the verifier.
        reason: String,
    },
}

impl VerificationError {
    /// Classify a rustls error raised while verifying a client chain.
    pub fn from_rustls(error: &rustls::Error) -> Self {
        use rustls::CertificateError;

        match error {
            rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer) => {
                Self::UntrustedIssuer
            }
            rustls::Error::NoCertificatesPresented => Self::MissingCertificate,
            rustls::Error::InvalidCertificate(other) => Self::Rejected {
                reason: format!("{other:?}"),
            },
            other => Self::Rejected {
                reason: other.to_string(),
            },
        }
    }
}

/// A manager could not assemble a handshake configuration from a store and policy.
#[derive(Debug, Error)]
pub enum ReconfigureError {
    /// rustls refused the protocol or verifier setup.
    #[error("failed to build TLS server config for entry point '{entry_point}': {message}")]
    ServerConfig {
        /// The entry point being reconfigured.
        entry_point: String,
        /// Error message.
        message: String,
    },
}

/// Applying a snapshot to one entry point failed; that entry point kept its state.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Certificate or CA material for the entry point was unusable.
    #[error("entry point '{entry_point}': {source}")]
    Material {
        /// The entry point whose update was discarded.
        entry_point: String,
        /// The material failure.
        #[source]
        source: MaterialError,
    },

    /// The entry point manager rejected the rebuilt state.
    #[error(transparent)]
    Reconfigure(#[from] ReconfigureError),

    /// The reconciler was asked to manage an entry point it does not know.
    #[error("unknown entry point '{0}'")]
    UnknownEntryPoint(String),
}

impl ReconcileError {
    /// Name of the entry point the error belongs to.
    pub fn entry_point(&self) -> &str {
        match self {
            Self::Material { entry_point, .. } => entry_point,
            Self::Reconfigure(ReconfigureError::ServerConfig { entry_point, .. }) => entry_point,
            Self::UnknownEntryPoint(name) => name,
        }
    }
}
