//! Client certificate (mTLS) policy for one entry point.
//!
//! # Responsibilities
//! - Union every configured CA source into one trust pool
//! - Decide whether a client certificate is requested, optional, or required
//! - Verify a presented chain against the pool
//!
//! # Design Decisions
//! - Trust in any one CA is sufficient (staged CA rollover)
//! - The verifier used by `verify` is the one installed in the handshake

use std::fmt;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::ClientCertVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use serde::Serialize;

use super::crypto_provider;
use super::error::{MaterialError, VerificationError};
use super::material::{parse_ca_pool, FileOrContent};

/// How an entry point treats client certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMode {
    /// No client certificate is requested.
    None,
    /// Requested and verified when presented; anonymous clients are allowed.
    Optional,
    /// Requested, verified, and mandatory.
    Required,
}

impl fmt::Display for ClientAuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientAuthMode::None => write!(f, "none"),
            ClientAuthMode::Optional => write!(f, "optional"),
            ClientAuthMode::Required => write!(f, "required"),
        }
    }
}

/// Immutable trust pool + enforcement mode.
pub struct ClientAuthPolicy {
    mode: ClientAuthMode,
    roots: Arc<RootCertStore>,
    verifier: Arc<dyn ClientCertVerifier>,
    /// Number of CA sources the pool was built from.
    sources: usize,
}

impl fmt::Debug for ClientAuthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAuthPolicy")
            .field("mode", &self.mode)
            .field("trust_anchors", &self.roots.len())
            .field("sources", &self.sources)
            .finish()
    }
}

impl ClientAuthPolicy {
    /// Policy that never asks for a client certificate.
    pub fn none() -> Self {
        Self {
            mode: ClientAuthMode::None,
            roots: Arc::new(RootCertStore::empty()),
            verifier: WebPkiClientVerifier::no_client_auth(),
            sources: 0,
        }
    }

    /// Build a policy from CA sources.
    ///
    /// Any CA switches the entry point to `Optional`, or `Required` when asked.
    /// Without any CA an optional policy falls back to `None`; a required one
    /// is an error so the caller keeps its previous state.
    pub fn build(sources: &[FileOrContent], required: bool) -> Result<Self, MaterialError> {
        let roots = parse_ca_pool(sources)?;
        if roots.is_empty() {
            if required {
                return Err(MaterialError::NoClientCa {
                    sources: sources.len(),
                });
            }
            if !sources.is_empty() {
                tracing::warn!(
                    sources = sources.len(),
                    "Client CA sources contain no certificates, client auth disabled"
                );
            }
            return Ok(Self::none());
        }

        let roots = Arc::new(roots);
        let builder = WebPkiClientVerifier::builder_with_provider(roots.clone(), crypto_provider());
        let builder = if required {
            builder
        } else {
            builder.allow_unauthenticated()
        };
        let verifier = builder.build().map_err(|e| MaterialError::TrustPool {
            message: e.to_string(),
        })?;

        let mode = if required {
            ClientAuthMode::Required
        } else {
            ClientAuthMode::Optional
        };
        tracing::debug!(
            mode = %mode,
            trust_anchors = roots.len(),
            sources = sources.len(),
            "Client auth policy built"
        );

        Ok(Self {
            mode,
            roots,
            verifier,
            sources: sources.len(),
        })
    }

    pub fn mode(&self) -> ClientAuthMode {
        self.mode
    }

    /// Number of trusted CA certificates in the merged pool.
    pub fn trust_anchor_count(&self) -> usize {
        self.roots.len()
    }

    pub fn source_count(&self) -> usize {
        self.sources
    }

    /// Verifier to install into the rustls server config.
    pub fn verifier(&self) -> Arc<dyn ClientCertVerifier> {
        self.verifier.clone()
    }

    /// Check a peer chain (leaf first) against the trust pool.
    pub fn verify(&self, chain: &[CertificateDer<'_>]) -> Result<(), VerificationError> {
        let Some((end_entity, intermediates)) = chain.split_first() else {
            return match self.mode {
                ClientAuthMode::Required => Err(VerificationError::MissingCertificate),
                ClientAuthMode::Optional | ClientAuthMode::None => Ok(()),
            };
        };

        if self.mode == ClientAuthMode::None {
            return Err(VerificationError::UntrustedIssuer);
        }

        self.verifier
            .verify_client_cert(end_entity, intermediates, UnixTime::now())
            .map(|_| ())
            .map_err(|e| VerificationError::from_rustls(&e))
    }
}
