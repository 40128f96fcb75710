//! Mutual TLS (mTLS) listener plumbing and peer identity extraction.
//!
//! # Architecture
//!
//! ```text
//! TCP connection
//!   → TLS handshake  (rustls; client cert verified against CA, or any
//!                     presented cert accepted when no CA is configured)
//!   → peer certificate chain copied into request extensions (PeerCertChain)
//!   → PeerIdentity::from_chain scans SAN URIs for the first spiffe:// entry
//!   → pipeline resolves identity → workspace and rewrites the request
//! ```
//!
//! # Modules
//!
//! - [`identity`] — SPIFFE identity extraction from the peer chain
//! - [`verifier`] — accept-any client certificate verifier
//! - [`cert_manager`] — rustls config building, PEM loading, and cert
//!   generation helpers for the `svid-proxy tls` CLI commands

pub mod cert_manager;
pub mod identity;
pub mod verifier;

pub use cert_manager::{
    CaParams, CertGenerator, GeneratedCert, LeafCertParams, build_server_config, load_certs,
    load_private_key,
};
pub use identity::{PeerCertChain, PeerIdentity};
pub use verifier::AnyClientCertVerifier;
