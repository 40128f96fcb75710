//! Accept-any client certificate verifier.
//!
//! When no CA is configured, the TLS layer accepts whatever certificate the
//! client presents; authorization is enforced entirely by the identity →
//! workspace binding lookup. The verifier still validates handshake
//! signatures so a client must actually hold the private key for the
//! certificate it presents.

use std::fmt;
use std::sync::Arc;

use rustls::DistinguishedName;
use rustls::SignatureScheme;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use tracing::debug;

/// Client certificate verifier that accepts any presented certificate.
///
/// Signature verification is delegated to the process crypto provider, so
/// the handshake still proves possession of the certificate's key. Chain
/// validation against a CA is intentionally skipped.
pub struct AnyClientCertVerifier {
    provider: Arc<CryptoProvider>,
    mandatory: bool,
}

impl AnyClientCertVerifier {
    /// Create a verifier.
    ///
    /// `mandatory` controls whether a client must present a certificate at
    /// all; when `false`, certificate-less handshakes complete and the
    /// request later fails identity extraction.
    #[must_use]
    pub fn new(mandatory: bool) -> Self {
        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));
        Self {
            provider,
            mandatory,
        }
    }
}

impl fmt::Debug for AnyClientCertVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyClientCertVerifier")
            .field("mandatory", &self.mandatory)
            .finish_non_exhaustive()
    }
}

impl ClientCertVerifier for AnyClientCertVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        // No CA hints — any issuer is acceptable
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        // Chain validation skipped; authorization happens at the binding
        // lookup stage.
        debug!("Accepting client certificate without CA validation");
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mandatory_flag_is_honored() {
        assert!(AnyClientCertVerifier::new(true).client_auth_mandatory());
        assert!(!AnyClientCertVerifier::new(false).client_auth_mandatory());
    }

    #[test]
    fn no_root_hints_are_advertised() {
        let verifier = AnyClientCertVerifier::new(true);
        assert!(verifier.root_hint_subjects().is_empty());
    }

    #[test]
    fn supported_schemes_are_nonempty() {
        let verifier = AnyClientCertVerifier::new(true);
        assert!(!verifier.supported_verify_schemes().is_empty());
    }
}
