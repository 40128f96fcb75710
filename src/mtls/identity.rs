//! SPIFFE identity extraction from the peer certificate chain.
//!
//! The TLS layer attaches the raw DER chain to each request as a
//! [`PeerCertChain`] extension. [`PeerIdentity::from_chain`] is a pure
//! function over that state: it scans certificates in chain order and, within
//! each certificate, SAN-URI entries in list order, returning the first URI
//! with the `spiffe://` scheme. Non-URI SAN fields are never consulted.

use rustls::pki_types::CertificateDer;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

/// URI scheme prefix identifying a SPIFFE workload identity.
pub const SPIFFE_SCHEME: &str = "spiffe://";

// ─────────────────────────────────────────────────────────────────────────────
// Peer certificate chain
// ─────────────────────────────────────────────────────────────────────────────

/// Peer certificate chain captured at the TLS handshake.
///
/// Stored as a request extension so the pipeline can extract the identity
/// without reaching back into connection state. An empty chain (or an absent
/// extension on insecure listeners) yields no identity.
#[derive(Clone, Debug, Default)]
pub struct PeerCertChain(Vec<Vec<u8>>);

impl PeerCertChain {
    /// Build from the DER certificates rustls exposes after the handshake.
    #[must_use]
    pub fn from_der_chain(certs: &[CertificateDer<'_>]) -> Self {
        Self(certs.iter().map(|c| c.as_ref().to_vec()).collect())
    }

    /// Number of certificates presented.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the client presented any certificates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the raw DER certificates in chain order.
    pub fn iter_der(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(Vec::as_slice)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Peer identity
// ─────────────────────────────────────────────────────────────────────────────

/// A SPIFFE identity URI extracted from a peer certificate chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    /// Extract the first SPIFFE URI from the chain.
    ///
    /// Returns `None` when the chain is empty, no certificate parses, or no
    /// certificate carries a `spiffe://` URI SAN. Certificates that fail to
    /// parse are skipped rather than failing the whole scan; the TLS layer
    /// has already validated the chain it accepted.
    #[must_use]
    pub fn from_chain(chain: &PeerCertChain) -> Option<Self> {
        for (index, der) in chain.iter_der().enumerate() {
            let Ok((_, cert)) = X509Certificate::from_der(der) else {
                tracing::debug!(cert_index = index, "Skipping unparseable peer certificate");
                continue;
            };

            for uri in san_uris(&cert) {
                if uri.starts_with(SPIFFE_SCHEME) {
                    tracing::debug!(cert_index = index, identity = %uri, "SPIFFE identity extracted");
                    return Some(Self(uri));
                }
            }
        }

        tracing::debug!(
            chain_len = chain.len(),
            "No SPIFFE identity in peer chain"
        );
        None
    }

    /// Parse an identity from a string, requiring the `spiffe://` scheme.
    ///
    /// No structural validation beyond the scheme is performed.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        value
            .starts_with(SPIFFE_SCHEME)
            .then(|| Self(value.to_string()))
    }

    /// The identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// SAN URI entries of a certificate, in extension order.
fn san_uris<'a>(cert: &'a X509Certificate<'a>) -> Vec<String> {
    let mut uris = Vec::new();
    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            if let GeneralName::URI(uri) = name {
                uris.push((*uri).to_owned());
            }
        }
    }
    uris
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, Ia5String, KeyPair, SanType};

    // ── helpers ──────────────────────────────────────────────────────────────

    /// Generate a self-signed DER cert with the given CN and SANs.
    fn make_cert_der(cn: &str, sans: &[SanType]) -> Vec<u8> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        params.subject_alt_names = sans.to_vec();

        let key_pair = KeyPair::generate().expect("key generation failed");
        let cert = params
            .self_signed(&key_pair)
            .expect("rcgen cert generation failed");
        cert.der().to_vec()
    }

    fn dns_san(s: &str) -> SanType {
        SanType::DnsName(Ia5String::try_from(s).unwrap())
    }

    fn uri_san(s: &str) -> SanType {
        SanType::URI(Ia5String::try_from(s).unwrap())
    }

    fn chain_of(ders: Vec<Vec<u8>>) -> PeerCertChain {
        let certs: Vec<CertificateDer<'static>> =
            ders.into_iter().map(CertificateDer::from).collect();
        PeerCertChain::from_der_chain(&certs)
    }

    // ── extraction ───────────────────────────────────────────────────────────

    #[test]
    fn extracts_spiffe_uri_from_single_cert() {
        // GIVEN: one cert carrying a SPIFFE URI SAN
        let der = make_cert_der("agent", &[uri_san("spiffe://trust.domain/workload/a")]);
        // WHEN: scanning the chain
        let identity = PeerIdentity::from_chain(&chain_of(vec![der]));
        // THEN: that URI is the identity
        assert_eq!(
            identity.unwrap().as_str(),
            "spiffe://trust.domain/workload/a"
        );
    }

    #[test]
    fn empty_chain_yields_no_identity() {
        assert!(PeerIdentity::from_chain(&PeerCertChain::default()).is_none());
    }

    #[test]
    fn chain_without_spiffe_uri_yields_no_identity() {
        // GIVEN: certs with only DNS SANs and a non-SPIFFE URI
        let a = make_cert_der("a", &[dns_san("a.internal")]);
        let b = make_cert_der("b", &[uri_san("https://not-spiffe.example")]);
        assert!(PeerIdentity::from_chain(&chain_of(vec![a, b])).is_none());
    }

    #[test]
    fn dns_sans_are_never_treated_as_identity() {
        // A DNS SAN that happens to contain the scheme as text is not a URI SAN
        let der = make_cert_der("a", &[dns_san("spiffe.example.internal")]);
        assert!(PeerIdentity::from_chain(&chain_of(vec![der])).is_none());
    }

    #[test]
    fn first_cert_in_chain_order_wins() {
        // GIVEN: leaf and intermediate both carrying SPIFFE URIs
        let leaf = make_cert_der("leaf", &[uri_san("spiffe://td/leaf")]);
        let intermediate = make_cert_der("mid", &[uri_san("spiffe://td/mid")]);
        // WHEN: scanning in chain order
        let identity = PeerIdentity::from_chain(&chain_of(vec![leaf, intermediate]));
        // THEN: the leaf identity wins
        assert_eq!(identity.unwrap().as_str(), "spiffe://td/leaf");
    }

    #[test]
    fn first_uri_in_san_order_wins_within_a_cert() {
        let der = make_cert_der(
            "multi",
            &[
                uri_san("https://ignored.example"),
                uri_san("spiffe://td/first"),
                uri_san("spiffe://td/second"),
            ],
        );
        let identity = PeerIdentity::from_chain(&chain_of(vec![der]));
        assert_eq!(identity.unwrap().as_str(), "spiffe://td/first");
    }

    #[test]
    fn later_cert_supplies_identity_when_leaf_has_none() {
        let leaf = make_cert_der("leaf", &[dns_san("leaf.internal")]);
        let intermediate = make_cert_der("mid", &[uri_san("spiffe://td/mid")]);
        let identity = PeerIdentity::from_chain(&chain_of(vec![leaf, intermediate]));
        assert_eq!(identity.unwrap().as_str(), "spiffe://td/mid");
    }

    #[test]
    fn unparseable_certs_are_skipped_not_fatal() {
        // GIVEN: garbage bytes ahead of a valid cert
        let garbage = b"not a certificate".to_vec();
        let valid = make_cert_der("agent", &[uri_san("spiffe://td/w")]);
        let identity = PeerIdentity::from_chain(&chain_of(vec![garbage, valid]));
        assert_eq!(identity.unwrap().as_str(), "spiffe://td/w");
    }

    #[test]
    fn parse_requires_spiffe_scheme() {
        assert!(PeerIdentity::parse("spiffe://td/w").is_some());
        assert!(PeerIdentity::parse("https://td/w").is_none());
        assert!(PeerIdentity::parse("").is_none());
    }

    #[test]
    fn peer_cert_chain_reports_length() {
        let der = make_cert_der("a", &[dns_san("a.internal")]);
        let chain = chain_of(vec![der]);
        assert_eq!(chain.len(), 1);
        assert!(!chain.is_empty());
    }
}
