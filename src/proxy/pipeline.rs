//! Per-request orchestration.
//!
//! The pipeline walks each request through
//! `Received → IdentityExtracted → WorkspaceResolved → Transformed →
//! Dispatched`, terminating in exactly one of those states or one of the
//! failure exits (`Unauthenticated`, `Unauthorized`, `LookupFailed`,
//! `GatewayFailed`). Failure exits emit a response and stop — `?`
//! propagation makes a fall-through to dispatch after a reported error
//! impossible by construction.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use tracing::{debug, error, warn};

use crate::bindings::{BindingStore, Workspace};
use crate::mtls::{PeerCertChain, PeerIdentity};
use crate::proxy::dispatch::Dispatcher;
use crate::proxy::rewrite::{self, RoutingRule, UpstreamCredential};
use crate::{Error, Result};

/// Request pipeline shared across all connections.
///
/// Holds the immutable routing configuration, the injected binding store,
/// and the upstream dispatcher. No per-request state lives here, so
/// concurrent requests resolve independently.
pub struct Pipeline {
    store: Arc<dyn BindingStore>,
    rule: RoutingRule,
    credential: UpstreamCredential,
    dispatcher: Dispatcher,
}

impl Pipeline {
    /// Assemble a pipeline.
    #[must_use]
    pub fn new(
        store: Arc<dyn BindingStore>,
        rule: RoutingRule,
        credential: UpstreamCredential,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            store,
            rule,
            credential,
            dispatcher,
        }
    }

    /// Handle one inbound request end to end, mapping every failure exit to
    /// its response category.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        match self.run(request).await {
            Ok(response) => response,
            Err(e) => failure_response(&e),
        }
    }

    /// The state machine proper. Every early return is a terminal failure
    /// exit; only a fully validated, transformed request reaches dispatch.
    async fn run(&self, mut request: Request<Body>) -> Result<Response<Body>> {
        // Received → IdentityExtracted
        let chain = request
            .extensions()
            .get::<PeerCertChain>()
            .cloned()
            .unwrap_or_default();
        let identity = PeerIdentity::from_chain(&chain).ok_or(Error::NoIdentity)?;

        // IdentityExtracted → WorkspaceResolved
        let workspace = self.resolve_workspace(&identity).await?;

        debug!(
            identity = %identity,
            workspace = %workspace,
            path = %request.uri().path(),
            "Request authorized"
        );

        // WorkspaceResolved → Transformed
        rewrite::transform(&mut request, &self.rule, &self.credential, &workspace)?;

        // Transformed → Dispatched
        self.dispatcher.forward(request).await
    }

    /// Resolve the workspace, logging not-found and store failure
    /// distinctly: the former is routine, the latter operational.
    async fn resolve_workspace(&self, identity: &PeerIdentity) -> Result<Workspace> {
        match self.store.resolve(identity).await {
            Ok(Some(workspace)) => Ok(workspace),
            Ok(None) => {
                warn!(identity = %identity, "No workspace bound to identity");
                Err(Error::UnknownWorkspace(identity.to_string()))
            }
            Err(e) => {
                error!(identity = %identity, error = %e, "Binding store lookup failed");
                Err(e)
            }
        }
    }
}

/// Map a failure exit to its client-facing response.
///
/// Store failures deliberately share the `UnknownWorkspace` response so
/// internal state is not leaked to clients; operators distinguish them via
/// the logs above.
fn failure_response(error: &Error) -> Response<Body> {
    let (status, message) = match error {
        Error::NoIdentity => (StatusCode::UNAUTHORIZED, "not authorized"),
        Error::UnknownWorkspace(_) | Error::LookupUnavailable(_) => {
            (StatusCode::FORBIDDEN, "not authorized")
        }
        Error::InvalidHostOverride => (StatusCode::BAD_REQUEST, "invalid host override"),
        Error::UpstreamUnavailable(_) => {
            error!(error = %error, "Upstream dispatch failed");
            (StatusCode::BAD_GATEWAY, "upstream unavailable")
        }
        _ => {
            error!(error = %error, "Request pipeline failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    };

    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::bindings::MemoryBindingStore;
    use crate::config::UpstreamConfig;

    /// Binding store that counts lookups, for asserting the short-circuit
    /// before the resolver stage.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryBindingStore,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl BindingStore for CountingStore {
        async fn resolve(&self, identity: &PeerIdentity) -> Result<Option<Workspace>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve(identity).await
        }
    }

    fn upstream() -> UpstreamConfig {
        UpstreamConfig {
            // Closed port: reaching dispatch is observable as a 502
            authority: "127.0.0.1:1".to_string(),
            scheme: "http".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            pivot_prefix: Some("/api/x/".to_string()),
        }
    }

    fn pipeline_with(store: Arc<dyn BindingStore>) -> Pipeline {
        let upstream = upstream();
        Pipeline::new(
            store,
            RoutingRule::from_config(&upstream),
            UpstreamCredential::from_config(&upstream),
            Dispatcher::new().unwrap(),
        )
    }

    fn request_without_chain() -> Request<Body> {
        Request::builder().uri("/foo").body(Body::empty()).unwrap()
    }

    fn request_with_identity(spiffe_id: &str) -> Request<Body> {
        let chain = test_chain(spiffe_id);
        let mut request = Request::builder().uri("/foo").body(Body::empty()).unwrap();
        request.extensions_mut().insert(chain);
        request
    }

    fn test_chain(spiffe_id: &str) -> PeerCertChain {
        use rcgen::{CertificateParams, DistinguishedName, DnType, Ia5String, KeyPair, SanType};

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "test-client");
        params.distinguished_name = dn;
        params.subject_alt_names = vec![SanType::URI(Ia5String::try_from(spiffe_id).unwrap())];
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        let der = [rustls::pki_types::CertificateDer::from(cert.der().to_vec())];
        PeerCertChain::from_der_chain(&der)
    }

    #[tokio::test]
    async fn missing_peer_chain_is_unauthenticated_and_never_queries_store() {
        // GIVEN: a request with no peer chain (insecure listener)
        let store = Arc::new(CountingStore::default());
        let pipeline = pipeline_with(Arc::clone(&store) as Arc<dyn BindingStore>);
        // WHEN: handling
        let response = pipeline.handle(request_without_chain()).await;
        // THEN: 401 and the binding store was never consulted
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chain_without_spiffe_uri_is_unauthenticated() {
        use rcgen::{CertificateParams, DistinguishedName, DnType, Ia5String, KeyPair, SanType};

        let store = Arc::new(CountingStore::default());
        let pipeline = pipeline_with(Arc::clone(&store) as Arc<dyn BindingStore>);

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "no-spiffe");
        params.distinguished_name = dn;
        params.subject_alt_names =
            vec![SanType::DnsName(Ia5String::try_from("client.internal").unwrap())];
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        let der = [rustls::pki_types::CertificateDer::from(cert.der().to_vec())];

        let mut request = Request::builder().uri("/foo").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(PeerCertChain::from_der_chain(&der));

        let response = pipeline.handle(request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unbound_identity_is_forbidden_before_dispatch() {
        // GIVEN: an identity with no binding row
        let store = Arc::new(MemoryBindingStore::new());
        let pipeline = pipeline_with(store);
        // WHEN: handling
        let response = pipeline.handle(request_with_identity("spiffe://td/nobody")).await;
        // THEN: 403, not 502 — dispatch never happened
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn store_failure_is_forbidden_before_dispatch() {
        // Store error and not-found share the client response category
        let store = MemoryBindingStore::new().with_binding("spiffe://td/a", "ws-a");
        store.set_unavailable(true);
        let pipeline = pipeline_with(Arc::new(store));

        let response = pipeline.handle(request_with_identity("spiffe://td/a")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn bound_identity_reaches_dispatch() {
        // GIVEN: a valid binding and an unreachable upstream
        let store = MemoryBindingStore::new().with_binding("spiffe://td/a", "ws-a");
        let pipeline = pipeline_with(Arc::new(store));
        // WHEN: handling
        let response = pipeline.handle(request_with_identity("spiffe://td/a")).await;
        // THEN: the request got past authorization and failed at the gateway
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn concurrent_requests_resolve_their_own_workspaces() {
        // Two identities in flight must not leak workspaces across requests;
        // observable here through per-request store lookups both happening
        let store = Arc::new(
            MemoryBindingStore::new()
                .with_binding("spiffe://td/a", "ws-a")
                .with_binding("spiffe://td/b", "ws-b"),
        );
        let pipeline = Arc::new(pipeline_with(Arc::clone(&store) as Arc<dyn BindingStore>));

        let a = {
            let p = Arc::clone(&pipeline);
            tokio::spawn(async move { p.handle(request_with_identity("spiffe://td/a")).await })
        };
        let b = {
            let p = Arc::clone(&pipeline);
            tokio::spawn(async move { p.handle(request_with_identity("spiffe://td/b")).await })
        };

        // Both were authorized independently (and then failed at dispatch,
        // which is downstream of the property under test)
        assert_eq!(a.await.unwrap().status(), StatusCode::BAD_GATEWAY);
        assert_eq!(b.await.unwrap().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn failure_responses_map_the_error_taxonomy() {
        assert_eq!(
            failure_response(&Error::NoIdentity).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            failure_response(&Error::UnknownWorkspace("spiffe://td/x".into())).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            failure_response(&Error::LookupUnavailable(sqlx::Error::PoolClosed)).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            failure_response(&Error::InvalidHostOverride).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            failure_response(&Error::Internal("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn failure_responses_carry_their_status_not_a_default() {
        // The mapped status must survive response construction
        let response = failure_response(&Error::NoIdentity);
        assert_ne!(response.status(), StatusCode::OK);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"not authorized");
    }
}
