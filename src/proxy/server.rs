//! Gateway server
//!
//! Owns the listener and feeds the [`Pipeline`]. Two listener modes:
//!
//! - TLS (default): each accepted connection goes through a rustls handshake,
//!   the peer certificate chain is captured and attached to every request on
//!   that connection as a [`PeerCertChain`] extension, and the connection is
//!   served with hyper.
//! - Insecure bypass (`tls.enabled: false` or `--insecure`): a plain listener
//!   with no handshake. No request carries a peer chain, so identity
//!   extraction fails and every request is rejected as unauthenticated. The
//!   bypass removes encryption, never authorization.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::bindings::BindingStore;
use crate::config::Config;
use crate::mtls::{PeerCertChain, build_server_config};
use crate::proxy::dispatch::Dispatcher;
use crate::proxy::pipeline::Pipeline;
use crate::proxy::rewrite::{RoutingRule, UpstreamCredential};
use crate::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Per-request orchestrator
    pub pipeline: Pipeline,
}

/// Identity-aware reverse proxy server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Identity → workspace store
    store: Arc<dyn BindingStore>,
}

impl Gateway {
    /// Create a new gateway over an already-connected binding store.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream HTTP client cannot be constructed.
    pub fn new(config: Config, store: Arc<dyn BindingStore>) -> Result<Self> {
        // Fail before binding if the dispatcher cannot be built
        Dispatcher::new()?;
        Ok(Self { config, store })
    }

    /// Run the gateway until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid, the TLS material cannot be
    /// loaded, or the listener cannot be bound.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let pipeline = Pipeline::new(
            Arc::clone(&self.store),
            RoutingRule::from_config(&self.config.upstream),
            UpstreamCredential::from_config(&self.config.upstream),
            Dispatcher::new()?,
        );
        let app = create_router(Arc::new(AppState { pipeline }));

        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("SVID PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!(
            upstream = %self.config.upstream.bare_authority(),
            scheme = %self.config.upstream.scheme,
            "Forwarding to upstream"
        );
        if let Some(ref prefix) = self.config.upstream.pivot_prefix {
            info!(pivot_prefix = %prefix, "Pivot-aware path rewriting enabled");
        }

        if self.config.tls.enabled {
            self.run_tls(listener, app, shutdown_tx).await
        } else {
            warn!(
                "TLS DISABLED - no client certificates can be presented, \
                 every request will be rejected as unauthenticated"
            );
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(shutdown_tx))
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
            Ok(())
        }
    }

    /// TLS accept loop: handshake per connection, then serve it with the
    /// captured peer chain attached to every request.
    async fn run_tls(
        &self,
        listener: TcpListener,
        app: Router,
        shutdown_tx: tokio::sync::broadcast::Sender<()>,
    ) -> Result<()> {
        let tls_config = build_server_config(&self.config.tls)?;
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mut shutdown_rx = shutdown_tx.subscribe();

        info!(
            require_client_cert = self.config.tls.require_client_cert,
            ca_verified = self.config.tls.ca_cert.is_some(),
            "mTLS listener ready"
        );

        tokio::spawn(shutdown_signal(shutdown_tx));

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let acceptor = acceptor.clone();
                    let app = app.clone();
                    tokio::spawn(async move {
                        serve_tls_connection(stream, peer_addr, acceptor, app).await;
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("Stopping accept loop");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Serve one TLS connection end to end.
///
/// Handshake failures are logged and dropped; they are connection-level
/// noise, not request failures.
async fn serve_tls_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    app: Router,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(s) => s,
        Err(e) => {
            debug!(peer = %peer_addr, error = %e, "TLS handshake failed");
            return;
        }
    };

    // Capture the chain once per connection; it is immutable for the
    // connection's lifetime.
    let chain = tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .map(PeerCertChain::from_der_chain)
        .unwrap_or_default();

    debug!(peer = %peer_addr, chain_len = chain.len(), "Connection established");

    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(chain.clone());
        app.clone().oneshot(request)
    });

    if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(tls_stream), service)
        .await
    {
        debug!(peer = %peer_addr, error = %e, "Connection closed with error");
    }
}

/// Create the router.
///
/// Every method and path is proxied; there are no local routes, so the whole
/// surface is a fallback handler.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Hand the request to the pipeline.
async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Response<Body> {
    state.pipeline.handle(request).await
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
