//! Upstream dispatch — single forwarding attempt, streamed response.
//!
//! No retries and no circuit breaking: a connection-level failure becomes a
//! gateway error for the caller. Response status, headers, and body are
//! passed back unmodified apart from hop-by-hop headers, which belong to the
//! upstream connection rather than the proxied exchange.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, header};
use tracing::debug;

use crate::{Error, Result};

/// Connection establishment budget for a forwarding attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Hop-by-hop headers stripped in both directions: they belong to each
/// individual connection, not the proxied exchange.
const HOP_BY_HOP: [header::HeaderName; 4] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::TE,
    header::UPGRADE,
];

/// Forwards transformed requests to the upstream.
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
}

impl Dispatcher {
    /// Build a dispatcher with a shared HTTP client.
    ///
    /// Redirects are not followed — the upstream's redirects belong to the
    /// caller. There is no overall request deadline so long-lived streamed
    /// responses are not cut off; the connection timeout bounds unreachable
    /// upstreams.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Forward `request` to its (already rewritten) target and stream the
    /// response back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UpstreamUnavailable`] for connection-level failures
    /// (unreachable upstream, timeout). Upstream HTTP error statuses are not
    /// errors — they are relayed as-is.
    pub async fn forward(&self, request: Request<Body>) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();
        let url = parts.uri.to_string();

        debug!(method = %parts.method, url = %url, "Dispatching upstream");

        let mut outbound = self
            .client
            .request(parts.method, &url)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .build()
            .map_err(Error::UpstreamUnavailable)?;
        let mut outbound_headers = parts.headers;
        for name in &HOP_BY_HOP {
            outbound_headers.remove(name);
        }
        *outbound.headers_mut() = outbound_headers;

        let upstream_response = self
            .client
            .execute(outbound)
            .await
            .map_err(Error::UpstreamUnavailable)?;

        let status = upstream_response.status();
        let mut response = Response::builder().status(status);
        if let Some(headers) = response.headers_mut() {
            for (name, value) in upstream_response.headers() {
                if !HOP_BY_HOP.contains(name) {
                    headers.append(name.clone(), value.clone());
                }
            }
        }

        let response = response
            .body(Body::from_stream(upstream_response.bytes_stream()))
            .map_err(|e| Error::Internal(format!("Response reassembly failed: {e}")))?;

        debug!(status = %status, "Upstream responded");
        Ok(response)
    }
}
