//! Request transformation: path rewriting and upstream headers.
//!
//! A [`RoutingRule`] fixes the upstream authority and the workspace
//! insertion policy; [`transform`] mutates an inbound request in place so it
//! targets the resolved workspace's partition on the upstream. The
//! transformation is deterministic over its inputs and is applied exactly
//! once per request.

use axum::body::Body;
use axum::http::{Request, Uri, header, header::HeaderValue};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;

use crate::EMPTY_WORKSPACE_SENTINEL;
use crate::bindings::Workspace;
use crate::config::UpstreamConfig;
use crate::{Error, Result};

/// Header consumed from the inbound request to override the upstream host.
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

// ─────────────────────────────────────────────────────────────────────────────
// Routing rule
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed upstream routing: scheme, bare authority, and the workspace
/// insertion policy. Immutable after startup and shared across requests.
#[derive(Clone, Debug)]
pub struct RoutingRule {
    scheme: String,
    authority: String,
    pivot_prefix: Option<String>,
}

impl RoutingRule {
    /// Build the rule from upstream configuration, stripping any scheme
    /// prefix off the configured authority.
    #[must_use]
    pub fn from_config(upstream: &UpstreamConfig) -> Self {
        Self {
            scheme: upstream.scheme.clone(),
            authority: upstream.bare_authority(),
            pivot_prefix: upstream.pivot_prefix.clone(),
        }
    }

    /// Upstream scheme (`http` or `https`).
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Upstream authority without scheme prefix.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Insert the workspace segment into a request path.
    ///
    /// With a configured pivot prefix present in the path, the workspace is
    /// inserted immediately after it; otherwise the workspace becomes the
    /// first path segment. An empty workspace (which the resolution
    /// invariant rules out, but is handled defensively) is replaced with a
    /// sentinel segment so the output never contains `//`.
    #[must_use]
    pub fn rewrite_path(&self, path: &str, workspace: &Workspace) -> String {
        let segment = if workspace.is_empty() {
            EMPTY_WORKSPACE_SENTINEL
        } else {
            workspace.as_str()
        };

        match &self.pivot_prefix {
            Some(prefix) if path.contains(prefix.as_str()) => {
                let remainder = path.replacen(prefix.as_str(), "", 1);
                format!("{prefix}{segment}/{remainder}")
            }
            _ => format!("/{segment}{path}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Upstream credential
// ─────────────────────────────────────────────────────────────────────────────

/// Static username/password the proxy uses to authenticate to the upstream,
/// independent of the inbound identity.
#[derive(Clone)]
pub struct UpstreamCredential {
    username: String,
    password: String,
}

impl UpstreamCredential {
    /// Build from resolved upstream configuration.
    #[must_use]
    pub fn from_config(upstream: &UpstreamConfig) -> Self {
        Self {
            username: upstream.resolve_username(),
            password: upstream.resolve_password(),
        }
    }

    /// Construct directly (tests).
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `Basic base64(user:pass)` header value.
    fn basic_auth_header(&self) -> Result<HeaderValue> {
        let encoded = BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password));
        HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|e| Error::Internal(format!("Invalid credential header: {e}")))
    }
}

impl std::fmt::Debug for UpstreamCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log the password
        f.debug_struct("UpstreamCredential")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transformation
// ─────────────────────────────────────────────────────────────────────────────

/// Rewrite `request` in place so it targets `workspace` on the upstream.
///
/// - path: workspace inserted per [`RoutingRule::rewrite_path`] (query
///   string preserved),
/// - scheme/authority: the upstream's, unless an inbound `X-Forwarded-Host`
///   header overrides the host,
/// - `Authorization`: Basic credentials, overwriting any prior value,
/// - `Host`: the chosen host.
///
/// # Errors
///
/// Returns [`Error::InvalidHostOverride`] when an `X-Forwarded-Host` header
/// is present but not readable as a host, and an internal error when the
/// rewritten URI or a header value cannot be constructed.
pub fn transform(
    request: &mut Request<Body>,
    rule: &RoutingRule,
    credential: &UpstreamCredential,
    workspace: &Workspace,
) -> Result<()> {
    // An override that is present but unreadable is rejected rather than
    // silently replaced with the configured authority.
    let forwarded_host = match request.headers().get(X_FORWARDED_HOST) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| Error::InvalidHostOverride)?
                .to_owned(),
        ),
        None => None,
    };
    let host = forwarded_host.unwrap_or_else(|| rule.authority().to_string());

    let new_path = rule.rewrite_path(request.uri().path(), workspace);
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{new_path}?{query}"),
        None => new_path,
    };

    let uri = Uri::builder()
        .scheme(rule.scheme())
        .authority(host.as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| Error::Internal(format!("Rewritten URI invalid: {e}")))?;
    *request.uri_mut() = uri;

    let host_value = HeaderValue::from_str(&host)
        .map_err(|e| Error::Internal(format!("Invalid host header value: {e}")))?;

    let headers = request.headers_mut();
    headers.insert(header::AUTHORIZATION, credential.basic_auth_header()?);
    headers.insert(header::HOST, host_value);

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
