//! svid-proxy Library
//!
//! Identity-aware mutual-TLS reverse proxy for tenant-partitioned backends.
//!
//! # Request pipeline
//!
//! ```text
//! TCP connection
//!   → TLS handshake   (client certificate captured)
//!   → SPIFFE URI extracted from peer chain SANs
//!   → identity → workspace lookup (binding store)
//!   → request path rewritten with workspace segment
//!   → upstream Basic-auth + Host headers attached
//!   → single forwarding attempt, response streamed back
//! ```
//!
//! Any failure before dispatch terminates the request with an authorization
//! error; dispatch failures terminate it with a gateway error. Nothing is
//! retried and nothing falls through to forwarding after an error.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bindings;
pub mod cli;
pub mod config;
pub mod error;
pub mod mtls;
pub mod proxy;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Sentinel path segment substituted for an empty resolved workspace so the
/// rewritten path never contains two adjacent separators.
pub const EMPTY_WORKSPACE_SENTINEL: &str = "-";

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
