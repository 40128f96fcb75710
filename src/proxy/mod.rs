//! Request pipeline: transformation, dispatch, orchestration, and the
//! listener that feeds it.
//!
//! # Modules
//!
//! - [`rewrite`] — routing rule and request transformation
//! - [`dispatch`] — single-attempt upstream forwarding
//! - [`pipeline`] — per-request orchestration and failure mapping
//! - [`server`] — TLS/plain listeners and the axum router

pub mod dispatch;
pub mod pipeline;
pub mod rewrite;
pub mod server;

pub use dispatch::Dispatcher;
pub use pipeline::Pipeline;
pub use rewrite::{RoutingRule, UpstreamCredential};
pub use server::Gateway;
