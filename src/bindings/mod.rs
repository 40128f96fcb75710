//! Identity → workspace binding resolution.
//!
//! The binding store maps a SPIFFE identity to the tenant workspace its
//! requests are routed to. Lookups are point queries performed once per
//! request with no in-process caching, so bindings take effect immediately.
//!
//! Three outcomes per lookup:
//! - a workspace is bound to the identity (forward),
//! - no binding exists — routine, logged at `warn` (reject),
//! - the store could not be queried — operational, logged at `error`
//!   (reject; indistinguishable from not-found in the client response).

pub mod store;

pub use store::{BindingStore, MemoryBindingStore, SqlBindingStore, Workspace};
