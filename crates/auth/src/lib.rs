//! `intake-auth`: bearer token freshness and lookup, and signature checks for
//! contracts.
//!
//! This crate is intentionally decoupled from HTTP and from any concrete store.

pub mod freshness;
pub mod resolver;
pub mod signature;
pub mod store;

pub use freshness::{DEFAULT_MAX_AGE_DAYS, FreshnessWindow, WindowError};
pub use resolver::{ResolveError, TokenResolver};
pub use signature::{SignatureError, verify_signature};
pub use store::{TokenStore, TokenStoreError};
