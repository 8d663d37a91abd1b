//! Presented-token resolution: store lookup followed by the freshness check.

use chrono::{DateTime, Local, TimeZone, Utc};
use thiserror::Error;
use tracing::debug;

use intake_core::Token;

use crate::{FreshnessWindow, TokenStore, TokenStoreError};

/// Outcome of a failed resolution.
///
/// `NotFound` covers both "never issued" and "issued but expired"; callers
/// cannot tell the two apart. Store failures stay separate so an outage is not
/// reported as a missing token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("token not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] TokenStoreError),
}

/// Resolves a presented bearer value into a usable token.
#[derive(Debug, Clone)]
pub struct TokenResolver<S, Tz = Local> {
    store: S,
    window: FreshnessWindow,
    tz: Tz,
}

impl<S> TokenResolver<S, Local>
where
    S: TokenStore,
{
    /// Resolver that takes calendar dates in the host's local zone.
    pub fn new(store: S, window: FreshnessWindow) -> Self {
        Self {
            store,
            window,
            tz: Local,
        }
    }
}

impl<S, Tz> TokenResolver<S, Tz>
where
    S: TokenStore,
    Tz: TimeZone + Send + Sync,
{
    /// Resolver pinned to an explicit zone (tests, non-local deployments).
    pub fn with_time_zone(store: S, window: FreshnessWindow, tz: Tz) -> Self {
        Self { store, window, tz }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn window(&self) -> FreshnessWindow {
        self.window
    }

    pub async fn resolve(&self, presented: &str, now: DateTime<Utc>) -> Result<Token, ResolveError> {
        let Some(token) = self.store.find_by_value(presented).await? else {
            debug!("token lookup miss");
            return Err(ResolveError::NotFound);
        };

        if !self.window.is_fresh_in(&self.tz, token.created_at, now) {
            debug!(token_id = %token.id, "token outside freshness window");
            return Err(ResolveError::NotFound);
        }

        Ok(token)
    }
}
