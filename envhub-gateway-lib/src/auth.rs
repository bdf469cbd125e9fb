//! Bearer-token authentication with a validation cache.
//!
//! Validated principals are cached per token in one LRU bounded at
//! `max_entries`, each entry with a TTL. The lock only guards map updates; a
//! miss or stale entry goes to the identity service with no lock held, and
//! only successful validations are cached.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use envhub_runtime::InstanceError;
use envhub_runtime::metrics::metrics;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::identity::Principal;
use crate::state::GatewayState;

#[derive(Clone)]
struct CachedPrincipal {
    principal: Principal,
    inserted: Instant,
}

pub struct TokenCache {
    entries: Mutex<LruCache<String, CachedPrincipal>>,
    ttl: Duration,
}

impl TokenCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Fresh cached principal for `token`. Stale entries are evicted.
    pub fn get(&self, token: &str) -> Option<Principal> {
        let hit = {
            let mut entries = self.entries.lock();
            let cached = entries
                .get(token)
                .map(|entry| (entry.inserted.elapsed() <= self.ttl, entry.principal.clone()));
            match cached {
                Some((true, principal)) => Some(principal),
                Some((false, _)) => {
                    entries.pop(token);
                    None
                }
                None => None,
            }
        };
        match hit {
            Some(_) => metrics().token_cache_hits.inc(),
            None => metrics().token_cache_misses.inc(),
        }
        hit
    }

    pub fn insert(&self, token: &str, principal: Principal) {
        self.entries.lock().put(
            token.to_string(),
            CachedPrincipal {
                principal,
                inserted: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

/// Request extension carrying the caller; `None` when tokens are disabled.
#[derive(Debug, Clone, Default)]
pub struct Caller(pub Option<Principal>);

impl Caller {
    pub fn tenant_key(&self) -> Option<String> {
        self.0.as_ref().map(Principal::tenant_key)
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve a token to a principal through the cache.
pub async fn authenticate(state: &GatewayState, token: &str) -> Result<Principal, InstanceError> {
    if let Some(principal) = state.tokens.get(token) {
        return Ok(principal);
    }
    let principal = state.identity.validate_token(token).await?;
    state.tokens.insert(token, principal.clone());
    Ok(principal)
}

pub async fn require_auth(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if !state.token_enabled {
        request.extensions_mut().insert(Caller(None));
        return next.run(request).await;
    }

    let Some(token) = bearer_token(&request).map(str::to_string) else {
        metrics().record_rejection("auth");
        return ApiError(InstanceError::Unauthorized("missing bearer token".into())).into_response();
    };

    match authenticate(&state, &token).await {
        Ok(principal) => {
            debug!("authenticated {}", principal.subject);
            request.extensions_mut().insert(Caller(Some(principal)));
            next.run(request).await
        }
        Err(err) => {
            warn!("token validation failed: {err}");
            metrics().record_rejection("auth");
            let err = match err {
                InstanceError::Unauthorized(_) | InstanceError::Forbidden(_) => err,
                other => InstanceError::Unauthorized(other.message().to_string()),
            };
            ApiError(err).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(subject: &str) -> Principal {
        Principal {
            subject: subject.into(),
            tenant: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_least_recently_used() {
        let cache = TokenCache::new(2, Duration::from_secs(60));
        cache.insert("a", principal("a"));
        cache.insert("b", principal("b"));
        assert!(cache.get("a").is_some());
        cache.insert("c", principal("c"));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_are_dropped() {
        let cache = TokenCache::new(10, Duration::from_secs(60));
        cache.insert("a", principal("a"));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("a").is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_cache_evicts_exactly_the_oldest_entry() {
        let cache = TokenCache::new(1000, Duration::from_secs(60));
        assert_eq!(cache.capacity(), 1000);
        for i in 0..1000 {
            cache.insert(&format!("tok-{i}"), principal("p"));
        }
        assert!(cache.get("tok-0").is_some());
        cache.insert("tok-1000", principal("p"));
        assert_eq!(cache.len(), 1000);
        assert!(cache.get("tok-1").is_none());
        assert!(cache.get("tok-0").is_some());
        assert!(cache.get("tok-2").is_some());
        assert!(cache.get("tok-1000").is_some());
    }
}
