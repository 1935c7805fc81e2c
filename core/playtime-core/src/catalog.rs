//! Catalog provider seam and its TTL read-through cache.
//!
//! The cache bounds how often a potentially expensive catalog source is
//! queried. Invalidation is TTL-only; hosts that edit the catalog and need the
//! change picked up before the TTL elapses call [`CatalogCache::invalidate`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::TrackerError;
use crate::types::Trackable;

/// Authoritative list of executables eligible for tracking.
pub trait CatalogProvider: Send + Sync {
    fn list_trackables(&self) -> Result<Vec<Trackable>, String>;
}

/// A fixed in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    trackables: Vec<Trackable>,
}

impl StaticCatalog {
    pub fn new(trackables: Vec<Trackable>) -> Self {
        Self { trackables }
    }
}

impl CatalogProvider for StaticCatalog {
    fn list_trackables(&self) -> Result<Vec<Trackable>, String> {
        Ok(self.trackables.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogStatus {
    /// Served from a cache that is still within its TTL.
    Cached,
    /// The provider was queried this read.
    Refreshed,
    /// The provider failed; the previous (expired) cache was served.
    Stale,
    /// The provider failed and nothing was ever cached.
    Unavailable,
}

#[derive(Debug, Clone)]
struct CachedCatalog {
    trackables: Vec<Trackable>,
    fetched_at: DateTime<Utc>,
}

pub struct CatalogCache {
    provider: Arc<dyn CatalogProvider>,
    ttl: Duration,
    cached: Option<CachedCatalog>,
    invalidated: bool,
}

impl CatalogCache {
    pub fn new(provider: Arc<dyn CatalogProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            cached: None,
            invalidated: false,
        }
    }

    /// Returns the catalog, refreshing from the provider when the cache has
    /// expired. Provider failures fall back to the stale cache.
    pub fn read(&mut self, now: DateTime<Utc>) -> (CatalogStatus, &[Trackable]) {
        if self.is_fresh(now) {
            let trackables = self.cached_trackables();
            return (CatalogStatus::Cached, trackables);
        }

        match self
            .provider
            .list_trackables()
            .map_err(TrackerError::CatalogUnavailable)
        {
            Ok(trackables) => {
                debug!(count = trackables.len(), "Catalog refreshed");
                self.cached = Some(CachedCatalog {
                    trackables,
                    fetched_at: now,
                });
                self.invalidated = false;
                (CatalogStatus::Refreshed, self.cached_trackables())
            }
            Err(err) if self.cached.is_some() => {
                warn!(error = %err, "Catalog refresh failed; using stale cache");
                (CatalogStatus::Stale, self.cached_trackables())
            }
            Err(err) => {
                warn!(error = %err, "Catalog unavailable and nothing cached");
                (CatalogStatus::Unavailable, self.cached_trackables())
            }
        }
    }

    /// Forces the next read to query the provider.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.cached.as_ref().map(|cached| cached.fetched_at)
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        if self.invalidated {
            return false;
        }
        self.cached
            .as_ref()
            .and_then(|cached| now.signed_duration_since(cached.fetched_at).to_std().ok())
            .map(|age| age < self.ttl)
            .unwrap_or(false)
    }

    fn cached_trackables(&self) -> &[Trackable] {
        self.cached
            .as_ref()
            .map(|cached| cached.trackables.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        calls: Mutex<usize>,
        results: Mutex<VecDeque<Result<Vec<Trackable>, String>>>,
    }

    impl ScriptedProvider {
        fn new(results: Vec<Result<Vec<Trackable>, String>>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(0),
                results: Mutex::new(VecDeque::from(results)),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().expect("lock calls")
        }
    }

    impl CatalogProvider for ScriptedProvider {
        fn list_trackables(&self) -> Result<Vec<Trackable>, String> {
            *self.calls.lock().expect("lock calls") += 1;
            self.results
                .lock()
                .expect("lock results")
                .pop_front()
                .unwrap_or_else(|| Err("exhausted".to_string()))
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .expect("parse")
            .with_timezone(&Utc)
    }

    fn vn() -> Trackable {
        Trackable::new("vn", "Visual Novel", "/games/vn/game.exe")
    }

    #[test]
    fn serves_cache_within_ttl() {
        let provider = ScriptedProvider::new(vec![Ok(vec![vn()])]);
        let mut cache = CatalogCache::new(provider.clone(), Duration::from_secs(60));

        let (status, trackables) = cache.read(t0());
        assert_eq!(status, CatalogStatus::Refreshed);
        assert_eq!(trackables.len(), 1);

        let (status, _) = cache.read(t0() + ChronoDuration::seconds(59));
        assert_eq!(status, CatalogStatus::Cached);
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn refreshes_once_ttl_elapses() {
        let provider = ScriptedProvider::new(vec![Ok(vec![vn()]), Ok(vec![])]);
        let mut cache = CatalogCache::new(provider.clone(), Duration::from_secs(60));

        cache.read(t0());
        let (status, trackables) = cache.read(t0() + ChronoDuration::seconds(60));
        assert_eq!(status, CatalogStatus::Refreshed);
        assert!(trackables.is_empty());
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn provider_failure_keeps_stale_cache() {
        let provider = ScriptedProvider::new(vec![Ok(vec![vn()]), Err("db locked".into())]);
        let mut cache = CatalogCache::new(provider, Duration::from_secs(60));

        cache.read(t0());
        let (status, trackables) = cache.read(t0() + ChronoDuration::seconds(120));
        assert_eq!(status, CatalogStatus::Stale);
        assert_eq!(trackables, &[vn()]);
        assert_eq!(cache.fetched_at(), Some(t0()));
    }

    #[test]
    fn provider_failure_without_cache_is_unavailable() {
        let provider = ScriptedProvider::new(vec![Err("db missing".into())]);
        let mut cache = CatalogCache::new(provider, Duration::from_secs(60));

        let (status, trackables) = cache.read(t0());
        assert_eq!(status, CatalogStatus::Unavailable);
        assert!(trackables.is_empty());
    }

    #[test]
    fn invalidate_forces_refresh() {
        let provider = ScriptedProvider::new(vec![Ok(vec![vn()]), Ok(vec![])]);
        let mut cache = CatalogCache::new(provider.clone(), Duration::from_secs(60));

        cache.read(t0());
        cache.invalidate();
        let (status, _) = cache.read(t0() + ChronoDuration::seconds(1));
        assert_eq!(status, CatalogStatus::Refreshed);
        assert_eq!(provider.calls(), 2);
    }
}
