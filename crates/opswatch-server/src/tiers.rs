//! Read-through cache for risk tier thresholds.
//!
//! The risk engine owns the thresholds; this cache bounds how often we ask
//! for them and keeps the dashboard serving while the engine is away. A
//! value younger than the TTL is returned as-is; an expired (or absent)
//! value triggers one bounded fetch; on fetch failure the stale value -- or
//! the packaged default -- is served. Availability over freshness.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use opswatch_core::tiers::TierConfig;

/// Time source, injected so TTL expiry is deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock used in production.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Where tier thresholds come from.
#[async_trait]
pub trait TierSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<TierConfig>;
}

/// Fetches thresholds from the risk engine's config endpoint.
pub struct HttpTierSource {
    http: reqwest::Client,
    url: String,
}

impl HttpTierSource {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: format!("{}/api/config", base_url.trim_end_matches('/')),
        })
    }
}

#[derive(Deserialize)]
struct TierResponse {
    tiers: TierConfig,
}

#[async_trait]
impl TierSource for HttpTierSource {
    async fn fetch(&self) -> anyhow::Result<TierConfig> {
        let resp = self.http.get(&self.url).send().await?.error_for_status()?;
        let body: TierResponse = resp.json().await?;
        Ok(body.tiers)
    }
}

struct CacheEntry {
    config: TierConfig,
    fetched_at: Instant,
}

/// TTL-bounded tier-threshold cache with stale-on-failure fallback.
pub struct TierCache {
    source: Arc<dyn TierSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entry: RwLock<Option<CacheEntry>>,
}

impl TierCache {
    pub fn new(source: Arc<dyn TierSource>, ttl: Duration) -> Self {
        Self::with_clock(source, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(source: Arc<dyn TierSource>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            ttl,
            entry: RwLock::new(None),
        }
    }

    /// Current thresholds. Never fails; blocks at most for one bounded
    /// fetch. Two callers racing past an expired entry may both refresh --
    /// the overwrite is idempotent.
    pub async fn get(&self) -> TierConfig {
        if let Some(entry) = self.entry.read().await.as_ref() {
            if self.clock.now().duration_since(entry.fetched_at) < self.ttl {
                return entry.config;
            }
        }

        match self.source.fetch().await {
            Ok(config) => {
                debug!(
                    green_max = config.green_max,
                    yellow_max = config.yellow_max,
                    red_max = config.red_max,
                    "tier thresholds refreshed"
                );
                *self.entry.write().await = Some(CacheEntry {
                    config,
                    fetched_at: self.clock.now(),
                });
                config
            }
            Err(e) => {
                let stale = self.entry.read().await.as_ref().map(|entry| entry.config);
                match stale {
                    Some(config) => {
                        warn!(error = %e, "tier refresh failed, serving stale thresholds");
                        config
                    }
                    None => {
                        warn!(error = %e, "tier refresh failed, serving default thresholds");
                        TierConfig::default()
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Clock advanced by hand.
    struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }
    }

    /// Source that counts fetches and serves a fixed answer sequence;
    /// `None` entries (and running off the end) are failures.
    struct ScriptedSource {
        calls: AtomicUsize,
        script: Vec<Option<TierConfig>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Option<TierConfig>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TierSource for ScriptedSource {
        async fn fetch(&self) -> anyhow::Result<TierConfig> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.get(call).copied().flatten() {
                Some(config) => Ok(config),
                None => anyhow::bail!("risk engine unreachable"),
            }
        }
    }

    fn custom_tiers() -> TierConfig {
        TierConfig {
            green_max: 30,
            yellow_max: 80,
            red_max: 120,
        }
    }

    #[tokio::test]
    async fn first_fetch_failure_serves_defaults() {
        let source = Arc::new(ScriptedSource::new(vec![None]));
        let cache = TierCache::new(source, Duration::from_secs(60));
        assert_eq!(cache.get().await, TierConfig::default());
    }

    #[tokio::test]
    async fn value_within_ttl_is_served_without_refetch() {
        let source = Arc::new(ScriptedSource::new(vec![Some(custom_tiers())]));
        let clock = Arc::new(ManualClock::new());
        let cache = TierCache::with_clock(
            Arc::clone(&source) as Arc<dyn TierSource>,
            Duration::from_secs(60),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        assert_eq!(cache.get().await, custom_tiers());
        clock.advance(Duration::from_secs(30));
        // Well within the TTL: same value even though the source has no
        // second answer scripted (the engine may as well be down now).
        assert_eq!(cache.get().await, custom_tiers());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn expired_entry_triggers_refresh() {
        let updated = TierConfig {
            green_max: 50,
            yellow_max: 110,
            red_max: 170,
        };
        let source = Arc::new(ScriptedSource::new(vec![
            Some(custom_tiers()),
            Some(updated),
        ]));
        let clock = Arc::new(ManualClock::new());
        let cache = TierCache::with_clock(
            Arc::clone(&source) as Arc<dyn TierSource>,
            Duration::from_secs(60),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        assert_eq!(cache.get().await, custom_tiers());
        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get().await, updated);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn refresh_failure_serves_stale_value() {
        let source = Arc::new(ScriptedSource::new(vec![Some(custom_tiers()), None]));
        let clock = Arc::new(ManualClock::new());
        let cache = TierCache::with_clock(
            Arc::clone(&source) as Arc<dyn TierSource>,
            Duration::from_secs(60),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        assert_eq!(cache.get().await, custom_tiers());
        clock.advance(Duration::from_secs(120));
        // The engine is down now; the stale value is still served.
        assert_eq!(cache.get().await, custom_tiers());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn http_source_parses_the_config_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/config")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"tiers": {"green_max": 35, "yellow_max": 90, "red_max": 140}}"#)
            .create_async()
            .await;

        let source = HttpTierSource::new(&server.url(), Duration::from_secs(2)).unwrap();
        let config = source.fetch().await.unwrap();
        assert_eq!(config.green_max, 35);
        assert_eq!(config.red_max, 140);
    }

    #[tokio::test]
    async fn http_source_error_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/config")
            .with_status(500)
            .create_async()
            .await;

        let source = HttpTierSource::new(&server.url(), Duration::from_secs(2)).unwrap();
        assert!(source.fetch().await.is_err());
    }
}
