//! Priority-ordered, circuit-breaking fallback across market-data sources.
//!
//! Sources are tried one at a time in ascending priority. A source that
//! fails `failure_threshold` times in a row is disabled until reset. When
//! nothing answers, the resolver returns a synthetic quote flagged as such
//! instead of an error.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::MarketDataSource;
use crate::types::{AugurError, Market, RealtimeQuote, SYNTHETIC_SOURCE};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Consecutive failures before a source is disabled.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Upper bound on a single source call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Placeholder base price for Korean listings (KRW).
const SYNTHETIC_KR_PRICE: f64 = 50_000.0;

/// Placeholder base price for US listings (USD).
const SYNTHETIC_US_PRICE: f64 = 150.0;

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Health {
    enabled: bool,
    failure_count: u32,
}

impl Health {
    const INITIAL: Health = Health {
        enabled: true,
        failure_count: 0,
    };
}

/// Snapshot of one source's breaker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub enabled: bool,
    pub priority: u32,
    pub failure_count: u32,
}

/// A registered source with its own independently-locked health.
pub struct ProviderDescriptor {
    name: String,
    priority: u32,
    failure_threshold: u32,
    health: Mutex<Health>,
    source: Arc<dyn MarketDataSource>,
}

impl ProviderDescriptor {
    fn new(
        name: &str,
        priority: u32,
        failure_threshold: u32,
        source: Arc<dyn MarketDataSource>,
    ) -> Self {
        Self {
            name: name.to_string(),
            priority,
            failure_threshold,
            health: Mutex::new(Health::INITIAL),
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn enabled(&self) -> bool {
        self.health().enabled
    }

    pub fn failure_count(&self) -> u32 {
        self.health().failure_count
    }

    pub fn status(&self) -> SourceStatus {
        let h = *self.health();
        SourceStatus {
            name: self.name.clone(),
            enabled: h.enabled,
            priority: self.priority,
            failure_count: h.failure_count,
        }
    }

    /// Restore the breaker to its initial state.
    pub fn reset(&self) {
        *self.health() = Health::INITIAL;
        info!(source = %self.name, "Source reset");
    }

    // Health updates never hold the lock across an await, so a poisoned
    // lock can only come from a panic mid-assignment; the data is still valid.
    fn health(&self) -> MutexGuard<'_, Health> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_success(&self) {
        self.health().failure_count = 0;
    }

    fn record_failure(&self, err: &AugurError) {
        let mut h = self.health();
        h.failure_count += 1;
        warn!(
            source = %self.name,
            failures = h.failure_count,
            threshold = self.failure_threshold,
            error = %err,
            "Source attempt failed"
        );
        if h.enabled && h.failure_count >= self.failure_threshold {
            h.enabled = false;
            warn!(
                source = %self.name,
                failures = h.failure_count,
                "Source disabled after consecutive failures"
            );
        }
    }

    /// Guarded call: skipped when disabled or the market is unsupported.
    async fn try_fetch(
        &self,
        symbol: &str,
        market: Market,
        call_timeout: Duration,
    ) -> Option<RealtimeQuote> {
        if !self.enabled() {
            debug!(source = %self.name, "Source disabled, skipping");
            return None;
        }
        if !self.source.supports_market(market) {
            debug!(source = %self.name, %market, "Market not supported, skipping");
            return None;
        }

        debug!(source = %self.name, symbol, %market, "Fetching realtime quote");

        let outcome =
            tokio::time::timeout(call_timeout, self.source.fetch_realtime(symbol, market)).await;

        let message = match outcome {
            Ok(Ok(Some(quote))) if quote.is_well_formed() => {
                self.record_success();
                info!(
                    source = %self.name,
                    symbol,
                    price = quote.current_price,
                    "Realtime quote fetched"
                );
                return Some(quote);
            }
            Ok(Ok(Some(_))) => "malformed quote".to_string(),
            Ok(Ok(None)) => "no data".to_string(),
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => format!("timed out after {}ms", call_timeout.as_millis()),
        };

        self.record_failure(&AugurError::ProviderUnavailable {
            provider: self.name.clone(),
            message,
        });
        None
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Tries same-purpose sources in priority order until one answers.
pub struct FallbackResolver {
    /// Kept sorted by ascending priority; ties keep registration order.
    providers: Vec<ProviderDescriptor>,
    failure_threshold: u32,
    call_timeout: Duration,
}

impl Default for FallbackResolver {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_CALL_TIMEOUT)
    }
}

impl FallbackResolver {
    pub fn new(failure_threshold: u32, call_timeout: Duration) -> Self {
        Self {
            providers: Vec::new(),
            failure_threshold: failure_threshold.max(1),
            call_timeout,
        }
    }

    /// Register a source. Lower `priority` is tried first.
    pub fn register(
        &mut self,
        name: &str,
        priority: u32,
        source: Arc<dyn MarketDataSource>,
    ) -> anyhow::Result<()> {
        if self.providers.iter().any(|p| p.name == name) {
            anyhow::bail!("Source already registered: {name}");
        }
        let pos = self
            .providers
            .iter()
            .position(|p| p.priority > priority)
            .unwrap_or(self.providers.len());
        self.providers.insert(
            pos,
            ProviderDescriptor::new(name, priority, self.failure_threshold, source),
        );
        info!(source = name, priority, "Source registered");
        Ok(())
    }

    /// Return the first genuine quote, or a synthetic one if no source
    /// could answer. Never fails.
    pub async fn resolve_realtime(&self, symbol: &str, market: Market) -> RealtimeQuote {
        info!(symbol, %market, "Resolving realtime quote");

        for provider in &self.providers {
            if let Some(quote) = provider.try_fetch(symbol, market, self.call_timeout).await {
                return quote;
            }
        }

        warn!(symbol, %market, "All sources failed, returning synthetic quote");
        synthetic_quote(market)
    }

    /// Breaker state of every source, in trial order.
    pub fn status(&self) -> Vec<SourceStatus> {
        self.providers.iter().map(ProviderDescriptor::status).collect()
    }

    /// Clear every source's breaker.
    pub fn reset_all(&self) {
        for p in &self.providers {
            p.reset();
        }
        info!(count = self.providers.len(), "All sources reset");
    }

    /// Clear one source's breaker. Returns false for an unknown name.
    pub fn reset(&self, name: &str) -> bool {
        match self.providers.iter().find(|p| p.name == name) {
            Some(p) => {
                p.reset();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Deterministic placeholder used when every source failed.
pub fn synthetic_quote(market: Market) -> RealtimeQuote {
    let base = if market.is_korean() {
        SYNTHETIC_KR_PRICE
    } else {
        SYNTHETIC_US_PRICE
    };
    RealtimeQuote {
        current_price: base,
        market_cap: 0.0,
        trading_volume: 0,
        trading_value: 0.0,
        change_rate: 0.0,
        previous_close: base,
        source: SYNTHETIC_SOURCE.to_string(),
        synthetic: true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        pub Source {}

        #[async_trait]
        impl MarketDataSource for Source {
            fn supports_market(&self, market: Market) -> bool;
            async fn fetch_realtime(&self, symbol: &str, market: Market) -> Result<Option<RealtimeQuote>>;
        }
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        Quote(f64),
        Empty,
        Fail,
        Hang,
    }

    /// Records its name into a shared call log on every fetch.
    struct ScriptedSource {
        name: &'static str,
        behaviour: Behaviour,
        us_only: bool,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        fn supports_market(&self, market: Market) -> bool {
            !self.us_only || market.is_us()
        }

        async fn fetch_realtime(&self, _symbol: &str, _market: Market) -> Result<Option<RealtimeQuote>> {
            self.calls.lock().unwrap().push(self.name);
            match self.behaviour {
                Behaviour::Quote(p) => Ok(Some(RealtimeQuote::from_closes(self.name, p, p, 100))),
                Behaviour::Empty => Ok(None),
                Behaviour::Fail => anyhow::bail!("upstream 503"),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(None)
                }
            }
        }
    }

    fn scripted(
        name: &'static str,
        behaviour: Behaviour,
        calls: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<ScriptedSource> {
        Arc::new(ScriptedSource {
            name,
            behaviour,
            us_only: false,
            calls: Arc::clone(calls),
        })
    }

    fn call_log() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    // -- Ordering --------------------------------------------------------

    #[tokio::test]
    async fn test_tries_in_ascending_priority() {
        let calls = call_log();
        let mut r = FallbackResolver::default();
        r.register("third", 30, scripted("third", Behaviour::Quote(3.0), &calls)).unwrap();
        r.register("first", 10, scripted("first", Behaviour::Fail, &calls)).unwrap();
        r.register("second", 20, scripted("second", Behaviour::Empty, &calls)).unwrap();

        let q = r.resolve_realtime("AAPL", Market::Nasdaq).await;
        assert!(!q.synthetic);
        assert_eq!(q.source, "third");
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_success_short_circuits() {
        let calls = call_log();
        let mut r = FallbackResolver::default();
        r.register("a", 1, scripted("a", Behaviour::Quote(10.0), &calls)).unwrap();
        r.register("b", 2, scripted("b", Behaviour::Quote(20.0), &calls)).unwrap();

        let q = r.resolve_realtime("AAPL", Market::Nasdaq).await;
        assert_eq!(q.current_price, 10.0);
        assert_eq!(*calls.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_priority_ties_keep_registration_order() {
        let calls = call_log();
        let mut r = FallbackResolver::default();
        r.register("early", 5, scripted("early", Behaviour::Empty, &calls)).unwrap();
        r.register("late", 5, scripted("late", Behaviour::Empty, &calls)).unwrap();
        r.register("first", 1, scripted("first", Behaviour::Empty, &calls)).unwrap();

        let names: Vec<_> = r.status().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["first", "early", "late"]);

        r.resolve_realtime("AAPL", Market::Nasdaq).await;
        assert_eq!(*calls.lock().unwrap(), vec!["first", "early", "late"]);
    }

    #[tokio::test]
    async fn test_unsupported_market_skipped_without_penalty() {
        let calls = call_log();
        let mut r = FallbackResolver::default();
        r.register(
            "us",
            1,
            Arc::new(ScriptedSource {
                name: "us",
                behaviour: Behaviour::Quote(1.0),
                us_only: true,
                calls: Arc::clone(&calls),
            }),
        )
        .unwrap();
        r.register("global", 2, scripted("global", Behaviour::Quote(70_000.0), &calls)).unwrap();

        let q = r.resolve_realtime("005930", Market::Kospi).await;
        assert_eq!(q.source, "global");
        assert_eq!(*calls.lock().unwrap(), vec!["global"]);
        assert_eq!(r.status()[0].failure_count, 0);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let calls = call_log();
        let mut r = FallbackResolver::default();
        r.register("a", 1, scripted("a", Behaviour::Empty, &calls)).unwrap();
        assert!(r.register("a", 2, scripted("a", Behaviour::Empty, &calls)).is_err());
        assert_eq!(r.len(), 1);
    }

    // -- Circuit breaker -------------------------------------------------

    #[tokio::test]
    async fn test_disabled_after_threshold_failures() {
        let mut mock = MockSource::new();
        mock.expect_supports_market().return_const(true);
        mock.expect_fetch_realtime()
            .times(3)
            .returning(|_, _| Err(anyhow::anyhow!("rate limited")));

        let mut r = FallbackResolver::default();
        r.register("flaky", 1, Arc::new(mock)).unwrap();

        for expected in 1..=3u32 {
            let q = r.resolve_realtime("AAPL", Market::Nasdaq).await;
            assert!(q.synthetic);
            assert_eq!(r.status()[0].failure_count, expected);
        }
        assert!(!r.status()[0].enabled);

        // Disabled: no further fetch (mock would panic on a 4th call).
        let q = r.resolve_realtime("AAPL", Market::Nasdaq).await;
        assert!(q.synthetic);
        assert_eq!(r.status()[0].failure_count, 3);
    }

    #[tokio::test]
    async fn test_reset_restores_initial_state() {
        let calls = call_log();
        let mut r = FallbackResolver::new(2, DEFAULT_CALL_TIMEOUT);
        r.register("bad", 1, scripted("bad", Behaviour::Empty, &calls)).unwrap();

        r.resolve_realtime("X", Market::Nyse).await;
        r.resolve_realtime("X", Market::Nyse).await;
        assert!(!r.status()[0].enabled);

        assert!(r.reset("bad"));
        let status = r.status();
        let s = &status[0];
        assert!(s.enabled);
        assert_eq!(s.failure_count, 0);
        assert!(!r.reset("missing"));

        r.resolve_realtime("X", Market::Nyse).await;
        r.resolve_realtime("X", Market::Nyse).await;
        assert!(!r.status()[0].enabled);
        r.reset_all();
        assert!(r.status()[0].enabled);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let mut seq = mockall::Sequence::new();
        let mut mock = MockSource::new();
        mock.expect_supports_market().return_const(true);
        mock.expect_fetch_realtime()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        mock.expect_fetch_realtime()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(RealtimeQuote::from_closes("m", 12.0, 11.0, 5))));

        let mut r = FallbackResolver::default();
        r.register("m", 1, Arc::new(mock)).unwrap();

        r.resolve_realtime("X", Market::Nyse).await;
        r.resolve_realtime("X", Market::Nyse).await;
        assert_eq!(r.status()[0].failure_count, 2);

        let q = r.resolve_realtime("X", Market::Nyse).await;
        assert!(!q.synthetic);
        assert_eq!(r.status()[0].failure_count, 0);
        assert!(r.status()[0].enabled);
    }

    #[tokio::test]
    async fn test_malformed_quote_counts_as_failure() {
        let mut mock = MockSource::new();
        mock.expect_supports_market().return_const(true);
        mock.expect_fetch_realtime()
            .returning(|_, _| Ok(Some(RealtimeQuote::from_closes("m", -5.0, 1.0, 1))));

        let mut r = FallbackResolver::default();
        r.register("m", 1, Arc::new(mock)).unwrap();

        let q = r.resolve_realtime("X", Market::Nyse).await;
        assert!(q.synthetic);
        assert_eq!(r.status()[0].failure_count, 1);
    }

    #[tokio::test]
    async fn test_call_timeout_counts_as_failure() {
        let calls = call_log();
        let mut r = FallbackResolver::new(3, Duration::from_millis(50));
        r.register("slow", 1, scripted("slow", Behaviour::Hang, &calls)).unwrap();
        r.register("fast", 2, scripted("fast", Behaviour::Quote(99.0), &calls)).unwrap();

        let started = std::time::Instant::now();
        let q = r.resolve_realtime("X", Market::Nyse).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(q.source, "fast");
        assert_eq!(r.status()[0].failure_count, 1);
    }

    // -- Synthetic fallback ----------------------------------------------

    #[tokio::test]
    async fn test_no_sources_returns_synthetic() {
        let r = FallbackResolver::default();
        let q = r.resolve_realtime("005930", Market::Kospi).await;
        assert!(q.synthetic);
        assert_eq!(q.source, SYNTHETIC_SOURCE);
        assert_eq!(q.current_price, SYNTHETIC_KR_PRICE);
    }

    #[test]
    fn test_synthetic_quote_deterministic() {
        let a = synthetic_quote(Market::Nasdaq);
        let b = synthetic_quote(Market::Nasdaq);
        assert_eq!(a, b);
        assert_eq!(a.current_price, SYNTHETIC_US_PRICE);
        assert_eq!(a.change_rate, 0.0);
        assert!(a.is_well_formed());
        assert!(a.synthetic);
    }

    // -- Concurrency -----------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_all_counted() {
        let calls = call_log();
        let mut r = FallbackResolver::new(1_000, DEFAULT_CALL_TIMEOUT);
        r.register("bad", 1, scripted("bad", Behaviour::Fail, &calls)).unwrap();
        let r = Arc::new(r);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let r = Arc::clone(&r);
                tokio::spawn(async move { r.resolve_realtime("X", Market::Nyse).await })
            })
            .collect();
        for h in futures::future::join_all(handles).await {
            assert!(h.unwrap().synthetic);
        }

        assert_eq!(r.status()[0].failure_count, 50);
    }
}
