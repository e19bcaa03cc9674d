//! End-to-end pipeline tests: sources → fan-out → ensemble, with fakes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_test::{assert_err, assert_ok};

use augur::engine::ensemble::{default_horizons, EnsembleAggregator, EnsembleError};
use augur::config::WatchlistEntry;
use augur::engine::fanout::FanOutOrchestrator;
use augur::engine::ranking::RankingService;
use augur::engine::service::{PredictError, PredictionService};
use augur::predictors::Predictor;
use augur::sources::fallback::FallbackResolver;
use augur::types::{Market, Sentiment};

use crate::fakes::{answer, Coverage, FakePredictor, FakeSource};

fn service_with(
    resolver: FallbackResolver,
    predictors: Vec<Arc<dyn Predictor>>,
    predictor_timeout: Duration,
) -> PredictionService {
    PredictionService::new(
        resolver,
        predictors,
        EnsembleAggregator::new(0.2, default_horizons()),
        predictor_timeout,
        Duration::from_secs(300),
    )
}

#[tokio::test]
async fn test_falls_back_to_next_source() {
    let primary = FakeSource::broken("Primary", Coverage::All);
    let secondary = FakeSource::new("Secondary", 71_000.0, Coverage::All);

    let mut resolver = FallbackResolver::default();
    resolver.register("Primary", 1, primary.clone()).unwrap();
    resolver.register("Secondary", 2, secondary.clone()).unwrap();

    let svc = service_with(
        resolver,
        vec![FakePredictor::answering("GPT", answer(72_000.0, "bullish", "momentum"))],
        Duration::from_secs(1),
    );

    let report = assert_ok!(svc.predict("005930", Market::Kospi).await);
    assert_eq!(report.quote.source, "Secondary");
    assert!(!report.quote.synthetic);
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);
    assert_eq!(report.ensemble["1d"].price, 72_000.0);
    assert_eq!(report.ensemble["1d"].sentiment, Sentiment::Positive);

    let status = svc.source_status();
    assert_eq!(status[0].failure_count, 1);
    assert_eq!(status[1].failure_count, 0);
}

#[tokio::test]
async fn test_market_support_routes_sources() {
    let kr = FakeSource::new("KrOnly", 50_500.0, Coverage::Korean);
    let us = FakeSource::new("UsOnly", 190.0, Coverage::Us);

    let mut resolver = FallbackResolver::default();
    resolver.register("KrOnly", 1, kr.clone()).unwrap();
    resolver.register("UsOnly", 2, us.clone()).unwrap();
    let resolver = Arc::new(resolver);

    let quote = resolver.resolve_realtime("AAPL", Market::Nasdaq).await;
    assert_eq!(quote.source, "UsOnly");
    assert_eq!(kr.calls(), 0);

    let quote = resolver.resolve_realtime("035720", Market::Kosdaq).await;
    assert_eq!(quote.source, "KrOnly");
    assert_eq!(us.calls(), 1);
}

#[tokio::test]
async fn test_breaker_trips_then_reset_recovers() {
    let only = FakeSource::broken("Only", Coverage::All);
    let mut resolver = FallbackResolver::default();
    resolver.register("Only", 1, only.clone()).unwrap();

    let svc = service_with(
        resolver,
        vec![FakePredictor::answering("Gemma", answer(150.0, "neutral", "flat"))],
        Duration::from_secs(1),
    );

    for _ in 0..5 {
        let report = assert_ok!(svc.predict("AAPL", Market::Nasdaq).await);
        assert!(report.quote.synthetic);
        assert_eq!(report.quote.source, "synthetic");
    }
    // Disabled after the third failure; later requests skip it.
    assert_eq!(only.calls(), 3);
    assert!(!svc.source_status()[0].enabled);
    assert_eq!(svc.cache_len().await, 0);

    only.set_healthy(true);
    let report = assert_ok!(svc.predict("AAPL", Market::Nasdaq).await);
    assert!(report.quote.synthetic, "still disabled until reset");

    svc.reset_sources();
    let report = assert_ok!(svc.predict("AAPL", Market::Nasdaq).await);
    assert!(!report.quote.synthetic);
    assert_eq!(report.quote.source, "Only");
    assert_eq!(svc.cache_len().await, 1);
}

#[tokio::test]
async fn test_slow_and_failing_predictors_are_isolated() {
    let mut resolver = FallbackResolver::default();
    resolver
        .register("Quotes", 1, FakeSource::new("Quotes", 100.0, Coverage::All))
        .unwrap();

    let svc = service_with(
        resolver,
        vec![
            FakePredictor::answering("Claude", answer(100.0, "positive", "a")),
            FakePredictor::answering("GPT", answer(110.0, "positive", "b")),
            FakePredictor::slow("Qwen", answer(500.0, "negative", "late"), Duration::from_secs(5)),
            FakePredictor::failing("Gemini"),
        ],
        Duration::from_millis(250),
    );

    let started = Instant::now();
    let report = assert_ok!(svc.predict("AAPL", Market::Nasdaq).await);
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(report.predictions.len(), 4);
    assert_eq!(report.successful_predictors, 2);
    assert!(!report.predictions["Qwen"].success);
    assert!(!report.predictions["Gemini"].success);
    assert_eq!(report.ensemble["1d"].price, 105.0);
    assert_eq!(report.ensemble["1d"].reason, "a | b");
}

#[tokio::test]
async fn test_disagreement_flag_end_to_end() {
    let mut resolver = FallbackResolver::default();
    resolver
        .register("Quotes", 1, FakeSource::new("Quotes", 120.0, Coverage::All))
        .unwrap();

    let svc = service_with(
        resolver,
        vec![
            FakePredictor::answering("A", answer(100.0, "up", "x")),
            FakePredictor::answering("B", answer(150.0, "down", "y")),
        ],
        Duration::from_secs(1),
    );

    let report = assert_ok!(svc.predict("NVDA", Market::Nasdaq).await);
    let day = &report.ensemble["1d"];
    assert_eq!(day.price, 125.0);
    assert_eq!(day.std_dev, 35.36);
    assert!(day.disagreement);
    // 1-1 tie resolves to the first predictor by name.
    assert_eq!(day.sentiment, Sentiment::Positive);
}

#[tokio::test]
async fn test_all_predictors_down_is_typed_error() {
    let svc = service_with(
        FallbackResolver::default(),
        vec![FakePredictor::failing("GPT"), FakePredictor::failing("Claude")],
        Duration::from_secs(1),
    );

    let err = assert_err!(svc.predict("AAPL", Market::Nasdaq).await);
    assert!(matches!(err, PredictError::Ensemble(EnsembleError::NoValidPredictions)));
}

#[tokio::test]
async fn test_concurrent_resolutions_never_lose_failures() {
    let flaky = FakeSource::broken("Flaky", Coverage::All);
    let mut resolver = FallbackResolver::new(1_000, Duration::from_secs(1));
    resolver.register("Flaky", 1, flaky.clone()).unwrap();
    let resolver = Arc::new(resolver);

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let r = Arc::clone(&resolver);
            tokio::spawn(async move { r.resolve_realtime(&format!("SYM{i}"), Market::Nyse).await })
        })
        .collect();
    for h in handles {
        let quote = h.await.unwrap();
        assert!(quote.synthetic);
    }

    assert_eq!(flaky.calls(), 32);
    assert_eq!(resolver.status()[0].failure_count, 32);
    assert!(resolver.status()[0].enabled);
}

#[tokio::test]
async fn test_fan_out_without_service() {
    let orchestrator = FanOutOrchestrator::new(vec![
        FakePredictor::answering("A", answer(10.0, "buy", "r")),
        FakePredictor::failing("B"),
    ]);
    let requests: BTreeMap<String, String> = [("A", "p"), ("B", "p")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let out = orchestrator.dispatch_all(&requests, Duration::from_secs(1)).await;
    assert_eq!(out.success_count, 1);
    assert!(out.results["A"].is_some());
    assert!(out.results["B"].is_none());
}

#[tokio::test]
async fn test_rankings_share_prediction_breakers() {
    let only = FakeSource::broken("Only", Coverage::All);
    let mut resolver = FallbackResolver::default();
    resolver.register("Only", 1, only.clone()).unwrap();

    let svc = service_with(
        resolver,
        vec![FakePredictor::answering("Gemma", answer(150.0, "neutral", "flat"))],
        Duration::from_secs(1),
    );
    let rankings = RankingService::new(
        svc.resolver(),
        vec![WatchlistEntry {
            symbol: "005930".into(),
            name: "Samsung Electronics".into(),
            market: Market::Kospi,
        }],
        10,
        Duration::from_secs(60),
    );

    // Three failed predictions trip the breaker the board also uses.
    for _ in 0..3 {
        assert_ok!(svc.predict("AAPL", Market::Nasdaq).await);
    }
    only.set_healthy(true);
    let board = rankings.rankings(false).await;
    assert_eq!(board.count, 0);
    assert_eq!(only.calls(), 3);

    svc.reset_sources();
    let board = rankings.rankings(false).await;
    assert_eq!(board.count, 1);
    assert_eq!(board.rankings[0].rank, 1);
    assert_eq!(board.rankings[0].source, "Only");
    assert_eq!(only.calls(), 4);
}
