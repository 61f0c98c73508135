use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tower::ServiceExt;

use market_briefing::config::default_config;
use market_briefing::holders::preferences::{BRIEFING_STOCKS_KEY, SEARCH_HISTORY_KEY};
use market_briefing::models::{
    CryptoTab, CryptoTicker, FearGreedIndex, FundingRate, Generation, LongShortRatio, OpenInterest,
};
use market_briefing::routers::create_routes;
use market_briefing::services::orchestrator::BRIEFING_ERROR_MESSAGE;
use market_briefing::services::{BriefingGenerator, MarketDataSource, OrchestratorSettings};
use market_briefing::*;

const BRIEFING_TEXT: &str = "# EXECUTIVE_SUMMARY\n市场平稳。\n\
# SENTIMENT\nSENTIMENT_TYPE: Positive\nSENTIMENT_SCORE: 70\n\
# DETAILED_NEWS\n### NEWS_ITEM ###\nTitle: 比特币走强\nSummary: 资金流入。\nTags: BTC\n";

/// Генератор сводок для тестов: считает вызовы, запоминает промпты, может
/// падать или отвечать с задержкой, если в промпте есть `slow_marker`.
#[derive(Default)]
struct FakeGenerator {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    fail: AtomicBool,
    slow_marker: Option<String>,
}

impl FakeGenerator {
    fn slow_on(marker: &str) -> Self {
        FakeGenerator {
            slow_marker: Some(marker.to_string()),
            ..FakeGenerator::default()
        }
    }
}

#[async_trait::async_trait]
impl BriefingGenerator for FakeGenerator {
    async fn generate(&self, prompt: &str) -> market_briefing::Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        if let Some(marker) = &self.slow_marker {
            if prompt.contains(marker.as_str()) {
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(BriefingError::ApiError("503 - unavailable".to_string()));
        }
        Ok(Generation {
            text: BRIEFING_TEXT.to_string(),
            citations: vec![Source {
                title: "Reuters".to_string(),
                uri: "https://reuters.com".to_string(),
            }],
        })
    }
}

#[derive(Default)]
struct FakeMarket {
    ticker_calls: Mutex<Vec<Vec<String>>>,
    fail_tickers: AtomicBool,
    fail_metrics: AtomicBool,
}

fn ticker(symbol: &str, price: &str) -> CryptoTicker {
    CryptoTicker {
        symbol: symbol.to_string(),
        price_change_percent: "1.5".to_string(),
        last_price: price.to_string(),
        volume: "10".to_string(),
        quote_volume: "1000".to_string(),
        high_price: price.to_string(),
        low_price: price.to_string(),
    }
}

#[async_trait::async_trait]
impl MarketDataSource for FakeMarket {
    async fn crypto_tickers(&self, symbols: &[String]) -> market_briefing::Result<Vec<CryptoTicker>> {
        self.ticker_calls.lock().unwrap().push(symbols.to_vec());
        if self.fail_tickers.load(Ordering::SeqCst) {
            return Err(BriefingError::ApiError("418 - banned".to_string()));
        }
        Ok(symbols.iter().map(|s| ticker(s, "100")).collect())
    }

    async fn fear_greed_index(&self) -> market_briefing::Result<Option<FearGreedIndex>> {
        if self.fail_metrics.load(Ordering::SeqCst) {
            return Err(BriefingError::ApiError("timeout".to_string()));
        }
        Ok(Some(FearGreedIndex {
            value: "72".to_string(),
            value_classification: "Greed".to_string(),
            timestamp: "1700000000".to_string(),
            time_until_update: None,
        }))
    }

    async fn long_short_ratio(
        &self,
        symbol: &str,
        _period: &str,
    ) -> market_briefing::Result<Option<LongShortRatio>> {
        if self.fail_metrics.load(Ordering::SeqCst) {
            return Err(BriefingError::ApiError("timeout".to_string()));
        }
        Ok(Some(LongShortRatio {
            symbol: symbol.to_string(),
            long_short_ratio: "1.2".to_string(),
            long_account: "0.55".to_string(),
            short_account: "0.45".to_string(),
            timestamp: 1_700_000_000_000,
        }))
    }

    async fn funding_rate(&self, symbol: &str) -> market_briefing::Result<Option<FundingRate>> {
        if self.fail_metrics.load(Ordering::SeqCst) {
            return Err(BriefingError::ApiError("timeout".to_string()));
        }
        Ok(Some(FundingRate {
            symbol: symbol.to_string(),
            last_funding_rate: "0.0001".to_string(),
            mark_price: None,
        }))
    }

    // Открытый интерес недоступен всегда
    async fn open_interest(&self, _symbol: &str) -> market_briefing::Result<Option<OpenInterest>> {
        Err(BriefingError::ApiError("451 - restricted".to_string()))
    }
}

struct Fixture {
    orchestrator: RefreshOrchestrator,
    generator: Arc<FakeGenerator>,
    market: Arc<FakeMarket>,
}

fn fixture_with(generator: FakeGenerator, store: MemoryStore) -> Fixture {
    let settings = OrchestratorSettings::from(&default_config().unwrap());
    fixture_with_settings(generator, store, settings)
}

fn fixture_with_settings(
    generator: FakeGenerator,
    store: MemoryStore,
    settings: OrchestratorSettings,
) -> Fixture {
    let config = default_config().unwrap();
    let generator = Arc::new(generator);
    let market = Arc::new(FakeMarket::default());
    let preferences = PreferencesHolder::load(Arc::new(store), &config.preference_defaults());
    let orchestrator = RefreshOrchestrator::new(
        generator.clone(),
        market.clone(),
        preferences,
        settings,
        &config.default_industry,
    );
    Fixture {
        orchestrator,
        generator,
        market,
    }
}

fn fixture() -> Fixture {
    fixture_with(FakeGenerator::default(), MemoryStore::new())
}

#[tokio::test]
async fn test_refresh_applies_briefing_and_records_history() {
    let f = fixture();

    let outcome = f.orchestrator.refresh_briefing("  AI Chips ").await;
    assert_eq!(tokio_test::assert_ok!(outcome), RefreshOutcome::Applied);

    let state = f.orchestrator.briefing_state().await;
    assert_eq!(state.status, FeedStatus::Ready);
    assert!(state.error.is_none());
    assert!(state.last_updated.is_some());

    let briefing = state.data.unwrap();
    assert_eq!(briefing.industry, "AI Chips");
    assert_eq!(briefing.summary, "市场平稳。");
    assert_eq!(briefing.sentiment.score, 70);
    assert_eq!(briefing.news_items.len(), 1);
    assert_eq!(briefing.sources.len(), 1);

    assert_eq!(f.orchestrator.current_industry().await, "AI Chips");
    assert_eq!(
        f.orchestrator.preferences().search_history().await,
        vec!["AI Chips".to_string()]
    );
}

#[tokio::test]
async fn test_blank_industry_is_skipped() {
    let f = fixture();

    let outcome = f.orchestrator.refresh_briefing("   ").await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Skipped);
    assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.orchestrator.briefing_state().await.status, FeedStatus::Idle);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_briefing() {
    let f = fixture();
    f.orchestrator.refresh_briefing("Crypto").await.unwrap();

    f.generator.fail.store(true, Ordering::SeqCst);
    let result = f.orchestrator.refresh_briefing("Biotech").await;
    assert!(result.is_err());

    let state = f.orchestrator.briefing_state().await;
    assert_eq!(state.status, FeedStatus::Error);
    assert_eq!(state.error.as_deref(), Some(BRIEFING_ERROR_MESSAGE));
    assert_eq!(state.data.unwrap().industry, "Crypto");

    // неудачная тема в историю не попадает
    assert_eq!(
        f.orchestrator.preferences().search_history().await,
        vec!["Crypto".to_string()]
    );

    f.generator.fail.store(false, Ordering::SeqCst);
    let outcome = f.orchestrator.retry_briefing().await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Applied);
    let state = f.orchestrator.briefing_state().await;
    assert_eq!(state.status, FeedStatus::Ready);
    assert_eq!(state.data.unwrap().industry, "Biotech");
}

#[tokio::test]
async fn test_older_response_does_not_overwrite_newer() {
    let f = fixture_with(FakeGenerator::slow_on("Slow Topic"), MemoryStore::new());

    let (slow, fast) = tokio::join!(
        f.orchestrator.refresh_briefing("Slow Topic"),
        f.orchestrator.refresh_briefing("Fast Topic"),
    );

    assert_eq!(slow.unwrap(), RefreshOutcome::Stale);
    assert_eq!(fast.unwrap(), RefreshOutcome::Applied);

    let state = f.orchestrator.briefing_state().await;
    assert_eq!(state.data.unwrap().industry, "Fast Topic");
    assert_eq!(f.orchestrator.current_industry().await, "Fast Topic");
}

#[tokio::test]
async fn test_admin_config_does_not_affect_inflight_refresh() {
    let store = MemoryStore::new().with_entry(BRIEFING_STOCKS_KEY, r#"["NVDA"]"#);
    let f = fixture_with(FakeGenerator::slow_on("Semis"), store);

    let preferences = f.orchestrator.preferences().clone();
    let (refresh, saved) = tokio::join!(f.orchestrator.refresh_briefing("Semis"), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        preferences.save_admin_config("qqqz", "btc").await
    });
    tokio_test::assert_ok!(refresh);
    assert_eq!(saved.unwrap().briefing_stocks, vec!["QQQZ".to_string()]);

    {
        let prompts = f.generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("NVDA"));
        assert!(!prompts[0].contains("QQQZ"));
    }

    f.orchestrator.refresh_briefing("Semis").await.unwrap();
    let prompts = f.generator.prompts.lock().unwrap();
    assert!(prompts[1].contains("QQQZ"));
}

#[tokio::test]
async fn test_history_from_store_is_not_reordered() {
    let store = MemoryStore::new().with_entry(SEARCH_HISTORY_KEY, r#"["B","A"]"#);
    let f = fixture_with(FakeGenerator::default(), store);

    f.orchestrator.refresh_briefing("A").await.unwrap();
    assert_eq!(
        f.orchestrator.preferences().search_history().await,
        vec!["B".to_string(), "A".to_string()]
    );
}

#[tokio::test]
async fn test_empty_symbol_set_makes_no_request() {
    let f = fixture();

    let count = f.orchestrator.poll_tickers(&[]).await.unwrap();
    assert_eq!(count, 0);
    assert!(f.market.ticker_calls.lock().unwrap().is_empty());

    let state = f.orchestrator.crypto_view(CryptoTab::Market, "").await;
    assert_eq!(state.status, FeedStatus::Ready);
    assert_eq!(state.data.unwrap().len(), 0);
}

#[tokio::test]
async fn test_crypto_poll_merges_watchlist_and_keeps_stale_on_error() {
    let f = fixture();
    f.orchestrator
        .preferences()
        .add_watchlist_symbol("pepe")
        .await
        .unwrap();

    let count = f.orchestrator.poll_crypto().await.unwrap();
    assert_eq!(count, 21);
    {
        let calls = f.market.ticker_calls.lock().unwrap();
        assert_eq!(calls[0].first().map(String::as_str), Some("BTCUSDT"));
        assert!(calls[0].contains(&"PEPEUSDT".to_string()));
    }

    f.market.fail_tickers.store(true, Ordering::SeqCst);
    assert!(f.orchestrator.poll_crypto().await.is_err());

    let state = f.orchestrator.crypto_view(CryptoTab::Favorites, "").await;
    assert_eq!(state.status, FeedStatus::Error);
    assert!(state.error.is_some());
    let favorites = state.data.unwrap();
    assert_eq!(favorites.len(), 6);
    assert!(favorites.iter().any(|t| t.symbol == "PEPEUSDT"));
}

#[tokio::test]
async fn test_stock_poll_uses_admin_and_market_symbols() {
    let f = fixture();
    let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

    let count = f.orchestrator.poll_stocks(at).await;
    assert_eq!(count, 15);

    let state = f.orchestrator.stock_view("nvda").await;
    assert_eq!(state.status, FeedStatus::Ready);
    assert_eq!(state.last_updated, Some(at));
    let rows = state.data.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].symbol, "NVDA");
}

#[tokio::test]
async fn test_dashboard_partial_failure_keeps_other_metrics() {
    let f = fixture();

    // открытый интерес недоступен, остальные метрики приходят
    tokio_test::assert_ok!(f.orchestrator.poll_dashboard().await);
    let first = f.orchestrator.dashboard_state().await;
    let refreshed_at = first.last_updated;
    assert!(refreshed_at.is_some());
    let metrics = first.data.unwrap();
    assert_eq!(metrics.fear_greed.as_ref().unwrap().value, "72");
    assert!(metrics.open_interest.is_none());
    assert_eq!(metrics.btc_ticker.as_ref().unwrap().symbol, "BTCUSDT");

    // все источники недоступны: прежние значения на месте, ошибка записана
    tokio::time::sleep(Duration::from_millis(5)).await;
    f.market.fail_metrics.store(true, Ordering::SeqCst);
    f.market.fail_tickers.store(true, Ordering::SeqCst);
    let result = f.orchestrator.poll_dashboard().await;
    assert!(matches!(result, Err(BriefingError::NoDataSourcesAvailable(_))));

    let state = f.orchestrator.dashboard_state().await;
    assert_eq!(state.status, FeedStatus::Error);
    // ничего не обновилось, время последнего обновления прежнее
    assert_eq!(state.last_updated, refreshed_at);
    let metrics = state.data.unwrap();
    assert_eq!(metrics.fear_greed.unwrap().value, "72");
    assert_eq!(metrics.funding_rate.unwrap().last_funding_rate, "0.0001");
}

#[tokio::test]
async fn test_spawned_pollers_fill_feeds() {
    let f = fixture();
    let pollers = f.orchestrator.spawn_pollers();

    tokio::time::sleep(Duration::from_millis(100)).await;
    for poller in &pollers {
        poller.abort();
    }

    let summaries = f.orchestrator.feed_summaries().await;
    let status = |name: &str| summaries.iter().find(|s| s.name == name).unwrap().status;
    assert_eq!(status("briefing"), FeedStatus::Idle);
    assert_eq!(status("crypto"), FeedStatus::Ready);
    assert_eq!(status("stocks"), FeedStatus::Ready);
    assert_eq!(status("dashboard"), FeedStatus::Ready);
}

#[tokio::test]
async fn test_watchlist_change_restarts_crypto_poll() {
    let mut settings = OrchestratorSettings::from(&default_config().unwrap());
    settings.crypto_poll = Duration::from_secs(3600);
    settings.dashboard_poll = Duration::from_secs(3600);
    let f = fixture_with_settings(FakeGenerator::default(), MemoryStore::new(), settings);

    // запросы дашборда идут по одному символу, здесь нужны только списки тикеров
    let ticker_polls = |market: &FakeMarket| -> Vec<Vec<String>> {
        market
            .ticker_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|symbols| symbols.len() > 1)
            .cloned()
            .collect()
    };

    let pollers = f.orchestrator.spawn_pollers();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let before = ticker_polls(&f.market);
    assert_eq!(before.len(), 1);
    assert!(!before[0].contains(&"PEPEUSDT".to_string()));

    f.orchestrator
        .preferences()
        .add_watchlist_symbol("pepe")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    for poller in &pollers {
        poller.abort();
    }

    let after = ticker_polls(&f.market);
    assert_eq!(after.len(), 2);
    assert!(after[1].contains(&"PEPEUSDT".to_string()));

    let favorites = f.orchestrator.crypto_view(CryptoTab::Favorites, "pepe").await;
    assert_eq!(favorites.data.unwrap().len(), 1);
}

fn app(f: &Fixture) -> axum::Router {
    create_routes(AppState {
        orchestrator: f.orchestrator.clone(),
        share_base_url: "http://localhost:3000/".to_string(),
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_route() {
    let f = fixture();
    let response = app(&f)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_refresh_route_reports_state() {
    let f = fixture();

    let request = Request::builder()
        .method("POST")
        .uri("/api/briefing")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"industry":"Energy"}"#))
        .unwrap();
    let response = app(&f).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["industry"], "Energy");
    assert_eq!(body["status"], "ready");
    assert_eq!(body["data"]["sentiment"]["score"], 70);

    let blank = Request::builder()
        .method("POST")
        .uri("/api/briefing")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"industry":"  "}"#))
        .unwrap();
    let response = app(&f).oneshot(blank).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    f.generator.fail.store(true, Ordering::SeqCst);
    let retry = Request::builder()
        .method("POST")
        .uri("/api/briefing/retry")
        .body(Body::empty())
        .unwrap();
    let response = app(&f).oneshot(retry).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"], BRIEFING_ERROR_MESSAGE);
    assert_eq!(body["data"]["industry"], "Energy");
}

#[tokio::test]
async fn test_share_route_encodes_topic() {
    let f = fixture();
    f.orchestrator.refresh_briefing("AI & Robotics").await.unwrap();

    let response = app(&f)
        .oneshot(
            Request::builder()
                .uri("/api/briefing/share")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["url"], "http://localhost:3000/?topic=AI%20%26%20Robotics");
}

#[tokio::test]
async fn test_watchlist_routes() {
    let f = fixture();

    let add = Request::builder()
        .method("POST")
        .uri("/api/watchlist/add")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"symbol":" wif "}"#))
        .unwrap();
    let response = app(&f).oneshot(add).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().last().unwrap(), "WIFUSDT");

    let toggle = Request::builder()
        .method("POST")
        .uri("/api/watchlist")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"symbol":"WIFUSDT"}"#))
        .unwrap();
    let response = app(&f).oneshot(toggle).await.unwrap();
    let body = body_json(response).await;
    assert!(!body.as_array().unwrap().iter().any(|s| s == "WIFUSDT"));
}

#[tokio::test]
async fn test_admin_config_route_normalizes_lists() {
    let f = fixture();

    let save = Request::builder()
        .method("PUT")
        .uri("/api/admin/config")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"stocks":"nvda, tsla,,nvda","crypto":" btc ,eth"}"#))
        .unwrap();
    let response = app(&f).oneshot(save).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["briefingStocks"], serde_json::json!(["NVDA", "TSLA"]));
    assert_eq!(body["briefingCrypto"], serde_json::json!(["BTC", "ETH"]));
}

#[tokio::test]
async fn test_profile_routes() {
    let f = fixture();

    let login = Request::builder()
        .method("POST")
        .uri("/api/profile")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"id":"u1","name":"Trader","email":"t@example.com"}"#,
        ))
        .unwrap();
    let response = app(&f).oneshot(login).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(f.orchestrator.preferences().profile().await.is_some());

    let logout = Request::builder()
        .method("DELETE")
        .uri("/api/profile")
        .body(Body::empty())
        .unwrap();
    let response = app(&f).oneshot(logout).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(f.orchestrator.preferences().profile().await.is_none());
}

#[tokio::test]
async fn test_briefing_route_with_topic_refreshes_in_background() {
    let f = fixture();

    let response = app(&f)
        .oneshot(
            Request::builder()
                .uri("/api/briefing?topic=Biotech+Stocks")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let state = f.orchestrator.briefing_state().await;
    assert_eq!(state.data.unwrap().industry, "Biotech Stocks");
    assert_eq!(f.generator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_briefing_route_ignores_blank_topic() {
    let f = fixture();

    let response = app(&f)
        .oneshot(
            Request::builder()
                .uri("/api/briefing?topic=%20%20")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "idle");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_digest_route() {
    let f = fixture();
    let digest_request = || {
        Request::builder()
            .uri("/api/briefing/digest")
            .body(Body::empty())
            .unwrap()
    };

    let response = app(&f).oneshot(digest_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    f.orchestrator.refresh_briefing("Energy").await.unwrap();
    let response = app(&f).oneshot(digest_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["industry"], "Energy");
    let text = body["text"].as_str().unwrap();
    assert!(text.starts_with("📅 每日早报 ("));
    assert!(text.contains("😨 恐慌/贪婪: 50 (Neutral)"));
    assert!(text.ends_with("#Crypto #Stocks #Macro #Trading"));
}
