use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::AppConfig;
use crate::errors::{BriefingError, Result};
use crate::holders::{FeedHolder, FeedStatus, PreferencesHolder, RefreshState};
use crate::models::{Briefing, CryptoTab, CryptoTicker, DashboardMetrics, StockTicker};
use crate::parser::parse_briefing;
use crate::services::gemini::{build_prompt, BriefingGenerator};
use crate::services::market::MarketDataSource;
use crate::services::stocks::MockStockFeed;

/// Сообщение пользователю при любой ошибке получения сводки.
pub const BRIEFING_ERROR_MESSAGE: &str = "无法获取早报数据，请检查网络或 API Key。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied,
    /// Ответ пришёл, но к этому времени уже применён более свежий.
    Stale,
    /// Пустой запрос, ничего не отправлялось.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub popular_symbols: Vec<String>,
    pub market_stock_symbols: Vec<String>,
    pub dashboard_symbol: String,
    pub long_short_period: String,
    pub crypto_poll: Duration,
    pub stock_poll: Duration,
    pub dashboard_poll: Duration,
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(config: &AppConfig) -> Self {
        OrchestratorSettings {
            popular_symbols: config.popular_symbols.clone(),
            market_stock_symbols: config.market_stock_symbols.clone(),
            dashboard_symbol: config.dashboard_symbol.clone(),
            long_short_period: config.long_short_period.clone(),
            crypto_poll: Duration::from_millis(config.crypto_poll_ms),
            stock_poll: Duration::from_millis(config.stock_poll_ms),
            dashboard_poll: Duration::from_secs(config.dashboard_poll_secs),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSummary {
    pub name: &'static str,
    pub status: FeedStatus,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

const DASHBOARD_METRICS: usize = 5;

/// Ошибка метрики уходит в `failures`, успешный ответ возвращается как есть.
fn settle<T>(name: &str, result: Result<Option<T>>, failures: &mut Vec<String>) -> Option<Option<T>> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            failures.push(format!("{}: {}", name, e));
            None
        }
    }
}

/// Объединение без повторов, порядок первого вхождения.
pub fn merge_symbols(first: &[String], second: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(first.len() + second.len());
    for symbol in first.iter().chain(second.iter()) {
        if !merged.contains(symbol) {
            merged.push(symbol.clone());
        }
    }
    merged
}

fn volume(ticker: &CryptoTicker) -> f64 {
    ticker.quote_volume.parse::<f64>().unwrap_or(0.0)
}

/// Рынок: всё, отсортировано по обороту; избранное: только из списка, порядок
/// как пришёл. Фильтр ищет подстроку в символе без учёта регистра.
pub fn select_crypto_tickers(
    tickers: &[CryptoTicker],
    watchlist: &[String],
    tab: CryptoTab,
    filter: &str,
) -> Vec<CryptoTicker> {
    let needle = filter.trim().to_lowercase();
    let mut selected: Vec<CryptoTicker> = tickers
        .iter()
        .filter(|t| t.symbol.to_lowercase().contains(&needle))
        .filter(|t| tab == CryptoTab::Market || watchlist.contains(&t.symbol))
        .cloned()
        .collect();

    if tab == CryptoTab::Market {
        selected.sort_by(|a, b| volume(b).partial_cmp(&volume(a)).unwrap_or(Ordering::Equal));
    }
    selected
}

pub fn select_stock_tickers(tickers: &[StockTicker], filter: &str) -> Vec<StockTicker> {
    let needle = filter.trim().to_lowercase();
    tickers
        .iter()
        .filter(|t| t.symbol.to_lowercase().contains(&needle) || t.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Решает, когда обновлять каждый источник, и хранит их состояние.
#[derive(Clone)]
pub struct RefreshOrchestrator {
    generator: Arc<dyn BriefingGenerator>,
    market: Arc<dyn MarketDataSource>,
    stock_source: MockStockFeed,
    preferences: PreferencesHolder,
    briefing: FeedHolder<Briefing>,
    crypto: FeedHolder<Vec<CryptoTicker>>,
    stocks: FeedHolder<Vec<StockTicker>>,
    dashboard: FeedHolder<DashboardMetrics>,
    current_industry: Arc<Mutex<String>>,
    settings: OrchestratorSettings,
}

impl RefreshOrchestrator {
    pub fn new(
        generator: Arc<dyn BriefingGenerator>,
        market: Arc<dyn MarketDataSource>,
        preferences: PreferencesHolder,
        settings: OrchestratorSettings,
        initial_industry: &str,
    ) -> Self {
        RefreshOrchestrator {
            generator,
            market,
            stock_source: MockStockFeed::new(),
            preferences,
            briefing: FeedHolder::new("briefing"),
            crypto: FeedHolder::new("crypto"),
            stocks: FeedHolder::new("stocks"),
            dashboard: FeedHolder::new("dashboard"),
            current_industry: Arc::new(Mutex::new(initial_industry.to_string())),
            settings,
        }
    }

    pub fn preferences(&self) -> &PreferencesHolder {
        &self.preferences
    }

    pub async fn current_industry(&self) -> String {
        self.current_industry.lock().await.clone()
    }

    pub async fn refresh_briefing(&self, industry: &str) -> Result<RefreshOutcome> {
        let industry = industry.trim();
        if industry.is_empty() {
            tracing::debug!("Пустой запрос сводки пропущен");
            return Ok(RefreshOutcome::Skipped);
        }

        {
            let mut current = self.current_industry.lock().await;
            *current = industry.to_string();
        }

        // Списки фиксируются на момент запроса, сохранение настроек не влияет на текущий запрос
        let admin = self.preferences.admin_config().await;
        let token = self.briefing.begin().await;

        tracing::info!("Обновление сводки для \"{}\"", industry);
        let prompt = build_prompt(
            industry,
            &admin.briefing_stocks,
            &admin.briefing_crypto,
            Utc::now(),
        );

        let generation = match self.generator.generate(&prompt).await {
            Ok(generation) => generation,
            Err(e) => {
                tracing::error!("Ошибка получения сводки для \"{}\": {}", industry, e);
                self.briefing.fail(token, BRIEFING_ERROR_MESSAGE).await;
                return Err(e);
            }
        };

        let now = Utc::now();
        let briefing = parse_briefing(&generation.text, &generation.citations, industry, now);
        tracing::info!(
            "Сводка разобрана: {} новостей, {} акций, {} криптоактивов",
            briefing.news_items.len(),
            briefing.stock_analysis.len(),
            briefing.crypto_analysis.len()
        );

        let applied = self.briefing.complete(token, briefing, now).await;

        if let Err(e) = self.preferences.record_search(industry).await {
            tracing::warn!("Не удалось сохранить историю поиска: {}", e);
        }

        Ok(if applied {
            RefreshOutcome::Applied
        } else {
            RefreshOutcome::Stale
        })
    }

    pub async fn retry_briefing(&self) -> Result<RefreshOutcome> {
        let industry = self.current_industry().await;
        self.refresh_briefing(&industry).await
    }

    pub async fn briefing_state(&self) -> RefreshState<Briefing> {
        self.briefing.snapshot().await
    }

    /// Популярные пары плюс избранное пользователя.
    pub async fn crypto_symbols(&self) -> Vec<String> {
        let watchlist = self.preferences.watchlist().await;
        merge_symbols(&self.settings.popular_symbols, &watchlist)
    }

    pub async fn poll_crypto(&self) -> Result<usize> {
        let symbols = self.crypto_symbols().await;
        self.poll_tickers(&symbols).await
    }

    /// Пустой набор символов даёт пустой результат без запроса. При ошибке
    /// прежние данные остаются на месте.
    pub async fn poll_tickers(&self, symbols: &[String]) -> Result<usize> {
        let token = self.crypto.begin().await;

        if symbols.is_empty() {
            self.crypto.complete(token, Vec::new(), Utc::now()).await;
            return Ok(0);
        }

        match self.market.crypto_tickers(symbols).await {
            Ok(tickers) => {
                let count = tickers.len();
                self.crypto.complete(token, tickers, Utc::now()).await;
                tracing::debug!("Получено {} тикеров", count);
                Ok(count)
            }
            Err(e) => {
                tracing::warn!("Не удалось обновить тикеры: {}", e);
                self.crypto.fail(token, e.to_string()).await;
                Err(e)
            }
        }
    }

    pub async fn stock_symbols(&self) -> Vec<String> {
        let admin = self.preferences.admin_config().await;
        merge_symbols(&admin.briefing_stocks, &self.settings.market_stock_symbols)
    }

    pub async fn poll_stocks(&self, now: DateTime<Utc>) -> usize {
        let symbols = self.stock_symbols().await;
        let token = self.stocks.begin().await;
        let quotes = self.stock_source.quotes(&symbols, now);
        let count = quotes.len();
        self.stocks.complete(token, quotes, now).await;
        count
    }

    /// Метрики запрашиваются параллельно, каждая заменяется только при успехе.
    pub async fn poll_dashboard(&self) -> Result<()> {
        let token = self.dashboard.begin().await;
        let symbol = self.settings.dashboard_symbol.clone();
        let period = self.settings.long_short_period.clone();
        let symbols = vec![symbol.clone()];

        let (fear_greed, long_short, funding, open_interest, tickers) = futures::join!(
            self.market.fear_greed_index(),
            self.market.long_short_ratio(&symbol, &period),
            self.market.funding_rate(&symbol),
            self.market.open_interest(&symbol),
            self.market.crypto_tickers(&symbols),
        );

        let mut failures: Vec<String> = Vec::new();
        let fear_greed = settle("fear_greed", fear_greed, &mut failures);
        let long_short = settle("long_short_ratio", long_short, &mut failures);
        let funding = settle("funding_rate", funding, &mut failures);
        let open_interest = settle("open_interest", open_interest, &mut failures);
        let ticker = settle("ticker", tickers.map(|t| t.into_iter().next()), &mut failures);

        if failures.len() == DASHBOARD_METRICS {
            let message = failures.join("; ");
            tracing::warn!("Ни одна метрика не обновлена: {}", message);
            self.dashboard.fail(token, message.clone()).await;
            return Err(BriefingError::NoDataSourcesAvailable(message));
        }

        self.dashboard
            .update(token, Utc::now(), |slot| {
                let metrics = slot.get_or_insert_with(DashboardMetrics::default);
                if let Some(value) = fear_greed.flatten() {
                    metrics.fear_greed = Some(value);
                }
                if let Some(value) = long_short.flatten() {
                    metrics.long_short_ratio = Some(value);
                }
                if let Some(value) = funding.flatten() {
                    metrics.funding_rate = Some(value);
                }
                if let Some(value) = open_interest.flatten() {
                    metrics.open_interest = Some(value);
                }
                if let Some(value) = ticker.flatten() {
                    metrics.btc_ticker = Some(value);
                }
            })
            .await;

        if !failures.is_empty() {
            tracing::warn!("Часть метрик не обновлена: {}", failures.join("; "));
        }
        Ok(())
    }

    pub async fn crypto_view(&self, tab: CryptoTab, filter: &str) -> RefreshState<Vec<CryptoTicker>> {
        let mut state = self.crypto.snapshot().await;
        let watchlist = self.preferences.watchlist().await;
        state.data = state
            .data
            .map(|tickers| select_crypto_tickers(&tickers, &watchlist, tab, filter));
        state
    }

    pub async fn stock_view(&self, filter: &str) -> RefreshState<Vec<StockTicker>> {
        let mut state = self.stocks.snapshot().await;
        state.data = state.data.map(|tickers| select_stock_tickers(&tickers, filter));
        state
    }

    pub async fn dashboard_state(&self) -> RefreshState<DashboardMetrics> {
        self.dashboard.snapshot().await
    }

    pub async fn feed_summaries(&self) -> Vec<FeedSummary> {
        let briefing = self.briefing.snapshot().await;
        let crypto = self.crypto.snapshot().await;
        let stocks = self.stocks.snapshot().await;
        let dashboard = self.dashboard.snapshot().await;

        vec![
            FeedSummary {
                name: self.briefing.name(),
                status: briefing.status,
                last_updated: briefing.last_updated,
                error: briefing.error,
            },
            FeedSummary {
                name: self.crypto.name(),
                status: crypto.status,
                last_updated: crypto.last_updated,
                error: crypto.error,
            },
            FeedSummary {
                name: self.stocks.name(),
                status: stocks.status,
                last_updated: stocks.last_updated,
                error: stocks.error,
            },
            FeedSummary {
                name: self.dashboard.name(),
                status: dashboard.status,
                last_updated: dashboard.last_updated,
                error: dashboard.error,
            },
        ]
    }

    /// Запускает фоновые опросы. Каждый цикл дожидается своего запроса,
    /// пропущенные тики отбрасываются.
    pub fn spawn_pollers(&self) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().run_crypto_poller()),
            tokio::spawn(self.clone().run_stock_poller()),
            tokio::spawn(self.clone().run_dashboard_poller()),
        ]
    }

    async fn run_crypto_poller(self) {
        let mut watchlist_rx = self.preferences.subscribe_watchlist();
        let mut ticker = interval(self.settings.crypto_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = watchlist_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    tracing::info!("Избранное изменилось, перезапуск опроса тикеров");
                    ticker.reset();
                }
            }

            let watchlist = watchlist_rx.borrow().clone();
            let symbols = merge_symbols(&self.settings.popular_symbols, &watchlist);
            // ошибка уже записана в состояние источника
            let _ = self.poll_tickers(&symbols).await;
        }
    }

    async fn run_stock_poller(self) {
        let mut ticker = interval(self.settings.stock_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.poll_stocks(Utc::now()).await;
        }
    }

    async fn run_dashboard_poller(self) {
        let mut ticker = interval(self.settings.dashboard_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let _ = self.poll_dashboard().await;
        }
    }
}
