use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::errors::Result;
use crate::models::{NewsItem, UserProfile};
use crate::storage::Persistence;

pub const SEARCH_HISTORY_KEY: &str = "searchHistory";
pub const BOOKMARKS_KEY: &str = "bookmarks";
pub const WATCHLIST_KEY: &str = "cryptoWatchlist";
pub const PROFILE_KEY: &str = "userProfile";
pub const BRIEFING_STOCKS_KEY: &str = "briefingStocks";
pub const BRIEFING_CRYPTO_KEY: &str = "briefingCrypto";

pub const MAX_SEARCH_HISTORY: usize = 8;

/// Значения по умолчанию для ключей, которых нет в хранилище.
#[derive(Debug, Clone)]
pub struct PreferenceDefaults {
    pub watchlist: Vec<String>,
    pub briefing_stocks: Vec<String>,
    pub briefing_crypto: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub search_history: Vec<String>,
    pub bookmarks: Vec<NewsItem>,
    pub watchlist: Vec<String>,
    pub briefing_stocks: Vec<String>,
    pub briefing_crypto: Vec<String>,
    pub profile: Option<UserProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminConfig {
    pub briefing_stocks: Vec<String>,
    pub briefing_crypto: Vec<String>,
}

/// Список тикеров из строки через запятую: trim, верхний регистр, без пустых,
/// повторы отбрасываются (остаётся первое вхождение).
pub fn normalize_ticker_list(input: &str) -> Vec<String> {
    let mut tickers: Vec<String> = Vec::new();
    for ticker in input
        .split(',')
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
    {
        if !tickers.contains(&ticker) {
            tickers.push(ticker);
        }
    }
    tickers
}

/// `sol` → `SOLUSDT`; пары к USDT и BTC оставляются как есть.
pub fn normalize_watchlist_symbol(input: &str) -> Option<String> {
    let formatted = input.trim().to_uppercase();
    if formatted.is_empty() {
        return None;
    }
    if formatted.ends_with("USDT") || formatted.ends_with("BTC") {
        Some(formatted)
    } else {
        Some(format!("{}USDT", formatted))
    }
}

fn read_key<T: DeserializeOwned>(store: &dyn Persistence, key: &str) -> Option<T> {
    let raw = match store.get(key) {
        Ok(raw) => raw?,
        Err(e) => {
            tracing::warn!("Не удалось прочитать ключ {}: {}", key, e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ключ {} содержит некорректные данные, используем значение по умолчанию: {}", key, e);
            None
        }
    }
}

fn write_key<T: Serialize + ?Sized>(store: &dyn Persistence, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// Пользовательские коллекции. Читаются один раз при старте, каждое изменение
/// сразу записывается в хранилище, и только после успешной записи попадает в
/// память.
#[derive(Clone)]
pub struct PreferencesHolder {
    inner: Arc<Mutex<Preferences>>,
    store: Arc<dyn Persistence>,
    watchlist_tx: Arc<watch::Sender<Vec<String>>>,
}

impl PreferencesHolder {
    pub fn load(store: Arc<dyn Persistence>, defaults: &PreferenceDefaults) -> Self {
        let prefs = Preferences {
            search_history: read_key(store.as_ref(), SEARCH_HISTORY_KEY).unwrap_or_default(),
            bookmarks: read_key(store.as_ref(), BOOKMARKS_KEY).unwrap_or_default(),
            watchlist: read_key(store.as_ref(), WATCHLIST_KEY)
                .unwrap_or_else(|| defaults.watchlist.clone()),
            briefing_stocks: read_key(store.as_ref(), BRIEFING_STOCKS_KEY)
                .unwrap_or_else(|| defaults.briefing_stocks.clone()),
            briefing_crypto: read_key(store.as_ref(), BRIEFING_CRYPTO_KEY)
                .unwrap_or_else(|| defaults.briefing_crypto.clone()),
            profile: read_key(store.as_ref(), PROFILE_KEY),
        };

        tracing::info!(
            "Загружены настройки: история {}, закладки {}, избранное {}",
            prefs.search_history.len(),
            prefs.bookmarks.len(),
            prefs.watchlist.len()
        );

        let (watchlist_tx, _) = watch::channel(prefs.watchlist.clone());
        PreferencesHolder {
            inner: Arc::new(Mutex::new(prefs)),
            store,
            watchlist_tx: Arc::new(watchlist_tx),
        }
    }

    pub async fn get(&self) -> Preferences {
        self.inner.lock().await.clone()
    }

    pub async fn search_history(&self) -> Vec<String> {
        self.inner.lock().await.search_history.clone()
    }

    pub async fn bookmarks(&self) -> Vec<NewsItem> {
        self.inner.lock().await.bookmarks.clone()
    }

    pub async fn watchlist(&self) -> Vec<String> {
        self.inner.lock().await.watchlist.clone()
    }

    pub async fn profile(&self) -> Option<UserProfile> {
        self.inner.lock().await.profile.clone()
    }

    pub async fn admin_config(&self) -> AdminConfig {
        let prefs = self.inner.lock().await;
        AdminConfig {
            briefing_stocks: prefs.briefing_stocks.clone(),
            briefing_crypto: prefs.briefing_crypto.clone(),
        }
    }

    /// Подписка на изменения избранного (для перезапуска опроса тикеров).
    pub fn subscribe_watchlist(&self) -> watch::Receiver<Vec<String>> {
        self.watchlist_tx.subscribe()
    }

    /// Новейшие сверху, не больше восьми; уже известная тема не переставляется.
    pub async fn record_search(&self, topic: &str) -> Result<Vec<String>> {
        let mut prefs = self.inner.lock().await;
        if prefs.search_history.iter().any(|t| t == topic) {
            return Ok(prefs.search_history.clone());
        }

        let mut history = Vec::with_capacity(MAX_SEARCH_HISTORY);
        history.push(topic.to_string());
        history.extend(prefs.search_history.iter().cloned());
        history.truncate(MAX_SEARCH_HISTORY);

        write_key(self.store.as_ref(), SEARCH_HISTORY_KEY, &history)?;
        prefs.search_history = history.clone();
        Ok(history)
    }

    pub async fn is_bookmarked(&self, id: &str) -> bool {
        self.inner.lock().await.bookmarks.iter().any(|b| b.id == id)
    }

    pub async fn toggle_bookmark(&self, item: NewsItem) -> Result<Vec<NewsItem>> {
        let mut prefs = self.inner.lock().await;
        let bookmarks: Vec<NewsItem> = if prefs.bookmarks.iter().any(|b| b.id == item.id) {
            prefs
                .bookmarks
                .iter()
                .filter(|b| b.id != item.id)
                .cloned()
                .collect()
        } else {
            let mut next = prefs.bookmarks.clone();
            next.push(item);
            next
        };

        write_key(self.store.as_ref(), BOOKMARKS_KEY, &bookmarks)?;
        prefs.bookmarks = bookmarks.clone();
        Ok(bookmarks)
    }

    pub async fn toggle_watchlist(&self, symbol: &str) -> Result<Vec<String>> {
        let mut prefs = self.inner.lock().await;
        let watchlist: Vec<String> = if prefs.watchlist.iter().any(|s| s == symbol) {
            prefs
                .watchlist
                .iter()
                .filter(|s| *s != symbol)
                .cloned()
                .collect()
        } else {
            let mut next = prefs.watchlist.clone();
            next.push(symbol.to_string());
            next
        };

        self.commit_watchlist(&mut prefs, watchlist)
    }

    pub async fn add_watchlist_symbol(&self, input: &str) -> Result<Vec<String>> {
        let mut prefs = self.inner.lock().await;
        let symbol = match normalize_watchlist_symbol(input) {
            Some(symbol) => symbol,
            None => return Ok(prefs.watchlist.clone()),
        };
        if prefs.watchlist.contains(&symbol) {
            return Ok(prefs.watchlist.clone());
        }

        let mut watchlist = prefs.watchlist.clone();
        watchlist.push(symbol);
        self.commit_watchlist(&mut prefs, watchlist)
    }

    fn commit_watchlist(&self, prefs: &mut Preferences, watchlist: Vec<String>) -> Result<Vec<String>> {
        write_key(self.store.as_ref(), WATCHLIST_KEY, &watchlist)?;
        prefs.watchlist = watchlist.clone();
        self.watchlist_tx.send_replace(watchlist.clone());
        Ok(watchlist)
    }

    /// Вступает в силу со следующего обновления сводки.
    pub async fn save_admin_config(&self, stocks_text: &str, crypto_text: &str) -> Result<AdminConfig> {
        let config = AdminConfig {
            briefing_stocks: normalize_ticker_list(stocks_text),
            briefing_crypto: normalize_ticker_list(crypto_text),
        };

        let mut prefs = self.inner.lock().await;
        write_key(self.store.as_ref(), BRIEFING_STOCKS_KEY, &config.briefing_stocks)?;
        write_key(self.store.as_ref(), BRIEFING_CRYPTO_KEY, &config.briefing_crypto)?;
        prefs.briefing_stocks = config.briefing_stocks.clone();
        prefs.briefing_crypto = config.briefing_crypto.clone();

        tracing::info!(
            "Сохранены списки сводки: {} акций, {} криптоактивов",
            config.briefing_stocks.len(),
            config.briefing_crypto.len()
        );
        Ok(config)
    }

    pub async fn login(&self, profile: UserProfile) -> Result<()> {
        let mut prefs = self.inner.lock().await;
        write_key(self.store.as_ref(), PROFILE_KEY, &profile)?;
        prefs.profile = Some(profile);
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        let mut prefs = self.inner.lock().await;
        self.store.remove(PROFILE_KEY)?;
        prefs.profile = None;
        Ok(())
    }
}
