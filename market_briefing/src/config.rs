use anyhow::Result;
use config::Config;
use std::env;
use std::net::SocketAddr;

use crate::holders::PreferenceDefaults;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AppConfig {
    pub bind_addr: String,
    pub storage_path: String,
    pub log_dir: Option<String>,

    pub gemini_api_url: String,
    pub gemini_model: String,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    pub gemini_timeout_secs: u64,

    pub binance_spot_url: String,
    pub binance_futures_url: String,
    pub binance_futures_data_url: String,
    pub fear_greed_url: String,
    pub proxy_url: Option<String>,
    pub market_timeout_secs: u64,

    pub default_industry: String,
    pub startup_topic: Option<String>,
    pub share_base_url: String,

    pub default_watchlist: Vec<String>,
    pub default_briefing_stocks: Vec<String>,
    pub default_briefing_crypto: Vec<String>,
    pub popular_symbols: Vec<String>,
    pub market_stock_symbols: Vec<String>,
    pub dashboard_symbol: String,
    pub long_short_period: String,

    pub crypto_poll_ms: u64,
    pub stock_poll_ms: u64,
    pub dashboard_poll_secs: u64,
}

impl AppConfig {
    /// Валидация конфигурации
    pub fn validate(&self) -> Result<()> {
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("bind_addr is not a socket address: {}", e))?;

        if self.popular_symbols.is_empty() {
            return Err(anyhow::anyhow!("popular_symbols cannot be empty"));
        }

        if self.dashboard_symbol.trim().is_empty() {
            return Err(anyhow::anyhow!("dashboard_symbol cannot be empty"));
        }

        if self.crypto_poll_ms < 200 || self.stock_poll_ms < 200 {
            return Err(anyhow::anyhow!("ticker poll interval must be at least 200 ms"));
        }

        if self.dashboard_poll_secs == 0 || self.dashboard_poll_secs > 3600 {
            return Err(anyhow::anyhow!("dashboard_poll_secs must be between 1 and 3600"));
        }

        if self.gemini_timeout_secs == 0 || self.market_timeout_secs == 0 {
            return Err(anyhow::anyhow!("request timeouts must be positive"));
        }

        Ok(())
    }

    pub fn preference_defaults(&self) -> PreferenceDefaults {
        PreferenceDefaults {
            watchlist: self.default_watchlist.clone(),
            briefing_stocks: self.default_briefing_stocks.clone(),
            briefing_crypto: self.default_briefing_crypto.clone(),
        }
    }

    /// Ключи, без которых часть функций недоступна. Сообщается в лог после
    /// настройки логирования.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.gemini_api_key.is_none() {
            missing.push("GEMINI_API_KEY");
        }
        missing
    }

    pub fn start_topic(&self) -> String {
        self.startup_topic
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.default_industry)
            .to_string()
    }
}

fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
    let builder = Config::builder()
        .set_default("bind_addr", "0.0.0.0:3000")?
        .set_default("storage_path", "data/preferences.json")?
        .set_default("gemini_api_url", "https://generativelanguage.googleapis.com/v1beta")?
        .set_default("gemini_model", "gemini-2.5-flash")?
        .set_default("gemini_timeout_secs", 120)?
        .set_default("binance_spot_url", "https://api.binance.com/api/v3")?
        .set_default("binance_futures_url", "https://fapi.binance.com/fapi/v1")?
        .set_default("binance_futures_data_url", "https://fapi.binance.com/futures/data")?
        .set_default("fear_greed_url", "https://api.alternative.me/fng/")?
        .set_default("market_timeout_secs", 10)?
        .set_default("default_industry", "Blockchain & Crypto")?
        .set_default("share_base_url", "http://localhost:3000/")?
        .set_default(
            "default_watchlist",
            vec!["BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "DOGEUSDT"],
        )?
        .set_default(
            "default_briefing_stocks",
            vec!["SPX", "IXIC", "NVDA", "TSLA", "GOOG", "CRCL", "HOOD", "COIN"],
        )?
        .set_default("default_briefing_crypto", vec!["BTC", "ETH", "SOL", "BNB", "HYPE"])?
        .set_default(
            "popular_symbols",
            vec![
                "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT", "DOGEUSDT", "ADAUSDT",
                "AVAXUSDT", "TRXUSDT", "DOTUSDT", "MATICUSDT", "LINKUSDT", "LTCUSDT", "BCHUSDT",
                "ATOMUSDT", "UNIUSDT", "FILUSDT", "APTUSDT", "ARBUSDT", "OPUSDT",
            ],
        )?
        .set_default(
            "market_stock_symbols",
            vec!["AAPL", "MSFT", "AMZN", "META", "AMD", "MSTR", "PLTR"],
        )?
        .set_default("dashboard_symbol", "BTCUSDT")?
        .set_default("long_short_period", "5m")?
        .set_default("crypto_poll_ms", 1000)?
        .set_default("stock_poll_ms", 2000)?
        .set_default("dashboard_poll_secs", 60)?;
    Ok(builder)
}

pub fn load_config() -> Result<AppConfig> {
    // Загружаем .env файл
    dotenvy::dotenv().ok();

    let settings = defaults()?
        .add_source(config::File::with_name("config").required(false))
        .add_source(
            config::Environment::with_prefix("MARKET_BRIEFING")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("default_watchlist")
                .with_list_parse_key("default_briefing_stocks")
                .with_list_parse_key("default_briefing_crypto")
                .with_list_parse_key("popular_symbols")
                .with_list_parse_key("market_stock_symbols"),
        )
        .build()?;

    let mut config: AppConfig = settings.try_deserialize()?;

    // Ключ необязателен при старте: без него запросы сводки завершаются ошибкой
    if let Ok(key) = env::var("GEMINI_API_KEY") {
        if !key.trim().is_empty() {
            config.gemini_api_key = Some(key);
        }
    }

    config.validate()?;

    Ok(config)
}

/// Конфигурация по умолчанию без файлов и окружения (тесты).
pub fn default_config() -> Result<AppConfig> {
    Ok(defaults()?.build()?.try_deserialize()?)
}
