use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::config::AppConfig;
use crate::errors::{BriefingError, Result};
use crate::models::{CryptoTicker, FearGreedIndex, FundingRate, LongShortRatio, OpenInterest};

/// Источники рыночных данных. Все операции только читают и идемпотентны.
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn crypto_tickers(&self, symbols: &[String]) -> Result<Vec<CryptoTicker>>;

    async fn fear_greed_index(&self) -> Result<Option<FearGreedIndex>>;

    async fn long_short_ratio(&self, symbol: &str, period: &str) -> Result<Option<LongShortRatio>>;

    async fn funding_rate(&self, symbol: &str) -> Result<Option<FundingRate>>;

    async fn open_interest(&self, symbol: &str) -> Result<Option<OpenInterest>>;
}

/// Binance отвечает объектом на один символ и массивом на несколько.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Deserialize)]
struct FearGreedEnvelope {
    #[serde(default)]
    data: Vec<FearGreedIndex>,
}

pub fn decode_tickers(body: &str) -> Result<Vec<CryptoTicker>> {
    let parsed: OneOrMany<CryptoTicker> = serde_json::from_str(body)?;
    Ok(parsed.into_vec())
}

pub fn decode_fear_greed(body: &str) -> Result<Option<FearGreedIndex>> {
    let envelope: FearGreedEnvelope = serde_json::from_str(body)?;
    Ok(envelope.data.into_iter().next())
}

/// Параметр `symbols` для `/ticker/24hr`: JSON-массив в верхнем регистре.
pub fn symbols_param(symbols: &[String]) -> String {
    let upper: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
    let json = serde_json::to_string(&upper).unwrap_or_else(|_| "[]".to_string());
    urlencoding::encode(&json).into_owned()
}

#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    spot_url: String,
    futures_url: String,
    futures_data_url: String,
    fear_greed_url: String,
    proxy_url: Option<String>,
}

impl BinanceClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.market_timeout_secs))
            .build()?;
        Ok(BinanceClient {
            client,
            spot_url: config.binance_spot_url.trim_end_matches('/').to_string(),
            futures_url: config.binance_futures_url.trim_end_matches('/').to_string(),
            futures_data_url: config.binance_futures_data_url.trim_end_matches('/').to_string(),
            fear_greed_url: config.fear_greed_url.clone(),
            proxy_url: config.proxy_url.clone().filter(|p| !p.trim().is_empty()),
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Неизвестная ошибка".to_string());
            return Err(BriefingError::ApiError(format!(
                "{} - {}",
                status, error_text
            )));
        }

        Ok(response.text().await?)
    }

    /// Прямой запрос, при неудаче повтор через прокси (если он настроен).
    async fn get_with_fallback(&self, url: &str) -> Result<String> {
        match self.get_text(url).await {
            Ok(body) => return Ok(body),
            Err(e) => match &self.proxy_url {
                Some(_) => tracing::warn!("Прямой запрос {} не удался: {}, пробуем прокси", url, e),
                None => return Err(e),
            },
        }

        let proxy = self.proxy_url.as_deref().unwrap_or_default();
        let proxied = format!("{}{}", proxy, urlencoding::encode(url));
        self.get_text(&proxied).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_with_fallback(url).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl MarketDataSource for BinanceClient {
    async fn crypto_tickers(&self, symbols: &[String]) -> Result<Vec<CryptoTicker>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/ticker/24hr?symbols={}", self.spot_url, symbols_param(symbols));
        tracing::debug!("URL: {}", url);

        let body = self.get_with_fallback(&url).await?;
        decode_tickers(&body)
    }

    async fn fear_greed_index(&self) -> Result<Option<FearGreedIndex>> {
        let url = format!("{}?limit=1", self.fear_greed_url);
        let body = self.get_text(&url).await?;
        decode_fear_greed(&body)
    }

    async fn long_short_ratio(&self, symbol: &str, period: &str) -> Result<Option<LongShortRatio>> {
        let url = format!(
            "{}/globalLongShortAccountRatio?symbol={}&period={}&limit=1",
            self.futures_data_url,
            urlencoding::encode(symbol),
            urlencoding::encode(period)
        );
        let ratios: Vec<LongShortRatio> = self.get_json(&url).await?;
        Ok(ratios.into_iter().next())
    }

    async fn funding_rate(&self, symbol: &str) -> Result<Option<FundingRate>> {
        let url = format!(
            "{}/premiumIndex?symbol={}",
            self.futures_url,
            urlencoding::encode(symbol)
        );
        Ok(Some(self.get_json(&url).await?))
    }

    async fn open_interest(&self, symbol: &str) -> Result<Option<OpenInterest>> {
        let url = format!(
            "{}/openInterest?symbol={}",
            self.futures_url,
            urlencoding::encode(symbol)
        );
        Ok(Some(self.get_json(&url).await?))
    }
}
