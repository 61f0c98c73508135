use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ссылка на источник, которой модель подкрепила ответ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub uri: String,
}

/// Ответ генеративной модели: текст и отдельный список цитат.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub text: String,
    pub citations: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub timestamp: i64, // миллисекунды
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRow {
    pub ticker: String,
    pub name: String,
    pub price: String,
    pub change: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FearGreedReading {
    pub value: String,
    pub label: String,
}

impl Default for FearGreedReading {
    fn default() -> Self {
        FearGreedReading {
            value: "50".to_string(),
            label: "Neutral".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SentimentKind {
    Positive,
    #[default]
    Neutral,
    Negative,
    Mixed,
}

impl SentimentKind {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "positive" => Some(SentimentKind::Positive),
            "neutral" => Some(SentimentKind::Neutral),
            "negative" => Some(SentimentKind::Negative),
            "mixed" => Some(SentimentKind::Mixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentiment {
    pub kind: SentimentKind,
    pub score: u8, // 0..=100
}

impl Default for Sentiment {
    fn default() -> Self {
        Sentiment {
            kind: SentimentKind::Neutral,
            score: 50,
        }
    }
}

/// Нормализованный ответ модели. Не изменяется после сборки,
/// следующее обновление заменяет его целиком.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Briefing {
    pub industry: String,
    pub date: String,
    pub time_range: String,
    pub summary: String,
    pub macro_summary: String,
    pub fear_greed: FearGreedReading,
    pub stock_analysis: Vec<AssetRow>,
    pub crypto_analysis: Vec<AssetRow>,
    pub key_trends: Vec<String>,
    pub sentiment: Sentiment,
    pub news_items: Vec<NewsItem>,
    pub sources: Vec<Source>,
    pub raw_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoTicker {
    pub symbol: String,
    pub price_change_percent: String,
    pub last_price: String,
    pub volume: String,
    pub quote_volume: String,
    pub high_price: String,
    pub low_price: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockTicker {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FearGreedIndex {
    pub value: String,
    pub value_classification: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub time_until_update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongShortRatio {
    pub symbol: String,
    pub long_short_ratio: String,
    pub long_account: String,
    pub short_account: String,
    #[serde(deserialize_with = "int_or_string")]
    pub timestamp: i64,
}

// Binance отдаёт метки времени то числом, то строкой.
fn int_or_string<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(value) => Ok(value),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRate {
    pub symbol: String,
    pub last_funding_rate: String,
    #[serde(default)]
    pub mark_price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInterest {
    pub symbol: String,
    pub open_interest: String,
}

/// Сводка для панели метрик. Каждое поле обновляется независимо.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub fear_greed: Option<FearGreedIndex>,
    pub long_short_ratio: Option<LongShortRatio>,
    pub funding_rate: Option<FundingRate>,
    pub open_interest: Option<OpenInterest>,
    pub btc_ticker: Option<CryptoTicker>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptoTab {
    #[default]
    Market,
    Favorites,
}
