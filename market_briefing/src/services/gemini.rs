use chrono::{DateTime, Datelike, Days, Utc};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AppConfig;
use crate::errors::{BriefingError, Result};
use crate::models::{Generation, Source};

const EMPTY_RESPONSE_TEXT: &str = "No content generated.";
const DEFAULT_SOURCE_TITLE: &str = "Source";
const DEFAULT_SOURCE_URI: &str = "#";

/// Генеративная модель: текст запроса на входе, текст и цитаты на выходе.
#[async_trait::async_trait]
pub trait BriefingGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generation>;
}

fn short_date(date: DateTime<Utc>) -> String {
    format!("{}月{}日", date.month(), date.day())
}

/// Инструкция для модели: английские теги секций, содержимое на китайском.
pub fn build_prompt(industry: &str, stocks: &[String], crypto: &[String], now: DateTime<Utc>) -> String {
    let yesterday = now.checked_sub_days(Days::new(1)).unwrap_or(now);
    let stock_rows: Vec<String> = stocks.iter().map(|s| format!("{} | ... | ... | ...", s)).collect();
    let crypto_rows: Vec<String> = crypto.iter().map(|c| format!("{} | ... | ... | ...", c)).collect();

    format!(
        r####"You are an elite financial analyst preparing a "Morning Briefing" (每日早报) for a professional trader.
Time Window: {from} to {to}.
Language: Simplified Chinese (简体中文).

[TASK 1: DATA GATHERING]
Search for:
1. Macro Market overview (Fed, Inflation, Global Tech Sentiment).
2. Crypto Fear & Greed Index value.
3. Latest prices and specific news for these STOCKS: [{stocks}].
4. Latest prices and specific news for these CRYPTOS: [{crypto}].
5. General high-impact industry news for "{industry}".

[TASK 2: FORMATTING]
Format the output EXACTLY as follows (Keep the # HEADERS in English, write content in Chinese).

# EXECUTIVE_SUMMARY
[A concise paragraph in Chinese summarizing the most important event of the last 24h.]

# MACRO_SUMMARY
[One paragraph in Chinese on macro environment: S&P500/Nasdaq performance, Bond Yields, or Regulatory news.]

# FEAR_GREED
[Value 0-100] | [Label e.g. 极度恐惧]

# STOCK_ANALYSIS
(Format: Ticker | Price | Change% | One sentence analysis in Chinese of why it moved)
{stock_rows}

# CRYPTO_ANALYSIS
(Format: Ticker | Price | Change% | One sentence analysis in Chinese of why it moved)
{crypto_rows}

# KEY_TRENDS
- [Trend 1 in Chinese]
- [Trend 2 in Chinese]
- [Trend 3 in Chinese]

# SENTIMENT
SENTIMENT_TYPE: [Positive/Neutral/Negative/Mixed]
SENTIMENT_SCORE: [0-100]

# DETAILED_NEWS
(Find 5-7 distinct, high-impact news flashes. Use delimiter "### NEWS_ITEM ###").

### NEWS_ITEM ###
Title: [Headline in Chinese]
Summary: [Concise summary in Chinese]
Tags: [Tag1, Tag2]

### NEWS_ITEM ###
Title: [Headline 2]
Summary: [Summary]
Tags: [Tags]
"####,
        from = short_date(yesterday),
        to = short_date(now),
        stocks = stocks.join(", "),
        crypto = crypto.join(", "),
        industry = industry,
        stock_rows = stock_rows.join("\n"),
        crypto_rows = crypto_rows.join("\n"),
    )
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    tools: Vec<Tool>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Serialize)]
struct GoogleSearch {}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize, Default)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize, Default)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Debug, Deserialize, Default)]
struct WebChunk {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

impl GenerateResponse {
    fn into_generation(self) -> Result<Generation> {
        if let Some(error) = self.error {
            return Err(BriefingError::ApiError(format!(
                "Gemini error {}: {}",
                error.code.unwrap_or_default(),
                error.message.unwrap_or_default()
            )));
        }

        let candidate = self.candidates.into_iter().next().unwrap_or_default();

        let text: String = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let text = if text.trim().is_empty() {
            EMPTY_RESPONSE_TEXT.to_string()
        } else {
            text
        };

        let citations = candidate
            .grounding_metadata
            .map(|m| m.grounding_chunks)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|chunk| chunk.web)
            .map(|web| Source {
                title: web
                    .title
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| DEFAULT_SOURCE_TITLE.to_string()),
                uri: web
                    .uri
                    .filter(|u| !u.is_empty())
                    .unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
            })
            .collect();

        Ok(Generation { text, citations })
    }
}

/// Разбор тела ответа `generateContent` в [`Generation`].
pub fn decode_generation(body: &str) -> Result<Generation> {
    let response: GenerateResponse = serde_json::from_str(body)?;
    response.into_generation()
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.gemini_timeout_secs))
            .build()?;
        Ok(GeminiClient {
            client,
            api_url: config.gemini_api_url.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
            api_key: config.gemini_api_key.clone(),
        })
    }
}

#[async_trait::async_trait]
impl BriefingGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(BriefingError::MissingCredential("GEMINI_API_KEY"))?;

        let url = format!("{}/models/{}:generateContent", self.api_url, self.model);
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
            tools: vec![Tool {
                google_search: GoogleSearch {},
            }],
        };

        tracing::info!("Запрос сводки у модели {}", self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(BriefingError::ApiError(format!(
                "Gemini API error: {} - {}",
                status, body
            )));
        }

        let generation = decode_generation(&body)?;
        tracing::info!(
            "Получен ответ модели: {} символов, {} источников",
            generation.text.chars().count(),
            generation.citations.len()
        );
        Ok(generation)
    }
}
