//! Разбор текстового ответа модели в [`Briefing`].
//!
//! Все функции чистые и тотальные: отсутствующая или испорченная секция даёт
//! значение по умолчанию, а не ошибку.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{
    AssetRow, Briefing, FearGreedReading, NewsItem, Sentiment, SentimentKind, Source,
};

pub const EXECUTIVE_SUMMARY: &str = "EXECUTIVE_SUMMARY";
pub const MACRO_SUMMARY: &str = "MACRO_SUMMARY";
pub const FEAR_GREED: &str = "FEAR_GREED";
pub const STOCK_ANALYSIS: &str = "STOCK_ANALYSIS";
pub const CRYPTO_ANALYSIS: &str = "CRYPTO_ANALYSIS";
pub const KEY_TRENDS: &str = "KEY_TRENDS";
pub const SENTIMENT: &str = "SENTIMENT";
pub const DETAILED_NEWS: &str = "DETAILED_NEWS";

pub const NEWS_DELIMITER: &str = "### NEWS_ITEM ###";
pub const MAX_SOURCES: usize = 8;
pub const TIME_RANGE: &str = "Last 24 Hours";

const DEFAULT_SENTIMENT_SCORE: u8 = 50;

static SCORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SENTIMENT_SCORE:\s*(\d+)").expect("valid sentiment score regex"));
static KIND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)SENTIMENT_TYPE:\s*(Positive|Neutral|Negative|Mixed)")
        .expect("valid sentiment type regex")
});
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Title:\s*(.+)").expect("valid title regex"));
static SUMMARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Summary:\s*(.+)").expect("valid summary regex"));
static TAGS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Tags:\s*(.+)").expect("valid tags regex"));

/// Имя секции, если строка является маркером вида `# NAME`.
///
/// Допускается несколько ведущих `#` (модель иногда отдаёт markdown-заголовки),
/// но имя должно занимать остаток строки целиком, поэтому `### NEWS_ITEM ###`
/// маркером не считается.
fn section_marker(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let rest = trimmed.trim_start_matches('#');
    if rest.len() == trimmed.len() {
        return None;
    }
    let name = rest.trim();
    let is_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    is_name.then_some(name)
}

pub fn extract_section(text: &str, section: &str) -> String {
    let mut body = String::new();
    let mut inside = false;

    for line in text.lines() {
        match section_marker(line) {
            Some(_) if inside => break,
            Some(name) if name == section => inside = true,
            Some(_) => {}
            None if inside => {
                body.push_str(line);
                body.push('\n');
            }
            None => {}
        }
    }

    body.trim().to_string()
}

pub fn parse_fear_greed(text: &str) -> FearGreedReading {
    let raw = extract_section(text, FEAR_GREED);
    let mut parts = raw.split('|').map(str::trim);
    let defaults = FearGreedReading::default();

    let value = parts
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or(defaults.value);
    let label = parts
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or(defaults.label);

    FearGreedReading { value, label }
}

/// Строки вида `TICKER | Price | Change | Reason`. Строки, где меньше четырёх
/// полей, молча отбрасываются.
pub fn parse_asset_rows(text: &str, section: &str) -> Vec<AssetRow> {
    extract_section(text, section)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('|').map(str::trim).collect();
            if parts.len() < 4 {
                return None;
            }
            Some(AssetRow {
                ticker: parts[0].to_string(),
                name: parts[0].to_string(),
                price: parts[1].to_string(),
                change: parts[2].to_string(),
                reason: parts[3].to_string(),
            })
        })
        .collect()
}

pub fn parse_key_trends(text: &str) -> Vec<String> {
    extract_section(text, KEY_TRENDS)
        .split("- ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Ищет `SENTIMENT_SCORE:` и `SENTIMENT_TYPE:` по всему документу, а не только
/// внутри секции `SENTIMENT`.
pub fn parse_sentiment(text: &str) -> Sentiment {
    let score = SCORE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            // цифры есть, но число не влезает в u64: считаем максимумом
            m.as_str()
                .parse::<u64>()
                .map(|v| v.min(100) as u8)
                .unwrap_or(100)
        })
        .unwrap_or(DEFAULT_SENTIMENT_SCORE);

    let kind = KIND_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| SentimentKind::from_label(m.as_str()))
        .unwrap_or_default();

    Sentiment { kind, score }
}

/// Стабильный идентификатор новости по заголовку.
///
/// 32-битный полиномиальный хеш (`h * 31 + c`) по UTF-16 единицам, модуль в hex.
pub fn news_id(title: &str) -> String {
    let hash = title.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    });
    format!("{:x}", i64::from(hash).abs())
}

fn capture_line(re: &Regex, chunk: &str) -> Option<String> {
    re.captures(chunk)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

pub fn parse_news_items(text: &str, now: DateTime<Utc>) -> Vec<NewsItem> {
    let timestamp = now.timestamp_millis();

    text.split(NEWS_DELIMITER)
        .filter(|chunk| !chunk.trim().is_empty())
        .filter_map(|chunk| {
            let title = capture_line(&TITLE_RE, chunk)?;
            let summary = capture_line(&SUMMARY_RE, chunk)?;
            let tags = capture_line(&TAGS_RE, chunk)
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            Some(NewsItem {
                id: news_id(&title),
                title,
                summary,
                tags,
                timestamp,
            })
        })
        .collect()
}

pub fn parse_briefing(
    text: &str,
    citations: &[Source],
    industry: &str,
    now: DateTime<Utc>,
) -> Briefing {
    Briefing {
        industry: industry.to_string(),
        date: now.format("%Y-%m-%d").to_string(),
        time_range: TIME_RANGE.to_string(),
        summary: extract_section(text, EXECUTIVE_SUMMARY),
        macro_summary: extract_section(text, MACRO_SUMMARY),
        fear_greed: parse_fear_greed(text),
        stock_analysis: parse_asset_rows(text, STOCK_ANALYSIS),
        crypto_analysis: parse_asset_rows(text, CRYPTO_ANALYSIS),
        key_trends: parse_key_trends(text),
        sentiment: parse_sentiment(text),
        news_items: parse_news_items(text, now),
        sources: citations.iter().take(MAX_SOURCES).cloned().collect(),
        raw_text: text.to_string(),
        created_at: now,
    }
}
