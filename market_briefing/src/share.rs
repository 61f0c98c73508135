//! Всё, чем сводкой делятся наружу: ссылка с темой и текст для соцсетей.

use chrono::{DateTime, Datelike, Utc};

use crate::models::{AssetRow, Briefing};

pub const TOPIC_PARAM: &str = "topic";
pub const DIGEST_TRENDS: usize = 3;
pub const DIGEST_HASHTAGS: &str = "#Crypto #Stocks #Macro #Trading";

/// `{base}?topic=<тема>`, тема кодируется целиком.
pub fn share_url(base: &str, topic: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}{}={}",
        base,
        separator,
        TOPIC_PARAM,
        urlencoding::encode(topic)
    )
}

fn asset_line(row: &AssetRow) -> String {
    format!("${}: {} ({}) - {}\n", row.ticker, row.price, row.change, row.reason)
}

/// Короткий текст сводки для публикации: дата, макро, индекс страха и
/// жадности, строки по акциям и криптовалютам, первые три тренда и хештеги.
pub fn briefing_digest(briefing: &Briefing, now: DateTime<Utc>) -> String {
    let mut digest = format!("📅 每日早报 ({}月{}日)\n\n", now.month(), now.day());

    digest.push_str(&format!("🌍 宏观市场\n{}\n\n", briefing.macro_summary));
    digest.push_str(&format!(
        "😨 恐慌/贪婪: {} ({})\n\n",
        briefing.fear_greed.value, briefing.fear_greed.label
    ));

    digest.push_str("📉 核心美股\n");
    for row in &briefing.stock_analysis {
        digest.push_str(&asset_line(row));
    }

    digest.push_str("\n💎 加密货币\n");
    for row in &briefing.crypto_analysis {
        digest.push_str(&asset_line(row));
    }

    digest.push_str("\n💡 关键趋势\n");
    for trend in briefing.key_trends.iter().take(DIGEST_TRENDS) {
        digest.push_str(&format!("• {}\n", trend));
    }

    digest.push('\n');
    digest.push_str(DIGEST_HASHTAGS);
    digest
}
