use chrono::{DateTime, Utc};

use crate::models::StockTicker;

// Отображаемые названия для известных тикеров
const STOCK_NAMES: &[(&str, &str)] = &[
    ("SPX", "标普500"),
    ("IXIC", "纳斯达克"),
    ("NVDA", "英伟达"),
    ("TSLA", "特斯拉"),
    ("GOOG", "谷歌"),
    ("AAPL", "苹果"),
    ("MSFT", "微软"),
    ("AMZN", "亚马逊"),
    ("META", "Meta"),
    ("AMD", "AMD"),
    ("COIN", "Coinbase"),
    ("HOOD", "Robinhood"),
    ("MSTR", "MicroStrategy"),
    ("PLTR", "Palantir"),
    ("CRCL", "Circle"),
];

pub fn display_name(symbol: &str) -> String {
    STOCK_NAMES
        .iter()
        .find(|(ticker, _)| *ticker == symbol)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| symbol.to_string())
}

fn base_price(symbol: &str) -> f64 {
    match symbol {
        "NVDA" => 140.0,
        "TSLA" => 350.0,
        "SPX" => 5900.0,
        "IXIC" => 18000.0,
        _ => 100.0 + symbol.chars().count() as f64 * 20.0,
    }
}

fn code_unit(symbol: &str, index: usize) -> f64 {
    symbol.encode_utf16().nth(index).map(f64::from).unwrap_or(0.0)
}

/// Псевдо-живые котировки акций: реального источника нет, значения плавно
/// колеблются вокруг базовой цены и детерминированы по времени.
#[derive(Debug, Clone, Default)]
pub struct MockStockFeed;

impl MockStockFeed {
    pub fn new() -> Self {
        MockStockFeed
    }

    pub fn quotes(&self, symbols: &[String], now: DateTime<Utc>) -> Vec<StockTicker> {
        let time_factor = now.timestamp_millis() as f64 / 10_000.0;

        symbols
            .iter()
            .map(|symbol| {
                let base = base_price(symbol);
                let noise = (time_factor + code_unit(symbol, 0)).sin() * (base * 0.005);
                let change_percent = (time_factor * 0.5 + code_unit(symbol, 1)).sin() * 1.5;

                StockTicker {
                    symbol: symbol.clone(),
                    name: display_name(symbol),
                    price: base + noise,
                    change: noise,
                    change_percent,
                    volume: format!("{:.0}", (noise * 1_000_000.0).abs() + 5_000_000.0),
                }
            })
            .collect()
    }
}
