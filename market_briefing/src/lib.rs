pub mod config;
pub mod errors;
pub mod holders;
pub mod models;
pub mod parser;
pub mod routers;
pub mod services;
pub mod share;
pub mod storage;

pub use config::{load_config, AppConfig};
pub use errors::{BriefingError, Result};
pub use holders::{FeedHolder, FeedStatus, PreferencesHolder, RefreshState};
pub use models::{AssetRow, Briefing, CryptoTicker, NewsItem, Source, StockTicker};
pub use services::{RefreshOrchestrator, RefreshOutcome};
pub use storage::{JsonFileStore, MemoryStore, Persistence};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: RefreshOrchestrator,
    pub share_base_url: String,
}
