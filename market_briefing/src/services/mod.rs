pub mod gemini;
pub mod market;
pub mod orchestrator;
pub mod stocks;

pub use gemini::{BriefingGenerator, GeminiClient};
pub use market::{BinanceClient, MarketDataSource};
pub use orchestrator::{OrchestratorSettings, RefreshOrchestrator, RefreshOutcome};
pub use stocks::MockStockFeed;
