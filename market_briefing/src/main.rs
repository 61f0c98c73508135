use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use market_briefing::routers::create_routes;
use market_briefing::services::{BinanceClient, GeminiClient, OrchestratorSettings};
use market_briefing::{load_config, AppState, JsonFileStore, PreferencesHolder, RefreshOrchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    // Структурированное логирование: консоль и, если задан каталог, JSON-файлы по дням
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_briefing=info,warn"));

    let (file_layer, _guard) = match config.log_dir.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "market_briefing.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true))
        .with(file_layer)
        .init();

    for key in config.missing_credentials() {
        tracing::warn!("{} не задан, сводка будет недоступна", key);
    }

    let store = Arc::new(JsonFileStore::open(&config.storage_path)?);
    let preferences = PreferencesHolder::load(store, &config.preference_defaults());

    let orchestrator = RefreshOrchestrator::new(
        Arc::new(GeminiClient::new(&config)?),
        Arc::new(BinanceClient::new(&config)?),
        preferences,
        OrchestratorSettings::from(&config),
        &config.start_topic(),
    );

    let pollers = orchestrator.spawn_pollers();

    // Первая сводка при старте
    {
        let orchestrator = orchestrator.clone();
        let topic = config.start_topic();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.refresh_briefing(&topic).await {
                tracing::warn!("Стартовая сводка не получена: {}", e);
            }
        });
    }

    let state = AppState {
        orchestrator,
        share_base_url: config.share_base_url.clone(),
    };

    let app = create_routes(state);
    tracing::info!("Сервер запущен на http://{}", config.bind_addr);
    axum::Server::bind(&config.bind_addr.parse()?)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Получен сигнал остановки");
        })
        .await?;

    for poller in pollers {
        poller.abort();
    }
    Ok(())
}
