use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::holders::RefreshState;
use crate::models::{Briefing, CryptoTab, NewsItem, UserProfile};
use crate::services::orchestrator::FeedSummary;
use crate::services::RefreshOutcome;
use crate::share::{briefing_digest, share_url};
use crate::AppState;

#[derive(Deserialize)]
pub struct BriefingRequest {
    pub industry: String,
}

#[derive(Deserialize)]
pub struct BriefingQuery {
    pub topic: Option<String>,
}

#[derive(Deserialize)]
pub struct CryptoQuery {
    #[serde(default)]
    pub tab: CryptoTab,
    #[serde(default)]
    pub filter: String,
}

#[derive(Deserialize)]
pub struct FilterQuery {
    #[serde(default)]
    pub filter: String,
}

#[derive(Deserialize)]
pub struct SymbolRequest {
    pub symbol: String,
}

#[derive(Deserialize)]
pub struct AdminConfigRequest {
    pub stocks: String,
    pub crypto: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    pub current_industry: String,
    pub feeds: Vec<FeedSummary>,
    pub available_endpoints: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BriefingResponse {
    pub industry: String,
    #[serde(flatten)]
    pub state: RefreshState<Briefing>,
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    tracing::error!("Ошибка обработки запроса: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "error", "message": e.to_string() })),
    )
}

fn to_json<T: Serialize>(value: T) -> ApiResult {
    serde_json::to_value(value)
        .map(Json)
        .map_err(internal_error)
}

async fn briefing_response(state: &AppState) -> BriefingResponse {
    BriefingResponse {
        industry: state.orchestrator.current_industry().await,
        state: state.orchestrator.briefing_state().await,
    }
}

// Проверка здоровья сервиса
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        message: "Market Briefing API is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ready".to_string(),
        current_industry: state.orchestrator.current_industry().await,
        feeds: state.orchestrator.feed_summaries().await,
        available_endpoints: vec![
            "/".to_string(),
            "/status".to_string(),
            "/api/briefing".to_string(),
            "/api/briefing/retry".to_string(),
            "/api/briefing/share".to_string(),
            "/api/briefing/digest".to_string(),
            "/api/crypto".to_string(),
            "/api/stocks".to_string(),
            "/api/dashboard".to_string(),
            "/api/history".to_string(),
            "/api/bookmarks".to_string(),
            "/api/watchlist".to_string(),
            "/api/admin/config".to_string(),
            "/api/profile".to_string(),
        ],
    })
}

/// Текущая сводка. Если в `topic` пришла другая тема, обновление запускается в
/// фоне, как при открытии ссылки с темой.
pub async fn get_briefing(State(state): State<AppState>, Query(query): Query<BriefingQuery>) -> ApiResult {
    let topic = query
        .topic
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    if let Some(topic) = topic {
        if topic != state.orchestrator.current_industry().await {
            tracing::info!("Запрошена тема из ссылки: {}", topic);
            let orchestrator = state.orchestrator.clone();
            let industry = topic.clone();
            tokio::spawn(async move {
                let _ = orchestrator.refresh_briefing(&industry).await;
            });
        }
    }

    to_json(briefing_response(&state).await)
}

fn refresh_result(outcome: crate::Result<RefreshOutcome>) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    match outcome {
        Ok(RefreshOutcome::Skipped) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": "industry must not be empty" })),
        )),
        Ok(_) => Ok(StatusCode::OK),
        Err(e) => {
            tracing::warn!("Сводка не обновлена: {}", e);
            Ok(StatusCode::BAD_GATEWAY)
        }
    }
}

pub async fn refresh_briefing(
    State(state): State<AppState>,
    Json(req): Json<BriefingRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let status = refresh_result(state.orchestrator.refresh_briefing(&req.industry).await)?;
    let body = to_json(briefing_response(&state).await)?;
    Ok((status, body))
}

pub async fn retry_briefing(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let status = refresh_result(state.orchestrator.retry_briefing().await)?;
    let body = to_json(briefing_response(&state).await)?;
    Ok((status, body))
}

pub async fn get_share_link(State(state): State<AppState>) -> Json<Value> {
    let industry = state.orchestrator.current_industry().await;
    Json(json!({
        "topic": industry,
        "url": share_url(&state.share_base_url, &industry),
    }))
}

/// Текст сводки для публикации в соцсетях.
pub async fn get_digest(State(state): State<AppState>) -> ApiResult {
    let briefing = state.orchestrator.briefing_state().await.data.ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "error", "message": "briefing is not ready yet" })),
        )
    })?;

    Ok(Json(json!({
        "industry": briefing.industry,
        "text": briefing_digest(&briefing, Utc::now()),
    })))
}

pub async fn get_crypto(State(state): State<AppState>, Query(query): Query<CryptoQuery>) -> ApiResult {
    to_json(state.orchestrator.crypto_view(query.tab, &query.filter).await)
}

pub async fn get_stocks(State(state): State<AppState>, Query(query): Query<FilterQuery>) -> ApiResult {
    to_json(state.orchestrator.stock_view(&query.filter).await)
}

pub async fn get_dashboard(State(state): State<AppState>) -> ApiResult {
    to_json(state.orchestrator.dashboard_state().await)
}

pub async fn get_history(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.orchestrator.preferences().search_history().await)
}

pub async fn get_bookmarks(State(state): State<AppState>) -> Json<Vec<NewsItem>> {
    Json(state.orchestrator.preferences().bookmarks().await)
}

pub async fn toggle_bookmark(State(state): State<AppState>, Json(item): Json<NewsItem>) -> ApiResult {
    let bookmarks = state
        .orchestrator
        .preferences()
        .toggle_bookmark(item)
        .await
        .map_err(internal_error)?;
    to_json(bookmarks)
}

pub async fn get_watchlist(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.orchestrator.preferences().watchlist().await)
}

pub async fn toggle_watchlist(State(state): State<AppState>, Json(req): Json<SymbolRequest>) -> ApiResult {
    let symbol = req.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": "symbol must not be empty" })),
        ));
    }
    let watchlist = state
        .orchestrator
        .preferences()
        .toggle_watchlist(&symbol)
        .await
        .map_err(internal_error)?;
    to_json(watchlist)
}

pub async fn add_watchlist_symbol(State(state): State<AppState>, Json(req): Json<SymbolRequest>) -> ApiResult {
    let watchlist = state
        .orchestrator
        .preferences()
        .add_watchlist_symbol(&req.symbol)
        .await
        .map_err(internal_error)?;
    to_json(watchlist)
}

pub async fn get_admin_config(State(state): State<AppState>) -> ApiResult {
    to_json(state.orchestrator.preferences().admin_config().await)
}

pub async fn save_admin_config(State(state): State<AppState>, Json(req): Json<AdminConfigRequest>) -> ApiResult {
    let saved = state
        .orchestrator
        .preferences()
        .save_admin_config(&req.stocks, &req.crypto)
        .await
        .map_err(internal_error)?;
    to_json(saved)
}

pub async fn get_profile(State(state): State<AppState>) -> Json<Option<UserProfile>> {
    Json(state.orchestrator.preferences().profile().await)
}

pub async fn login(State(state): State<AppState>, Json(profile): Json<UserProfile>) -> ApiResult {
    state
        .orchestrator
        .preferences()
        .login(profile.clone())
        .await
        .map_err(internal_error)?;
    to_json(profile)
}

pub async fn logout(State(state): State<AppState>) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    state
        .orchestrator
        .preferences()
        .logout()
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// Создание маршрутов
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/status", get(get_status))
        .route("/api/briefing", get(get_briefing).post(refresh_briefing))
        .route("/api/briefing/retry", post(retry_briefing))
        .route("/api/briefing/share", get(get_share_link))
        .route("/api/briefing/digest", get(get_digest))
        .route("/api/crypto", get(get_crypto))
        .route("/api/stocks", get(get_stocks))
        .route("/api/dashboard", get(get_dashboard))
        .route("/api/history", get(get_history))
        .route("/api/bookmarks", get(get_bookmarks).post(toggle_bookmark))
        .route("/api/watchlist", get(get_watchlist).post(toggle_watchlist))
        .route("/api/watchlist/add", post(add_watchlist_symbol))
        .route("/api/admin/config", get(get_admin_config).put(save_admin_config))
        .route("/api/profile", get(get_profile).post(login).delete(logout))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
