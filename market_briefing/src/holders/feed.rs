use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

/// Снимок состояния одного источника данных.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshState<T> {
    pub status: FeedStatus,
    pub data: Option<T>,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct FeedInner<T> {
    state: RefreshState<T>,
    issued: u64,
    applied: u64,
}

/// Токен запроса. Выдаётся при старте загрузки, монотонно растёт.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestToken(u64);

/// Состояние источника и защита от устаревших ответов.
///
/// Ответ применяется, только если его токен новее последнего применённого,
/// ошибка фиксируется, только если токен самый свежий из выданных. Прежние
/// данные при ошибке сохраняются.
#[derive(Debug)]
pub struct FeedHolder<T> {
    name: &'static str,
    inner: Arc<Mutex<FeedInner<T>>>,
}

impl<T> Clone for FeedHolder<T> {
    fn clone(&self) -> Self {
        FeedHolder {
            name: self.name,
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> FeedHolder<T> {
    pub fn new(name: &'static str) -> Self {
        FeedHolder {
            name,
            inner: Arc::new(Mutex::new(FeedInner {
                state: RefreshState {
                    status: FeedStatus::Idle,
                    data: None,
                    error: None,
                    last_updated: None,
                },
                issued: 0,
                applied: 0,
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn begin(&self) -> RequestToken {
        let mut inner = self.inner.lock().await;
        inner.issued += 1;
        inner.state.status = FeedStatus::Loading;
        inner.state.error = None;
        RequestToken(inner.issued)
    }

    /// Возвращает `false`, если ответ устарел и был отброшен.
    pub async fn complete(&self, token: RequestToken, data: T, at: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().await;
        if token.0 <= inner.applied {
            tracing::debug!(
                "{}: отброшен устаревший ответ #{} (применён #{})",
                self.name,
                token.0,
                inner.applied
            );
            return false;
        }

        inner.applied = token.0;
        inner.state.data = Some(data);
        inner.state.last_updated = Some(at);
        if token.0 == inner.issued {
            inner.state.status = FeedStatus::Ready;
            inner.state.error = None;
        }
        true
    }

    pub async fn fail(&self, token: RequestToken, message: impl Into<String>) -> bool {
        let mut inner = self.inner.lock().await;
        if token.0 != inner.issued {
            tracing::debug!("{}: ошибка устаревшего запроса #{} проигнорирована", self.name, token.0);
            return false;
        }

        inner.state.status = FeedStatus::Error;
        inner.state.error = Some(message.into());
        true
    }

    /// Изменяет текущие данные на месте (частичное обновление метрик).
    pub async fn update<F>(&self, token: RequestToken, at: DateTime<Utc>, apply: F) -> bool
    where
        F: FnOnce(&mut Option<T>),
    {
        let mut inner = self.inner.lock().await;
        if token.0 <= inner.applied {
            return false;
        }

        inner.applied = token.0;
        apply(&mut inner.state.data);
        inner.state.last_updated = Some(at);
        if token.0 == inner.issued {
            inner.state.status = FeedStatus::Ready;
        }
        true
    }

    pub async fn snapshot(&self) -> RefreshState<T> {
        self.inner.lock().await.state.clone()
    }

    pub async fn status(&self) -> FeedStatus {
        self.inner.lock().await.state.status
    }
}
