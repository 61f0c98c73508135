// errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BriefingError {
    #[error("Ошибка HTTP запроса: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Ошибка парсинга JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Не задан ключ API: {0}")]
    MissingCredential(&'static str),

    #[error("API вернул ошибку: {0}")]
    ApiError(String),

    #[error("Нет доступных источников данных: {0}")]
    NoDataSourcesAvailable(String),

    #[error("Ошибка хранилища: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, BriefingError>;
