use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::errors::{BriefingError, Result};

/// Хранилище пользовательских настроек: ключ → JSON-текст.
pub trait Persistence: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Испорченный файл не мешает старту: он переименовывается в `*.corrupt`,
/// настройки начинаются с пустого набора.
fn read_entries(path: &Path) -> Result<BTreeMap<String, String>> {
    let parsed = fs::read(path).map_err(BriefingError::from).and_then(|bytes| {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        let object: BTreeMap<String, Value> = serde_json::from_slice(&bytes)?;
        Ok(object
            .into_iter()
            .map(|(key, value)| (key, value.to_string()))
            .collect())
    });

    match parsed {
        Ok(entries) => Ok(entries),
        Err(BriefingError::JsonError(e)) => {
            let backup = path.with_extension("corrupt");
            tracing::warn!(
                "Файл настроек {} повреждён ({}), сохранён как {}, начинаем с пустых настроек",
                path.display(),
                e,
                backup.display()
            );
            fs::rename(path, &backup)?;
            Ok(BTreeMap::new())
        }
        Err(e) => Err(e),
    }
}

/// Один JSON-объект на диске, перезаписывается целиком при каждой записи.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            read_entries(&path)?
        } else {
            BTreeMap::new()
        };

        tracing::info!("Хранилище {} открыто, ключей: {}", path.display(), entries.len());
        Ok(JsonFileStore {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let mut object = serde_json::Map::new();
        for (key, raw) in entries {
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
            object.insert(key.clone(), value);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&Value::Object(object))?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| BriefingError::Storage("мьютекс хранилища отравлен".to_string()))
    }
}

impl Persistence for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_entry(self, key: &str, value: &str) -> Self {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
        self
    }
}

impl Persistence for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| BriefingError::Storage("мьютекс хранилища отравлен".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| BriefingError::Storage("мьютекс хранилища отравлен".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| BriefingError::Storage("мьютекс хранилища отравлен".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}
