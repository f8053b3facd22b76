//! Durable key/value cache scoped to the local OS user.
//!
//! Callers see an infallible cache: the in-memory copy is authoritative for
//! the running process and disk writes are best effort.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
}

pub struct FileCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileCache {
    /// Loads the cache file. A missing or unreadable file starts empty.
    pub fn open(path: &Path) -> Self {
        let entries = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                log::warn!("ignoring corrupt cache file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        }
    }

    pub fn default_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "coopscout") {
            proj_dirs.data_dir().join("cache.json")
        } else {
            PathBuf::from("coopscout-cache.json")
        }
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LocalCache for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        let Ok(mut entries) = self.entries.lock() else {
            log::error!("cache lock poisoned; dropping write to '{}'", key);
            return;
        };
        entries.insert(key.to_string(), value);
        if let Err(e) = self.flush(&entries) {
            log::warn!("failed to persist cache to {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<String, String>>,
}

#[cfg(test)]
impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value);
        }
    }
}
