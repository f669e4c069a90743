use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::pipeline::CorrelationParams;

// CONFIGURATION

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub window: usize,          // paired returns per coefficient
    pub days: u32,              // history length, clamped to what histohour serves
    pub top_limit: u32,         // altcoins shown besides the reference
    pub reference_symbol: String,
    pub quote_symbol: String,   // CryptoCompare is case sensitive: "USD"
    pub base_url: String,
    pub tolerance_ms: i64,
    pub max_concurrent_fetches: usize,
    pub lookup_limit: u32,      // how deep to search the ranking for a custom symbol
    pub cache_ttl_secs: u64,
    pub proxy_bind: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window: 30,
            days: 7,
            top_limit: 10,
            reference_symbol: "BTC".to_string(),
            quote_symbol: "USD".to_string(),
            base_url: "https://min-api.cryptocompare.com".to_string(),
            tolerance_ms: crate::sync::DEFAULT_TOLERANCE_MS,
            max_concurrent_fetches: 1,
            lookup_limit: 100,
            cache_ttl_secs: 120,
            proxy_bind: "127.0.0.1:4000".to_string(),
        }
    }
}

impl AppConfig {
    pub fn params(&self) -> CorrelationParams {
        CorrelationParams {
            window: if self.window == 0 { 30 } else { self.window },
            days: crate::registry::clamp_days(self.days),
            tolerance_ms: self.tolerance_ms,
        }
    }
}

// STORAGE MANAGER

#[derive(Debug, Clone)]
pub struct AsyncStorageManager {
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// **Constructor: new_relative**
    /// Storage directory next to the running executable, created on startup
    /// so later writes never have to check for it.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        // 1. Locate the running executable
        let exe_path = std::env::current_exe()?;
        // 2. Its directory plus the relative path (e.g. "storage")
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);
        Self::new_in(base_dir).await
    }

    pub async fn new_in<P: Into<PathBuf>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", filename))
    }

    /// **Atomic Save**
    /// Serializes into `<name>.json.tmp`, then renames over the real file so a
    /// crash never leaves it half written.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let final_path = self.path_for(filename);
        let tmp_path = self.base_dir.join(format!("{}.json.tmp", filename));

        // 1. Write the pretty-printed JSON to the temporary file
        let json_bytes = serde_json::to_vec_pretty(data)?;
        fs::write(&tmp_path, json_bytes).await?;
        // 2. Rename is atomic on the same filesystem
        fs::rename(tmp_path, final_path).await?;
        Ok(())
    }

    /// **Generic Load**
    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        // Bytes, not a String: serde_json validates UTF-8 while parsing anyway.
        let content = fs::read(self.path_for(filename)).await?;
        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }

    /// Loads `filename`, writing `T::default()` first if the file is missing.
    pub async fn load_or_init<T>(&self, filename: &str) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        if !self.path_for(filename).exists() {
            let fresh = T::default();
            self.save(filename, &fresh).await?;
            tracing::info!(file = filename, dir = ?self.base_dir, "created default");
            return Ok(fresh);
        }
        self.load(filename).await
    }
}

// CUSTOM SYMBOLS

/// Persistence of the user-added symbol set.
#[async_trait]
pub trait SymbolStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<BTreeSet<String>>;
    async fn save(&self, symbols: &BTreeSet<String>) -> anyhow::Result<()>;
}

pub const CUSTOM_SYMBOLS_FILE: &str = "custom_symbols";

pub struct JsonSymbolStore {
    storage: AsyncStorageManager,
}

impl JsonSymbolStore {
    pub fn new(storage: AsyncStorageManager) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl SymbolStore for JsonSymbolStore {
    async fn load(&self) -> anyhow::Result<BTreeSet<String>> {
        if !self.storage.path_for(CUSTOM_SYMBOLS_FILE).exists() {
            return Ok(BTreeSet::new());
        }
        let symbols: Vec<String> = self.storage.load(CUSTOM_SYMBOLS_FILE).await?;
        Ok(symbols.into_iter().collect())
    }

    async fn save(&self, symbols: &BTreeSet<String>) -> anyhow::Result<()> {
        let list: Vec<&String> = symbols.iter().collect();
        self.storage.save(CUSTOM_SYMBOLS_FILE, &list).await
    }
}
