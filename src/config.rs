//! Server configuration. Values resolve with CLI flags over environment
//! variables over config file over built-in defaults; the binary applies its
//! flags on top of what [`ServerConfig::load`] returns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::realtime::HubOptions;
use crate::store::StoreOptions;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7171";
pub const DEFAULT_DB_PATH: &str = "fluxbase.db";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
    pub log_retention: usize,
    pub read_threads: Option<usize>,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub outbound_queue: usize,
    /// Static tokens mapped to subject ids; empty means anonymous-only.
    pub auth_tokens: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            log_dir: None,
            log_level: "info".to_string(),
            log_retention: 7,
            read_threads: None,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 60,
            outbound_queue: 64,
            auth_tokens: HashMap::new(),
        }
    }
}

/// Partial mirror of [`ServerConfig`] for TOML files; absent keys keep the
/// value from the layer below.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    bind_addr: Option<String>,
    db_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    log_level: Option<String>,
    log_retention: Option<usize>,
    read_threads: Option<usize>,
    heartbeat_interval_secs: Option<u64>,
    client_timeout_secs: Option<u64>,
    outbound_queue: Option<usize>,
    auth_tokens: Option<HashMap<String, String>>,
}

impl ServerConfig {
    /// Resolves configuration from defaults, then the first readable config
    /// file (CLI-given path, `FLUXBASE_CONFIG`, `./fluxbase.toml`), then
    /// `FLUXBASE_*` environment variables.
    #[must_use]
    pub fn load(cli_path: Option<&Path>) -> Self {
        let mut config = Self::default();
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = cli_path {
            candidates.push(path.to_path_buf());
        }
        if let Ok(path) = std::env::var("FLUXBASE_CONFIG") {
            candidates.push(PathBuf::from(path));
        }
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join("fluxbase.toml"));
        }
        for path in candidates {
            if let Some(file) = read_config_file(&path) {
                config.apply_file(file);
                break;
            }
        }
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.bind_addr {
            self.bind_addr = v;
        }
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.log_dir {
            self.log_dir = Some(v);
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
        if let Some(v) = file.log_retention {
            self.log_retention = v;
        }
        if let Some(v) = file.read_threads {
            self.read_threads = Some(v);
        }
        if let Some(v) = file.heartbeat_interval_secs {
            self.heartbeat_interval_secs = v;
        }
        if let Some(v) = file.client_timeout_secs {
            self.client_timeout_secs = v;
        }
        if let Some(v) = file.outbound_queue {
            self.outbound_queue = v;
        }
        if let Some(v) = file.auth_tokens {
            self.auth_tokens = v;
        }
    }

    /// Environment layer, parameterized over the lookup so tests never have
    /// to mutate process-wide state.
    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("FLUXBASE_BIND") {
            self.bind_addr = v;
        }
        if let Some(v) = get("FLUXBASE_DB") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("FLUXBASE_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("FLUXBASE_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = get("FLUXBASE_LOG_RETENTION").and_then(|s| s.parse().ok()) {
            self.log_retention = v;
        }
        if let Some(v) = get("FLUXBASE_READ_THREADS").and_then(|s| s.parse().ok()) {
            self.read_threads = Some(v);
        }
    }

    #[must_use]
    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(self.client_timeout_secs),
            outbound_queue: self.outbound_queue,
        }
    }

    #[must_use]
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions { read_threads: self.read_threads }
    }
}

fn read_config_file(path: &Path) -> Option<ConfigFile> {
    if !path.exists() {
        return None;
    }
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("config file {} unreadable: {e}", path.display());
            return None;
        }
    };
    match toml::from_str(&text) {
        Ok(file) => Some(file),
        Err(e) => {
            log::warn!("config file {} ignored: {e}", path.display());
            None
        }
    }
}
