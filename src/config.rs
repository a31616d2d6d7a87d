use crate::errors::AppResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_MUTATION_DEBOUNCE_MS: u64 = 400;
const MIN_MUTATION_DEBOUNCE_MS: u64 = 50;
const MAX_MUTATION_DEBOUNCE_MS: u64 = 5_000;
const DEFAULT_SYNC_POLL_INTERVAL_MS: u64 = 3_000;
const MIN_SYNC_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_PAGE_SIZE: usize = 25;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CoreConfig {
    pub api_base_url: String,
    pub auth_token: Option<String>,
    pub request_timeout_secs: u64,
    pub mutation_debounce_ms: u64,
    pub sync_poll_interval_ms: u64,
    pub default_page_size: usize,
    pub mirror_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            auth_token: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            mutation_debounce_ms: DEFAULT_MUTATION_DEBOUNCE_MS,
            sync_poll_interval_ms: DEFAULT_SYNC_POLL_INTERVAL_MS,
            default_page_size: DEFAULT_PAGE_SIZE,
            mirror_path: None,
            log_dir: None,
        }
    }
}

impl CoreConfig {
    /// Reads the YAML file at `path` when it exists, then layers `ADBOARD_*`
    /// environment overrides on top. A missing file yields the defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            if raw.trim().is_empty() {
                Self::default()
            } else {
                serde_yaml::from_str::<Self>(&raw)?
            }
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config.normalized())
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.normalized()
    }

    fn apply_env_overrides(&mut self, read: impl Fn(&str) -> Option<String>) {
        if let Some(url) = read("ADBOARD_API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(token) = read("ADBOARD_AUTH_TOKEN") {
            self.auth_token = Some(token);
        }
        if let Some(secs) = read("ADBOARD_REQUEST_TIMEOUT_SECS").and_then(|value| value.parse().ok()) {
            self.request_timeout_secs = secs;
        }
        if let Some(ms) = read("ADBOARD_MUTATION_DEBOUNCE_MS").and_then(|value| value.parse().ok()) {
            self.mutation_debounce_ms = ms;
        }
        if let Some(ms) = read("ADBOARD_SYNC_POLL_INTERVAL_MS").and_then(|value| value.parse().ok()) {
            self.sync_poll_interval_ms = ms;
        }
        if let Some(path) = read("ADBOARD_MIRROR_PATH") {
            self.mirror_path = Some(PathBuf::from(path));
        }
        if let Some(path) = read("ADBOARD_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(path));
        }
    }

    fn normalized(mut self) -> Self {
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        self.mutation_debounce_ms = self
            .mutation_debounce_ms
            .clamp(MIN_MUTATION_DEBOUNCE_MS, MAX_MUTATION_DEBOUNCE_MS);
        self.sync_poll_interval_ms = self.sync_poll_interval_ms.max(MIN_SYNC_POLL_INTERVAL_MS);
        if self.default_page_size == 0 {
            self.default_page_size = DEFAULT_PAGE_SIZE;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn mutation_debounce(&self) -> Duration {
        Duration::from_millis(self.mutation_debounce_ms)
    }

    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_poll_interval_ms)
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.auth_token
            .as_ref()
            .map(|token| format!("Bearer {}", token.trim()))
    }
}
