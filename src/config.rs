use chrono::TimeDelta;
use directories::{BaseDirs, ProjectDirs};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::dispatch::{DEFAULT_DEDUP_WINDOW_MS, DEFAULT_MAX_UPLOAD_BYTES};
use crate::error::ConfigError;
use crate::realtime::ReconnectPolicy;
use crate::store::StoreOptions;
use crate::utils::{normalize_url, ws_url_for};

pub const TOKEN_ENV: &str = "MOUSAADA_TOKEN";
pub const BASE_URL_ENV: &str = "MOUSAADA_BASE_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub ws_url: Option<String>,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub dedup_window_ms: i64,
    pub typing_timeout_ms: u64,
    pub max_upload_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            ws_url: None,
            token: None,
            user_id: None,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            typing_timeout_ms: 2000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    // TOML is the primary format. Settings written by older builds as JSON
    // are picked up once and rewritten as TOML.
    pub fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("mousaada.toml"))
    }

    fn legacy_json_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("ma", "doit", "Mousaada")?;
        Some(proj.config_dir().join("state.json"))
    }

    /// Loads from the default locations, falling back to defaults.
    pub fn load() -> Self {
        if let Some(path) = Self::toml_path() {
            match Self::load_from(&path) {
                Ok(Some(settings)) => return settings,
                Ok(None) => {}
                Err(e) => warn!("ignoring {}: {e}", path.display()),
            }
        }

        if let Some(legacy) = Self::legacy_json_path() {
            if let Ok(bytes) = fs::read(&legacy) {
                match serde_json::from_slice::<Settings>(&bytes) {
                    Ok(settings) => {
                        if let Err(e) = settings.save() {
                            warn!("could not migrate legacy settings: {e}");
                        }
                        return settings;
                    }
                    Err(e) => warn!("ignoring {}: {e}", legacy.display()),
                }
            }
        }

        Self::new()
    }

    /// `Ok(None)` when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(toml::from_str(&text)?))
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::toml_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!("settings written to {}", path.display());
        Ok(())
    }

    /// Applies `MOUSAADA_TOKEN` / `MOUSAADA_BASE_URL` when set.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = lookup(TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
        if let Some(url) = lookup(BASE_URL_ENV).filter(|u| !u.is_empty()) {
            self.base_url = url;
        }
        self
    }

    pub fn is_authenticated(&self) -> bool {
        !self.base_url.is_empty() && self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Forgets the bearer token after the server rejected it.
    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn api_base(&self) -> String {
        normalize_url(&self.base_url)
    }

    pub fn websocket_url(&self) -> Result<Url, url::ParseError> {
        match self.ws_url.as_deref().filter(|u| !u.is_empty()) {
            Some(explicit) => Url::parse(explicit),
            None => ws_url_for(&self.api_base()),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            dedup_window: TimeDelta::milliseconds(self.dedup_window_ms),
            typing_timeout: Duration::from_millis(self.typing_timeout_ms),
        }
    }
}
