use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project URL, e.g. `https://abcd.supabase.co`
    pub url: String,
    pub anon_key: String,
    /// User JWT; the anon key is sent as bearer token when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    pub sessions: String,
    pub messages: String,
    pub tenant_column: String,
    pub order: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub heartbeat_secs: u64,
    pub join_timeout_secs: u64,
    pub reconnect: ReconnectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        // Local development stack
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            access_token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            sessions: "whatsapp_sessions".to_string(),
            messages: "whatsapp_messages".to_string(),
            tenant_column: "company_id".to_string(),
            order: "last_message_time.desc.nullslast".to_string(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            join_timeout_secs: 10,
            reconnect: ReconnectionConfig::default(),
        }
    }
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 5000, // Start at 5 seconds
            max_delay_ms: 30000, // Max 30 seconds
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectionConfig {
    /// Backoff delay for a zero-based attempt, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.base_delay_ms as f64 * self.backoff_factor.powi(attempt as i32))
            .min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Backoff delay with up to one second of jitter to spread reconnect storms
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_millis() as u64)
            .unwrap_or(0);
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}

impl Config {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "sessionfeed", "sessionfeed")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from an explicit path, or from the default location.
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(default_path) if default_path.exists() => Self::load_from(&default_path),
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    Ok(Config::default())
                }
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.backend.url.trim().is_empty() {
            return Err(anyhow!("backend.url must not be empty"));
        }
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Token sent as `Authorization: Bearer`
    pub fn bearer_token(&self) -> &str {
        self.backend
            .access_token
            .as_deref()
            .unwrap_or(&self.backend.anon_key)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }
}
