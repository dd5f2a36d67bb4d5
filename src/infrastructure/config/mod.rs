//! Layered settings: defaults → `intentsql.toml` → `INTENTSQL_*` env vars.

use crate::application::use_cases::match_decision::{
    MatchSettings, DEFAULT_SUGGESTION_COUNT, DEFAULT_THRESHOLD,
};
use crate::application::use_cases::result_streamer::DecimalPolicy;
use crate::domain::error::{AppError, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "intentsql.toml";
pub const CONFIG_PATH_ENV: &str = "INTENTSQL_CONFIG";
pub const ENV_PREFIX: &str = "INTENTSQL_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub matching: MatchingSettings,
    pub database: DatabaseSettings,
    pub embedding: EmbeddingSettings,
    pub streaming: StreamingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5011,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    pub threshold: f32,
    pub suggestion_count: usize,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            suggestion_count: DEFAULT_SUGGESTION_COUNT,
        }
    }
}

impl MatchingSettings {
    pub fn to_match_settings(&self) -> MatchSettings {
        MatchSettings {
            threshold: self.threshold,
            suggestion_count: self.suggestion_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// `sqlite://...` or `postgres://...`
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub templates_table: String,
    /// Reject statements that do not start with SELECT or WITH.
    pub read_only: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://intentsql.db".to_string(),
            max_connections: 5,
            connect_timeout_secs: 10,
            query_timeout_secs: 30,
            templates_table: "query_templates".to_string(),
            read_only: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Local,
    Ollama,
    OpenAi,
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub base_url: Option<String>,
    /// Literal key or `env:VAR_NAME`.
    pub api_key: Option<String>,
    /// Vector length of the hash provider.
    pub dimension: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Local,
            model: "all-minilm-l6-v2".to_string(),
            base_url: None,
            api_key: None,
            dimension: 384,
        }
    }
}

impl EmbeddingSettings {
    pub fn resolved_api_key(&self) -> Result<Option<String>> {
        self.api_key.as_deref().map(resolve_secret).transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub channel_capacity: usize,
    pub decimal_policy: DecimalPolicy,
    /// Emit a leading `{"matched": true, ...}` line before rows.
    pub include_meta: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            decimal_policy: DecimalPolicy::Float,
            include_meta: false,
        }
    }
}

impl Settings {
    /// Load from the default sources. `.env` should already be applied.
    /// An explicit `path` wins over `INTENTSQL_CONFIG`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_string(),
            None => std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string()),
        };
        Self::from_figment(Self::figment(&path, ENV_PREFIX))
    }

    pub fn figment(path: &str, env_prefix: &str) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(env_prefix).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.matching.threshold;
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            return Err(AppError::ConfigError(format!(
                "matching.threshold must be within [-1, 1], got {}",
                threshold
            )));
        }
        if self.matching.suggestion_count == 0 {
            return Err(AppError::ConfigError(
                "matching.suggestion_count must be at least 1".to_string(),
            ));
        }
        if self.streaming.channel_capacity == 0 {
            return Err(AppError::ConfigError(
                "streaming.channel_capacity must be at least 1".to_string(),
            ));
        }
        let url = self.database.url.trim();
        if !(url.starts_with("sqlite:")
            || url.starts_with("postgres:")
            || url.starts_with("postgresql:"))
        {
            return Err(AppError::ConfigError(format!(
                "database.url must use the sqlite: or postgres: scheme, got '{}'",
                url
            )));
        }
        if !is_identifier(&self.database.templates_table) {
            return Err(AppError::ConfigError(format!(
                "database.templates_table '{}' is not a plain identifier",
                self.database.templates_table
            )));
        }
        if self.embedding.provider == EmbeddingProvider::Hash && self.embedding.dimension == 0 {
            return Err(AppError::ConfigError(
                "embedding.dimension must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve a secret reference.
/// Format: "env:OPENAI_API_KEY" -> value of that env var
/// Anything else is taken literally.
pub fn resolve_secret(reference: &str) -> Result<String> {
    match reference.strip_prefix("env:") {
        Some(var) => std::env::var(var).map_err(|_| {
            AppError::ConfigError(format!("Environment variable '{}' is not set", var))
        }),
        None => Ok(reference.to_string()),
    }
}

// table name is interpolated into SQL, so keep it to [A-Za-z_][A-Za-z0-9_]*
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
