use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const ENV_API_KEY: &str = "AZURE_OPENAI_API_KEY";
pub const ENV_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const ENV_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
pub const ENV_MODELS: &str = "AZURE_OPENAI_MODELS";
pub const ENV_MODEL_NAMES: &str = "AZURE_OPENAI_MODEL_NAMES";
pub const ENV_TIMEOUT_SECS: &str = "AZURE_OPENAI_TIMEOUT_SECS";
pub const ENV_PORT: &str = "AZURE_RELAY_PORT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub azure: AzureConfig,
}

/// Everything a single forwarding call needs. Immutable once loaded; a reload
/// produces a fresh value.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AzureConfig {
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Semicolon-delimited deployment identifiers.
    #[serde(default = "default_models")]
    pub models: String,
    /// Semicolon-delimited display names, paired with `models` by position.
    #[serde(default = "default_model_names")]
    pub model_names: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("models", &self.models)
            .field("model_names", &self.model_names)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            endpoint: default_endpoint(),
            api_version: default_api_version(),
            models: default_models(),
            model_names: default_model_names(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            azure: AzureConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    9099
}

fn default_api_key() -> String {
    "your-azure-openai-api-key-here".to_string()
}

fn default_endpoint() -> String {
    "your-azure-openai-endpoint-here".to_string()
}

fn default_api_version() -> String {
    "2024-02-01".to_string()
}

fn default_models() -> String {
    "gpt-35-turbo;gpt-4o".to_string()
}

fn default_model_names() -> String {
    "GPT-35 Turbo;GPT-4o".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl RelayConfig {
    /// Load config from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file, then apply environment
    /// overrides. Unlike an explicit path, a missing file is not an error:
    /// every setting has a default.
    /// Priority: env > CLI arg > CWD > XDG config > home dir > defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Ok(Self::load(path)?.with_env_overrides());
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Ok(Self::load(&candidate)?.with_env_overrides());
            }
        }

        tracing::info!("No config file found, using defaults and environment");
        Ok(Self::from_env())
    }

    /// Defaults overlaid with whatever `AZURE_OPENAI_*` variables are set.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable numeric
    /// values are ignored with a warning.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let azure = &mut self.azure;
        for (key, slot) in [
            (ENV_API_KEY, &mut azure.api_key),
            (ENV_ENDPOINT, &mut azure.endpoint),
            (ENV_API_VERSION, &mut azure.api_version),
            (ENV_MODELS, &mut azure.models),
            (ENV_MODEL_NAMES, &mut azure.model_names),
        ] {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.trim().parse() {
                Ok(secs) => azure.timeout_secs = secs,
                Err(_) => tracing::warn!(key = ENV_TIMEOUT_SECS, value = %raw, "Ignoring invalid timeout"),
            }
        }
        if let Some(raw) = lookup(ENV_PORT) {
            match raw.trim().parse() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!(key = ENV_PORT, value = %raw, "Ignoring invalid port"),
            }
        }

        self
    }
}

/// Where configuration is (re)read from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A config file, explicit or discovered, overlaid with environment
    /// variables.
    Layered(Option<PathBuf>),
    /// Exactly this file; the environment is not consulted.
    FileOnly(PathBuf),
}

impl ConfigSource {
    pub fn load(&self) -> Result<RelayConfig> {
        match self {
            Self::Layered(path) => RelayConfig::find_and_load(path.as_deref()),
            Self::FileOnly(path) => RelayConfig::load(path),
        }
    }
}

#[must_use]
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("azure-relay.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("azure-relay").join("config.toml"));
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("azure-relay").join("config.toml"));
        paths.push(home.join(".azure-relay.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000

[azure]
api_key = "secret"
endpoint = "https://example.openai.azure.com"
models = "gpt-4o;o1-mini"
model_names = "GPT-4o;o1 mini"
"#
        )
        .unwrap();

        let config = RelayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.azure.api_key, "secret");
        assert_eq!(config.azure.endpoint, "https://example.openai.azure.com");
        assert_eq!(config.azure.models, "gpt-4o;o1-mini");
        // Unset keys fall back to defaults.
        assert_eq!(config.azure.api_version, "2024-02-01");
        assert_eq!(config.azure.timeout_secs, 30);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let f = NamedTempFile::new().unwrap();
        let config = RelayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 9099);
        assert_eq!(config.azure, AzureConfig::default());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = RelayConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            (ENV_API_KEY, "from-env"),
            (ENV_API_VERSION, "2024-06-01"),
            (ENV_TIMEOUT_SECS, "45"),
            (ENV_PORT, "not-a-port"),
        ]
        .into_iter()
        .collect();

        let config = RelayConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.azure.api_key, "from-env");
        assert_eq!(config.azure.api_version, "2024-06-01");
        assert_eq!(config.azure.timeout_secs, 45);
        assert_eq!(config.azure.models, "gpt-35-turbo;gpt-4o");
        assert_eq!(config.port, 9099);
    }

    #[test]
    fn test_file_only_source_reads_just_the_file() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "[azure]\nmodels = \"o1\"\nmodel_names = \"o1\"").unwrap();

        let config = ConfigSource::FileOnly(f.path().to_path_buf()).load().unwrap();
        assert_eq!(config.azure.models, "o1");
        assert_eq!(config.azure.endpoint, "your-azure-openai-endpoint-here");

        let missing = ConfigSource::FileOnly(PathBuf::from("/definitely/not/here.toml")).load();
        assert!(missing.is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let azure = AzureConfig {
            api_key: "super-secret".to_string(),
            ..AzureConfig::default()
        };
        let rendered = format!("{azure:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
