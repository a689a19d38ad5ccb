//! Application configuration for docfill.
//!
//! User config lives at `~/.docfill/docfill.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocfillError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docfill.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docfill";

// ---------------------------------------------------------------------------
// Config structs (matching docfill.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Variable oracle settings.
    #[serde(default)]
    pub oracle: OracleConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory for session-scoped uploads and generated documents.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
        }
    }
}

/// `<data-local-dir>/docfill/uploads`, or a temp directory when the platform
/// has no data directory.
fn default_upload_dir() -> String {
    dirs::data_local_dir()
        .map(|dir| dir.join("docfill").join("uploads"))
        .unwrap_or_else(|| std::env::temp_dir().join("docfill-uploads"))
        .to_string_lossy()
        .into_owned()
}

/// `[oracle]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for variable identification.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the Generative Language API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds. Expiry degrades to an empty result.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Number of leading characters of document text sent to the oracle.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_chars: default_max_chars(),
        }
    }
}

impl OracleConfig {
    /// Read the API key from the configured env var. Empty counts as unset.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

fn default_api_key_env() -> String {
    "GENAI_API_KEY".into()
}
fn default_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_chars() -> usize {
    10_000
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docfill/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DocfillError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docfill/docfill.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocfillError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DocfillError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocfillError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocfillError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocfillError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("upload_dir"));
        assert!(toml_str.contains("GENAI_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.oracle.max_chars, 10_000);
        assert_eq!(parsed.oracle.model, "gemini-2.0-flash");
        assert_eq!(parsed.oracle.timeout_secs, 30);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[oracle]
model = "gemini-1.5-pro"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.oracle.model, "gemini-1.5-pro");
        assert_eq!(config.oracle.api_key_env, "GENAI_API_KEY");
        assert_eq!(config.defaults.upload_dir, default_upload_dir());
    }

    #[test]
    fn default_upload_dir_is_absolute() {
        let dir = PathBuf::from(default_upload_dir());
        assert!(dir.is_absolute(), "{}", dir.display());
        assert!(dir.ends_with("uploads") || dir.ends_with("docfill-uploads"));
    }

    #[test]
    fn load_config_from_file() {
        let path = std::env::temp_dir().join(format!("docfill_cfg_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[defaults]\nupload_dir = \"/srv/docfill\"\n").expect("write");
        let config = load_config_from(&path).expect("load");
        assert_eq!(config.defaults.upload_dir, "/srv/docfill");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unset_api_key_env_yields_none() {
        let config = OracleConfig {
            // Unique name so no other test or shell variable interferes
            api_key_env: "DOCFILL_TEST_NONEXISTENT_KEY_12345".into(),
            ..Default::default()
        };
        assert!(config.api_key().is_none());
    }
}
