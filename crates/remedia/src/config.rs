use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub consent: ConsentConfig,
    #[serde(default)]
    pub closure: ClosureConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

impl Config {
    /// Load configuration from a YAML file; a missing file yields defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }
}

/// Resolve a path relative to the config file directory.
///
/// Absolute paths are returned as-is; relative paths are joined with the
/// config file's parent so behavior does not depend on the working
/// directory.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

/// Default sessions directory (relative to the config file).
pub const DEFAULT_SESSIONS_DIR: &str = ".remedia/sessions";

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    120
}

fn default_extraction_base_url() -> String {
    "http://127.0.0.1:9090".to_string()
}

fn default_extraction_timeout() -> u64 {
    60
}

fn default_extraction_retries() -> u32 {
    1
}

fn default_extraction_backoff_ms() -> u64 {
    500
}

fn default_affirmative_tokens() -> Vec<String> {
    [
        "sí",
        "si",
        "acepto",
        "sí acepto",
        "autorizo",
        "sí autorizo",
        "de acuerdo",
        "claro que sí",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_termination_phrases() -> Vec<String> {
    [
        "no necesito nada más",
        "no necesito nada mas",
        "eso es todo",
        "eso es todo gracias",
        "finalizar",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Budget for handling one inbound event, extraction included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

// ============================================================================
// SessionsConfig
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SessionsConfig {
    /// Where session records and the patient table live.
    /// Defaults to [`DEFAULT_SESSIONS_DIR`] next to the config file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ============================================================================
// ConsentConfig
// ============================================================================

/// Recognized affirmative-consent tokens, matched case/diacritic-insensitively.
#[derive(Debug, Deserialize)]
pub struct ConsentConfig {
    #[serde(default = "default_affirmative_tokens")]
    pub affirmative_tokens: Vec<String>,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            affirmative_tokens: default_affirmative_tokens(),
        }
    }
}

// ============================================================================
// ClosureConfig
// ============================================================================

/// Phrases that signal the user wants no further processing.
#[derive(Debug, Deserialize)]
pub struct ClosureConfig {
    #[serde(default = "default_termination_phrases")]
    pub termination_phrases: Vec<String>,
}

impl Default for ClosureConfig {
    fn default() -> Self {
        Self {
            termination_phrases: default_termination_phrases(),
        }
    }
}

// ============================================================================
// ExtractionConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_base_url")]
    pub base_url: String,
    #[serde(default = "default_extraction_timeout")]
    pub timeout_seconds: u64,
    /// Retries after a transient upstream failure. Rejections never retry.
    #[serde(default = "default_extraction_retries")]
    pub max_retries: u32,
    #[serde(default = "default_extraction_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            base_url: default_extraction_base_url(),
            timeout_seconds: default_extraction_timeout(),
            max_retries: default_extraction_retries(),
            retry_backoff_ms: default_extraction_backoff_ms(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::{NamedTempFile, TempDir};

    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout_seconds, 120);
        assert!(config.sessions.path.is_none());
        assert!(
            config
                .closure
                .termination_phrases
                .contains(&"no necesito nada más".to_string())
        );
        assert!(
            config
                .consent
                .affirmative_tokens
                .contains(&"acepto".to_string())
        );
        assert_eq!(config.extraction.max_retries, 1);
    }

    #[tokio::test]
    async fn load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let missing = tmp_dir.path().join("missing-config.yaml");
        let config = Config::load(&missing).await.unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[tokio::test]
    async fn load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 3000
sessions:
  path: "data/sessions"
extraction:
  base_url: "http://extract.internal:9090"
  max_retries: 2
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.sessions.path, Some(PathBuf::from("data/sessions")));
        assert_eq!(config.extraction.base_url, "http://extract.internal:9090");
        assert_eq!(config.extraction.max_retries, 2);
        // Unset sections keep their defaults.
        assert_eq!(config.server.request_timeout_seconds, 120);
        assert!(!config.consent.affirmative_tokens.is_empty());
    }

    #[tokio::test]
    async fn load_custom_phrases() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
consent:
  affirmative_tokens: ["dale", "listo"]
closure:
  termination_phrases: ["chao"]
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.consent.affirmative_tokens, vec!["dale", "listo"]);
        assert_eq!(config.closure.termination_phrases, vec!["chao"]);
    }

    #[tokio::test]
    async fn load_invalid_yaml_errors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "server: [not: a: mapping").unwrap();
        assert!(Config::load(file.path()).await.is_err());
    }

    #[test]
    fn resolve_path_absolute() {
        let config_path = Path::new("/etc/remedia/remedia.yaml");
        let result = resolve_path(config_path, Path::new("/var/data/sessions"));
        assert_eq!(result, PathBuf::from("/var/data/sessions"));
    }

    #[test]
    fn resolve_path_relative() {
        let config_path = Path::new("/etc/remedia/remedia.yaml");
        let result = resolve_path(config_path, Path::new(".remedia/sessions"));
        assert_eq!(result, PathBuf::from("/etc/remedia/.remedia/sessions"));
    }

    #[test]
    fn resolve_path_config_in_current_dir() {
        let result = resolve_path(Path::new("remedia.yaml"), Path::new("data"));
        assert_eq!(result, PathBuf::from("data"));
    }
}
