// Configuration loading and parsing (voicecart.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default LLM endpoint base (Gemini REST API).
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// File name used for the database inside the platform data directory.
const DEFAULT_DB_FILE: &str = "voicecart.db";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub translation: TranslationConfig,
    pub recommendations: RecommendationConfig,
    pub credentials: CredentialsConfig,
    pub ws_host: String,
    pub ws_port: u16,
    /// Resolved database path. Never empty after loading.
    pub db_path: String,
}

// ---------------------------------------------------------------------------
// voicecart.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire voicecart.toml file.
#[derive(Debug, Clone, Deserialize)]
struct VoiceCartFile {
    server: ServerSection,
    database: DatabaseSection,
    llm: LlmConfig,
    translation: TranslationConfig,
    recommendations: RecommendationConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    /// Empty selects the platform data directory.
    #[serde(default)]
    path: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Upper bound for every remote call made on behalf of a command.
    pub request_timeout_secs: u64,
}

fn default_api_base() -> String {
    DEFAULT_GEMINI_API_BASE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslationConfig {
    pub enabled: bool,
    pub api_base: String,
    /// Translate status replies back into the speaker's language.
    #[serde(default)]
    pub translate_replies: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationConfig {
    pub enabled: bool,
    /// Refresh suggestions after every add or remove.
    #[serde(default = "default_true")]
    pub refresh_after_change: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub gemini_api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/voicecart.toml` and
/// (optionally) `config/credentials.toml`, relative to `base_dir`.
///
/// Does not copy defaults or read the environment; `load_config()` does both.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- voicecart.toml (required) ---
    let main_path = config_dir.join("voicecart.toml");
    let main_text = read_file(&main_path)?;
    let file: VoiceCartFile = toml::from_str(&main_text).map_err(|e| ConfigError::ParseError {
        path: main_path.clone(),
        source: e,
    })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        llm: file.llm,
        translation: file.translation,
        recommendations: file.recommendations,
        credentials,
        ws_host: file.server.host,
        ws_port: file.server.port,
        db_path: resolve_db_path(&file.database.path)?,
    };

    validate(&config)?;

    Ok(config)
}

/// Override file values with `GEMINI_API_KEY`, `GEMINI_MODEL`, and `PORT`.
///
/// `lookup` abstracts the environment so tests need not mutate it.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()) {
        config.credentials.gemini_api_key = Some(key.trim().to_string());
    }
    if let Some(model) = lookup("GEMINI_MODEL").filter(|m| !m.trim().is_empty()) {
        config.llm.model = model.trim().to_string();
    }
    if let Some(port) = lookup("PORT") {
        config.ws_port = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::ValidationError {
                field: "PORT".into(),
                message: format!("not a valid port number: {port:?}"),
            })?;
    }
    Ok(())
}

/// Populate `config/` from `defaults/`, never overwriting a file the user
/// already has. `.example` templates are not copied. Returns the paths
/// written.
///
/// A missing `defaults/` is fine as long as `config/` exists.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");
    let copy_error = |message: String| ConfigError::DefaultsCopyError { message };

    if !defaults_dir.is_dir() {
        return if config_dir.is_dir() {
            Ok(Vec::new())
        } else {
            Err(copy_error(format!(
                "neither defaults/ nor config/ directory found in {}",
                base_dir.display()
            )))
        };
    }

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| copy_error(format!("cannot create {}: {e}", config_dir.display())))?;

    let mut templates = Vec::new();
    for entry in std::fs::read_dir(&defaults_dir)
        .map_err(|e| copy_error(format!("cannot list {}: {e}", defaults_dir.display())))?
    {
        let path = entry
            .map_err(|e| copy_error(format!("cannot list {}: {e}", defaults_dir.display())))?
            .path();
        let is_example = path.extension().is_some_and(|ext| ext == "example");
        if path.is_file() && !is_example {
            templates.push(path);
        }
    }
    templates.sort();

    let mut written = Vec::new();
    for source in templates {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = config_dir.join(name);
        if target.exists() {
            continue;
        }
        std::fs::copy(&source, &target).map_err(|e| {
            copy_error(format!(
                "cannot copy {} to {}: {e}",
                source.display(),
                target.display()
            ))
        })?;
        debug!("Created {} from defaults", target.display());
        written.push(target);
    }
    Ok(written)
}

/// Convenience wrapper: loads config relative to the current working
/// directory, copying defaults first and applying environment overrides.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    let mut config = load_config_from(&cwd)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn resolve_db_path(path: &str) -> Result<String, ConfigError> {
    let path = path.trim();
    if !path.is_empty() {
        return Ok(path.to_string());
    }
    let dirs = directories::ProjectDirs::from("", "", "voicecart").ok_or_else(|| {
        ConfigError::ValidationError {
            field: "database.path".into(),
            message: "no platform data directory available; set an explicit path".into(),
        }
    })?;
    Ok(dirs
        .data_dir()
        .join(DEFAULT_DB_FILE)
        .to_string_lossy()
        .into_owned())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.llm.model.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "llm.model".into(),
            message: "must not be empty".into(),
        });
    }

    if config.llm.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "llm.request_timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    let urls: &[(&str, &str, bool)] = &[
        ("llm.api_base", config.llm.api_base.as_str(), true),
        (
            "translation.api_base",
            config.translation.api_base.as_str(),
            config.translation.enabled,
        ),
    ];
    for (name, url, required) in urls {
        if *required && !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: format!("must be an http(s) URL, got {url:?}"),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
