// Configuration loading and parsing (settings.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::Category;

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
    pub server: ServerConfig,
    pub db_path: String,
    pub llm: LlmConfig,
    pub profile: ProfileConfig,
    pub categories: Vec<Category>,
    pub credentials: CredentialsConfig,
}

impl Config {
    pub fn category_names(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.name.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// settings.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire settings.toml file.
#[derive(Debug, Clone, Deserialize)]
struct SettingsFile {
    server: ServerConfig,
    database: DatabaseSection,
    llm: LlmConfig,
    profile: ProfileConfig,
    #[serde(default)]
    categories: Vec<Category>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub http_port: u16,
    pub live_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub extraction_max_tokens: u32,
    pub receipt_max_tokens: u32,
    pub insight_max_tokens: u32,
}

/// Who is using the app and how amounts are shown. Injected wherever the
/// services need the current user, farm profile, or currency.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    pub user: String,
    pub farm_profile: String,
    pub currency: String,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub anthropic_api_key: Option<String>,
}

/// `database.path` value that selects the platform data directory.
pub const AUTO_DB_PATH: &str = "auto";

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/settings.toml` and
/// (optionally) `config/credentials.toml`, relative to `base_dir`.
///
/// This does not copy defaults; `load_config()` does.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- settings.toml (required) ---
    let settings_path = config_dir.join("settings.toml");
    let settings_text = read_file(&settings_path)?;
    let settings: SettingsFile =
        toml::from_str(&settings_text).map_err(|e| ConfigError::ParseError {
            path: settings_path.clone(),
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

    assemble(settings, credentials)
}

/// Build a validated config from settings.toml text without touching the
/// config directory. Used by tests and embedders.
pub fn config_from_str(
    settings_text: &str,
    credentials: CredentialsConfig,
) -> Result<Config, ConfigError> {
    let settings: SettingsFile =
        toml::from_str(settings_text).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("settings.toml"),
            source: e,
        })?;
    assemble(settings, credentials)
}

fn assemble(settings: SettingsFile, credentials: CredentialsConfig) -> Result<Config, ConfigError> {
    let config = Config {
        server: settings.server,
        db_path: resolve_db_path(&settings.database.path)?,
        llm: settings.llm,
        profile: settings.profile,
        categories: settings.categories,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Load config relative to the current working directory, copying
/// defaults first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

/// Map `"auto"` to `<data dir>/pondledger.db`; other values pass through.
fn resolve_db_path(raw: &str) -> Result<String, ConfigError> {
    if raw != AUTO_DB_PATH {
        return Ok(raw.to_string());
    }
    let dirs = directories::ProjectDirs::from("", "", "pondledger").ok_or_else(|| {
        ConfigError::ValidationError {
            field: "database.path".into(),
            message: "no home directory available to resolve \"auto\"".into(),
        }
    })?;
    let data_dir = dirs.data_dir();
    std::fs::create_dir_all(data_dir).map_err(|e| ConfigError::ValidationError {
        field: "database.path".into(),
        message: format!("failed to create {}: {e}", data_dir.display()),
    })?;
    Ok(data_dir.join("pondledger.db").display().to_string())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.http_port == config.server.live_port {
        return Err(ConfigError::ValidationError {
            field: "server.live_port".into(),
            message: format!("must differ from http_port ({})", config.server.http_port),
        });
    }

    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    let llm = &config.llm;
    let token_fields: &[(&str, u32)] = &[
        ("llm.extraction_max_tokens", llm.extraction_max_tokens),
        ("llm.receipt_max_tokens", llm.receipt_max_tokens),
        ("llm.insight_max_tokens", llm.insight_max_tokens),
    ];
    for (name, val) in token_fields {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be > 0".into(),
            });
        }
    }

    if config.profile.currency.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "profile.currency".into(),
            message: "must not be empty".into(),
        });
    }

    if crate::paths::FarmScope::from_profile(&config.profile.farm_profile).is_err() {
        return Err(ConfigError::ValidationError {
            field: "profile.farm_profile".into(),
            message: format!(
                "`{}` is not usable as a path segment",
                config.profile.farm_profile
            ),
        });
    }

    let mut seen = std::collections::HashSet::new();
    for c in &config.categories {
        if c.name.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: "categories.name".into(),
                message: "must not be empty".into(),
            });
        }
        if !seen.insert(c.name.to_lowercase()) {
            return Err(ConfigError::ValidationError {
                field: "categories.name".into(),
                message: format!("duplicate category `{}`", c.name),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
