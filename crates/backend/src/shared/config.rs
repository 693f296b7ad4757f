use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::shared::kpi_engine::value::offset_from_minutes;
use crate::shared::kpi_engine::EngineSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

/// Секция `[engine]`
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Смещение часового пояса компании относительно UTC, в минутах
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_max_parallel_components")]
    pub max_parallel_components: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            query_timeout_ms: default_query_timeout_ms(),
            max_parallel_components: default_max_parallel_components(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_query_timeout_ms() -> u64 {
    5000
}

fn default_max_parallel_components() -> usize {
    4
}

impl EngineConfig {
    pub fn to_settings(&self) -> anyhow::Result<EngineSettings> {
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            anyhow::bail!("engine.utc_offset_minutes out of range: {}", self.utc_offset_minutes);
        }
        if self.max_parallel_components == 0 {
            anyhow::bail!("engine.max_parallel_components must be at least 1");
        }
        Ok(EngineSettings {
            utc_offset: offset_from_minutes(self.utc_offset_minutes),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            max_parallel_components: self.max_parallel_components,
        })
    }
}

/// Default configuration embedded in the binary
const DEFAULT_CONFIG: &str = r#"
[database]
path = "target/db/app.db"

[server]
port = 3000

[engine]
utc_offset_minutes = 0
query_timeout_ms = 5000
max_parallel_components = 4
"#;

static ENGINE_SETTINGS: OnceCell<EngineSettings> = OnceCell::new();

/// Load configuration from config.toml file
///
/// Search order:
/// 1. Next to the executable (for production)
/// 2. Falls back to embedded default config
pub fn load_config() -> anyhow::Result<Config> {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let config_path = exe_dir.join("config.toml");

            if config_path.exists() {
                tracing::info!("Loading config from: {}", config_path.display());
                let contents = std::fs::read_to_string(&config_path)?;
                let config: Config = toml::from_str(&contents)?;
                return Ok(config);
            } else {
                tracing::warn!("config.toml not found at: {}", config_path.display());
            }
        }
    }

    tracing::info!("Using default embedded configuration");
    let config: Config = toml::from_str(DEFAULT_CONFIG)?;
    Ok(config)
}

/// Get the database file path from configuration
/// Resolves relative paths relative to the executable directory
pub fn get_database_path(config: &Config) -> anyhow::Result<PathBuf> {
    let db_path = Path::new(&config.database.path);

    if db_path.is_absolute() {
        return Ok(db_path.to_path_buf());
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            return Ok(exe_dir.join(db_path));
        }
    }

    Ok(PathBuf::from(&config.database.path))
}

/// Запомнить параметры движка (один раз при старте)
pub fn init_engine_settings(config: &Config) -> anyhow::Result<()> {
    let settings = config.engine.to_settings()?;
    ENGINE_SETTINGS
        .set(settings)
        .map_err(|_| anyhow::anyhow!("Engine settings are already initialized"))
}

/// Параметры движка; до инициализации - значения по умолчанию
pub fn engine_settings() -> EngineSettings {
    ENGINE_SETTINGS.get().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_loads() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.database.path, "target/db/app.db");
        assert_eq!(config.server.port, 3000);
        let settings = config.engine.to_settings().unwrap();
        assert_eq!(settings.query_timeout, Duration::from_millis(5000));
        assert_eq!(settings.max_parallel_components, 4);
        assert_eq!(settings.utc_offset.local_minus_utc(), 0);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: Config = toml::from_str("[database]\npath = \"kpi.db\"\n[engine]\nutc_offset_minutes = -300\n").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.engine.query_timeout_ms, 5000);
        let settings = config.engine.to_settings().unwrap();
        assert_eq!(settings.utc_offset.local_minus_utc(), -300 * 60);
    }

    #[test]
    fn test_invalid_engine_settings_are_rejected() {
        let mut engine = EngineConfig::default();
        engine.utc_offset_minutes = 24 * 60;
        assert!(engine.to_settings().is_err());

        let engine = EngineConfig {
            max_parallel_components: 0,
            ..EngineConfig::default()
        };
        assert!(engine.to_settings().is_err());
    }
}
