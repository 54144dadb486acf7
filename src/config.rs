use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub claim: ClaimConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub sqlx_logging: bool,
}

/// Which claim strategy to use. `Auto` picks from the connected backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStrategyKind {
    #[default]
    Auto,
    SkipLocked,
    AtomicUpdate,
}

impl FromStr for ClaimStrategyKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "skip_locked" => Ok(Self::SkipLocked),
            "atomic_update" => Ok(Self::AtomicUpdate),
            other => Err(AppError::ConfigError(format!(
                "unknown claim strategy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    #[serde(default)]
    pub strategy: ClaimStrategyKind,
    #[serde(default = "default_claim_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            strategy: ClaimStrategyKind::Auto,
            timeout_ms: default_claim_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_claim_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_batch_size() -> u64 {
    50
}

fn default_concurrency() -> usize {
    4
}

/// Builds a connection URL from the individual `DB_*` settings.
///
/// `db_type` accepts `postgres`/`postgresql` and `sqlite`/`sqlite3`; anything
/// else falls back to SQLite, where `name` is the database file path.
pub fn build_database_url(
    db_type: &str,
    host: &str,
    port: &str,
    name: &str,
    user: &str,
    password: &str,
    ssl_mode: &str,
) -> String {
    match db_type.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => format!(
            "postgres://{user}:{password}@{host}:{port}/{name}?sslmode={ssl_mode}"
        ),
        _ => {
            if name == ":memory:" {
                "sqlite::memory:".to_string()
            } else {
                format!("sqlite://{name}?mode=rwc")
            }
        }
    }
}

fn get_env(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn get_env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn database_url_from_env() -> String {
    if let Some(url) = get_env("DATABASE_URL").or_else(|| get_env("DB_DSN")) {
        return url;
    }
    build_database_url(
        &get_env("DB_TYPE").unwrap_or_else(|| "sqlite".to_string()),
        &get_env("DB_HOST").unwrap_or_else(|| "localhost".to_string()),
        &get_env("DB_PORT").unwrap_or_else(|| "5432".to_string()),
        &get_env("DB_NAME").unwrap_or_else(|| "shop.db".to_string()),
        &get_env("DB_USER").unwrap_or_default(),
        &get_env("DB_PASSWORD").unwrap_or_default(),
        &get_env("DB_SSL_MODE").unwrap_or_else(|| "disable".to_string()),
    )
}

impl Config {
    pub fn from_toml() -> AppResult<Self> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 配置文件不存在时完全依赖环境变量
        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(config_str) => Self::parse(&config_str)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Config {
                database: DatabaseConfig {
                    url: database_url_from_env(),
                    max_connections: get_env_parse(
                        "DB_MAX_CONNECTIONS",
                        default_max_connections(),
                    ),
                    sqlx_logging: get_env_parse("DB_SQLX_LOGGING", false),
                },
                claim: ClaimConfig::default(),
                worker: WorkerConfig::default(),
            },
            Err(e) => {
                return Err(AppError::ConfigError(format!(
                    "failed to read config file {config_path}: {e}"
                )));
            }
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn parse(config_str: &str) -> AppResult<Self> {
        toml::from_str(config_str)
            .map_err(|e| AppError::ConfigError(format!("failed to parse config file: {e}")))
    }

    // 环境变量覆盖（即便文件存在时也覆盖）
    fn apply_env_overrides(&mut self) -> AppResult<()> {
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            self.database.max_connections = mc;
        }
        if let Ok(v) = env::var("DB_SQLX_LOGGING")
            && let Ok(b) = v.parse()
        {
            self.database.sqlx_logging = b;
        }
        if let Ok(v) = env::var("CLAIM_STRATEGY") {
            self.claim.strategy = v.parse()?;
        }
        if let Ok(v) = env::var("CLAIM_TIMEOUT_MS")
            && let Ok(n) = v.parse()
        {
            self.claim.timeout_ms = n;
        }
        if let Ok(v) = env::var("WORKER_POLL_INTERVAL_SECS")
            && let Ok(n) = v.parse()
        {
            self.worker.poll_interval_secs = n;
        }
        if let Ok(v) = env::var("WORKER_BATCH_SIZE")
            && let Ok(n) = v.parse()
        {
            self.worker.batch_size = n;
        }
        if let Ok(v) = env::var("WORKER_CONCURRENCY")
            && let Ok(n) = v.parse()
        {
            self.worker.concurrency = n;
        }
        Ok(())
    }
}
