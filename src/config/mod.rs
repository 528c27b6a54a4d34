use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// TTL and capacity for one cache instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub capacity: usize,
}

/// Settings for the three graph caches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Issue graphs keyed by category.
    pub graph: CacheSettings,
    /// Rendered issue trees keyed by category.
    pub tree: CacheSettings,
    /// Small high-churn aggregates (issue list).
    pub aggregate: CacheSettings,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            graph: CacheSettings {
                ttl_secs: 600,
                capacity: 50,
            },
            tree: CacheSettings {
                ttl_secs: 600,
                capacity: 50,
            },
            aggregate: CacheSettings {
                ttl_secs: 300,
                capacity: 10,
            },
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/troubleshoot.db"),
            max_connections: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = DatabaseConfig::default();
        let database = DatabaseConfig {
            path: env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_connections),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let base = CacheConfig::default();
        let cache = CacheConfig {
            graph: cache_settings("GRAPH_CACHE", base.graph)?,
            tree: cache_settings("TREE_CACHE", base.tree)?,
            aggregate: cache_settings("AGGREGATE_CACHE", base.aggregate)?,
        };

        Ok(Config {
            database,
            logging,
            cache,
        })
    }
}

/// Read `<PREFIX>_TTL_SECS` / `<PREFIX>_CAPACITY`, falling back to defaults.
fn cache_settings(prefix: &str, default: CacheSettings) -> Result<CacheSettings, AppError> {
    let ttl_secs = env::var(format!("{prefix}_TTL_SECS"))
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default.ttl_secs);
    let capacity = env::var(format!("{prefix}_CAPACITY"))
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default.capacity);

    if ttl_secs == 0 {
        return Err(AppError::Config {
            message: format!("{prefix}_TTL_SECS must be greater than zero"),
        });
    }
    if capacity == 0 {
        return Err(AppError::Config {
            message: format!("{prefix}_CAPACITY must be greater than zero"),
        });
    }

    Ok(CacheSettings { ttl_secs, capacity })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.graph.ttl_secs, 600);
        assert_eq!(config.graph.capacity, 50);
        assert_eq!(config.tree, config.graph);
        assert_eq!(config.aggregate.ttl_secs, 300);
        assert_eq!(config.aggregate.capacity, 10);
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 5);
        assert!(config.path.ends_with("troubleshoot.db"));
    }
}
