use credo_core::AppError;

const DEFAULT_URL: &str = "sqlite://./data/cache.db";

/// Configuration for the cache database pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `CREDO_CACHE_DB_URL` (optional, defaults to `sqlite://./data/cache.db`)
    /// - `CREDO_CACHE_DB_MAX_CONNECTIONS` (optional, defaults to 5)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let url = lookup("CREDO_CACHE_DB_URL")
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_string());

        if !url.starts_with("sqlite:") {
            return Err(AppError::ConfigError(format!(
                "CREDO_CACHE_DB_URL '{url}' is not a sqlite URL"
            )));
        }

        let max_connections = match lookup("CREDO_CACHE_DB_MAX_CONNECTIONS") {
            None => 5,
            Some(raw) => {
                let parsed: u32 = raw.trim().parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid CREDO_CACHE_DB_MAX_CONNECTIONS '{raw}': must be a positive integer"
                    ))
                })?;
                if parsed == 0 {
                    return Err(AppError::ConfigError(
                        "CREDO_CACHE_DB_MAX_CONNECTIONS must be at least 1".into(),
                    ));
                }
                parsed
            }
        };

        Ok(Self {
            url,
            max_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_file() {
        let config = DatabaseConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.url, "sqlite://./data/cache.db");
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn rejects_non_sqlite_and_zero_pool() {
        let bad_url = DatabaseConfig::from_lookup(|k| {
            (k == "CREDO_CACHE_DB_URL").then(|| "postgres://localhost/credo".to_string())
        });
        assert!(matches!(bad_url, Err(AppError::ConfigError(_))));

        let zero = DatabaseConfig::from_lookup(|k| {
            (k == "CREDO_CACHE_DB_MAX_CONNECTIONS").then(|| "0".to_string())
        });
        assert!(matches!(zero, Err(AppError::ConfigError(_))));
    }
}
