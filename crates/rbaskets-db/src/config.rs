use std::time::Duration;

use rbaskets_core::AppError;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    /// - `DATABASE_ACQUIRE_TIMEOUT_SECS` (optional, defaults to 30)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL").ok_or_else(|| {
            AppError::ConfigError("DATABASE_URL not set. Required for database operations.".into())
        })?;

        let mut config = Self::new(url);
        if let Some(raw) = lookup("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = parse_positive("DATABASE_MAX_CONNECTIONS", &raw)?;
        }
        if let Some(raw) = lookup("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            let secs: u32 = parse_positive("DATABASE_ACQUIRE_TIMEOUT_SECS", &raw)?;
            config.acquire_timeout = Duration::from_secs(secs.into());
        }

        Ok(config)
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<u32, AppError> {
    let parsed: u32 = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!(
            "Invalid {key} '{raw}': must be a positive integer"
        ))
    })?;
    if parsed == 0 {
        return Err(AppError::ConfigError(format!("{key} must be at least 1")));
    }
    Ok(parsed)
}
