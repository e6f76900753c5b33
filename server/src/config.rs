//! Configuration management for the server.

use std::env;
use tether_engine::wire::is_valid_table_name;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Shared secret bearer tokens must carry after the user id
    pub auth_secret: Option<String>,
    /// Tables clients may use; `None` allows any valid name
    pub tables: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        let tables = match env::var("TETHER_TABLES") {
            Ok(list) => Some(parse_tables(&list)?),
            Err(_) => None,
        };

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            tables,
        })
    }

    /// Whether clients may read and write `table`.
    pub fn allows(&self, table: &str) -> bool {
        if !is_valid_table_name(table) {
            return false;
        }
        match &self.tables {
            Some(tables) => tables.iter().any(|t| t == table),
            None => true,
        }
    }
}

/// Parse a comma-separated table allowlist.
fn parse_tables(list: &str) -> Result<Vec<String>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            if is_valid_table_name(name) {
                Ok(name.to_string())
            } else {
                Err(ConfigError::InvalidTable(name.to_string()))
            }
        })
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid table name in TETHER_TABLES: {0}")]
    InvalidTable(String),
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_url: "postgres://localhost/tether_test".into(),
        auth_secret: None,
        tables: None,
    }
}
