//! Server configuration from the environment
//!
//! `.env` is loaded first when present; real environment variables win.

use std::env;
use std::str::FromStr;

use crate::error::LedgerError;
use crate::Result;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Postgres when set, in-memory otherwise
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub session_ttl_hours: i64,
    pub seed_demo_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: None,
            database_max_connections: 5,
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.0-flash".to_string(),
            session_ttl_hours: 24,
            seed_demo_data: true,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| lookup(*k))
                .filter(|v| !v.trim().is_empty())
        };

        Ok(Self {
            port: parse_or(first(&["PORT", "API_PORT"]), "PORT", defaults.port)?,
            database_url: first(&["DATABASE_URL", "POSTGRES_URL"]),
            database_max_connections: parse_or(
                first(&["DATABASE_MAX_CONNECTIONS"]),
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            gemini_api_key: first(&["GEMINI_API_KEY"]).unwrap_or(defaults.gemini_api_key),
            gemini_model: first(&["GEMINI_MODEL"]).unwrap_or(defaults.gemini_model),
            session_ttl_hours: parse_or(
                first(&["SESSION_TTL_HOURS"]),
                "SESSION_TTL_HOURS",
                defaults.session_ttl_hours,
            )?,
            seed_demo_data: match first(&["SEED_DEMO_DATA"]) {
                Some(raw) => parse_bool(&raw, "SEED_DEMO_DATA")?,
                None => defaults.seed_demo_data,
            },
        })
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(value) => value.trim().parse().map_err(|_| {
            LedgerError::InvalidInput(format!("Invalid value for {}: {}", key, value))
        }),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str, key: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(LedgerError::InvalidInput(format!(
            "Invalid value for {}: {}",
            key, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
        assert!(config.seed_demo_data);
        assert_eq!(config.session_ttl_hours, 24);
    }

    #[test]
    fn test_overrides_and_fallback_keys() {
        let config = config_from(&[
            ("API_PORT", "8080"),
            ("POSTGRES_URL", "postgres://localhost/finsight"),
            ("SEED_DEMO_DATA", "off"),
            ("GEMINI_MODEL", "gemini-1.5-pro"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/finsight"));
        assert!(!config.seed_demo_data);
        assert_eq!(config.gemini_model, "gemini-1.5-pro");
    }

    #[test]
    fn test_blank_database_url_means_in_memory() {
        let config = config_from(&[("DATABASE_URL", "  ")]).unwrap();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_invalid_values_fail() {
        assert!(matches!(
            config_from(&[("PORT", "eighty")]),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(config_from(&[("SEED_DEMO_DATA", "maybe")]).is_err());
    }
}
