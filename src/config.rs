use std::env;

use thiserror::Error;

/// Work factors bcrypt accepts.
const BCRYPT_COSTS: std::ops::RangeInclusive<u32> = 4..=31;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is not a valid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Unset means the in-process memory store.
    pub mongo_uri: Option<String>,
    pub database_name: String,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub bcrypt_cost: u32,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_endpoint: String,
    pub frontend_origin: String,
    pub bind_address: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_ttl_hours: i64 = match get("JWT_TTL_HOURS") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "JWT_TTL_HOURS",
                value,
            })?,
            None => 24,
        };
        let bcrypt_cost: u32 = match get("BCRYPT_COST") {
            Some(value) => match value.trim().parse() {
                Ok(cost) if BCRYPT_COSTS.contains(&cost) => cost,
                _ => return Err(ConfigError::Invalid { name: "BCRYPT_COST", value }),
            },
            None => bcrypt::DEFAULT_COST,
        };

        Ok(Self {
            mongo_uri: get("MONGO_URI"),
            database_name: or("DATABASE_NAME", "studymate"),
            jwt_secret: get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            jwt_ttl_hours,
            bcrypt_cost,
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: or("GEMINI_MODEL", "gemini-2.0-flash"),
            gemini_endpoint: or(
                "GEMINI_ENDPOINT",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            frontend_origin: or("FRONTEND_ORIGIN", "http://localhost:3000"),
            bind_address: or("BIND_ADDRESS", "0.0.0.0:8080"),
        })
    }
}
