//! Environment-driven knobs for the reference HTTP adapter (spec §6):
//! a port, a storage connection string, and a debug-endpoint flag. Not
//! part of the core — these three scalars don't warrant a config crate.

use std::env;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub port: u16,
    pub database_url: String,
    pub enable_debug_endpoints: bool,
}

impl HttpConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string()),
            enable_debug_endpoints: env::var("ENABLE_DEBUG_ENDPOINTS")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}
