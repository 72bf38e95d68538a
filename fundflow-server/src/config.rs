use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::state_machine::{EngineConfig, StoreRetry};

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Optional bearer token for the API.
    /// If set, every route except /health must include `Authorization: Bearer <token>`.
    /// If not set, callers are trusted on their `X-Actor-*` headers alone.
    pub api_auth_token: Option<String>,
    /// Attempts for each store call that fails transiently (busy or locked).
    pub store_retry_attempts: u32,
    pub store_retry_backoff: Duration,
    /// Re-runs of a transition that lost a version race.
    pub conflict_retry_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let api_auth_token = parse_api_auth_token(env::var("API_AUTH_TOKEN").ok());

        let defaults = EngineConfig::default();

        let store_retry_attempts = parse_attempts(
            env::var("STORE_RETRY_ATTEMPTS").ok(),
            defaults.store_retry.attempts,
        )
        .context("STORE_RETRY_ATTEMPTS must be a positive number")?;

        let store_retry_backoff = match env::var("STORE_RETRY_BACKOFF_MS") {
            Ok(ms) => Duration::from_millis(
                ms.parse::<u64>()
                    .context("STORE_RETRY_BACKOFF_MS must be a valid number")?,
            ),
            Err(_) => defaults.store_retry.backoff,
        };

        let conflict_retry_attempts = parse_attempts(
            env::var("CONFLICT_RETRY_ATTEMPTS").ok(),
            defaults.conflict_retry_attempts,
        )
        .context("CONFLICT_RETRY_ATTEMPTS must be a positive number")?;

        Ok(Config {
            port,
            state_dir,
            api_auth_token,
            store_retry_attempts,
            store_retry_backoff,
            conflict_retry_attempts,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("fundflow-state.db")
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            store_retry: StoreRetry {
                attempts: self.store_retry_attempts,
                backoff: self.store_retry_backoff,
            },
            conflict_retry_attempts: self.conflict_retry_attempts,
        }
    }
}

/// Parse API_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace,
/// so an empty token never turns into a token that matches `Bearer `.
pub fn parse_api_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse a retry count. Missing means `default`; zero is rejected.
fn parse_attempts(value: Option<String>, default: u32) -> Result<u32> {
    let Some(value) = value else {
        return Ok(default);
    };
    let attempts = value.trim().parse::<u32>()?;
    anyhow::ensure!(attempts > 0, "retry count must be at least 1");
    Ok(attempts)
}
