//! Environment configuration.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

const DEV_ACCESS_SECRET: &str = "dev-access-secret";
const DEV_REFRESH_SALT: &str = "dev-refresh-salt";

pub const MAX_ACCESS_TOKEN_TTL_MINUTES: i64 = 24 * 60;
pub const MAX_REFRESH_TOKEN_TTL_DAYS: i64 = 365;

#[derive(Clone)]
pub struct ApiConfig {
    pub jwt_access_secret: String,
    pub refresh_token_salt: String,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl_days: i64,
    pub cookie_secure: bool,
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub session_sweep_interval: Duration,
}

impl ApiConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Missing secrets fall
    /// back to insecure development values with a warning; malformed numbers fail.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_access_secret = get("JWT_ACCESS_SECRET").unwrap_or_else(|| {
            warn!("JWT_ACCESS_SECRET not set; using insecure dev default");
            DEV_ACCESS_SECRET.to_string()
        });
        let refresh_token_salt = get("REFRESH_TOKEN_SALT").unwrap_or_else(|| {
            warn!("REFRESH_TOKEN_SALT not set; using insecure dev default");
            DEV_REFRESH_SALT.to_string()
        });

        let access_minutes: i64 = parse_or(get("ACCESS_TOKEN_TTL_MINUTES"), "ACCESS_TOKEN_TTL_MINUTES", 15)?;
        let refresh_days: i64 = parse_or(get("REFRESH_TOKEN_TTL_DAYS"), "REFRESH_TOKEN_TTL_DAYS", 7)?;
        let cookie_secure: bool = parse_or(get("COOKIE_SECURE"), "COOKIE_SECURE", false)?;
        let bind_addr: SocketAddr = parse_or(get("BIND_ADDR"), "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 4000)))?;
        let sweep_secs: u64 = parse_or(get("SESSION_SWEEP_INTERVAL_SECS"), "SESSION_SWEEP_INTERVAL_SECS", 3600)?;

        anyhow::ensure!(
            (1..=MAX_ACCESS_TOKEN_TTL_MINUTES).contains(&access_minutes),
            "ACCESS_TOKEN_TTL_MINUTES must be between 1 and {MAX_ACCESS_TOKEN_TTL_MINUTES}"
        );
        anyhow::ensure!(
            (1..=MAX_REFRESH_TOKEN_TTL_DAYS).contains(&refresh_days),
            "REFRESH_TOKEN_TTL_DAYS must be between 1 and {MAX_REFRESH_TOKEN_TTL_DAYS}"
        );
        anyhow::ensure!(sweep_secs > 0, "SESSION_SWEEP_INTERVAL_SECS must be positive");

        Ok(Self {
            jwt_access_secret,
            refresh_token_salt,
            access_token_ttl: chrono::Duration::minutes(access_minutes),
            refresh_token_ttl_days: refresh_days,
            cookie_secure,
            bind_addr,
            database_url: get("DATABASE_URL"),
            session_sweep_interval: Duration::from_secs(sweep_secs),
        })
    }

    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.refresh_token_ttl_days)
    }

    /// Development/test configuration: dev secrets, in-memory store.
    pub fn for_tests() -> Self {
        Self {
            jwt_access_secret: DEV_ACCESS_SECRET.to_string(),
            refresh_token_salt: DEV_REFRESH_SALT.to_string(),
            access_token_ttl: chrono::Duration::minutes(15),
            refresh_token_ttl_days: 7,
            cookie_secure: false,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url: None,
            session_sweep_interval: Duration::from_secs(3600),
        }
    }
}

impl core::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl_days", &self.refresh_token_ttl_days)
            .field("cookie_secure", &self.cookie_secure)
            .field("bind_addr", &self.bind_addr)
            .field("database", &self.database_url.as_ref().map(|_| "<postgres>"))
            .field("session_sweep_interval", &self.session_sweep_interval)
            .finish_non_exhaustive()
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(v) => v.trim().parse().with_context(|| format!("invalid {key}: {v:?}")),
        None => Ok(default),
    }
}
