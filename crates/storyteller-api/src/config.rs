//! Server configuration read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;

use chrono::TimeDelta;
use storyteller_core::config::StoryConfig;

use crate::error::AppError;

/// Everything the server needs at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// PostgreSQL URL; the in-memory store is used when absent.
    pub database_url: Option<String>,
    /// Story tunables.
    pub story: StoryConfig,
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{name} is invalid: {e}"))),
    }
}

impl ServerConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is set but invalid.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns a variable's
    /// value or `None` when it is unset.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is set but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned());
        let port = parse_var(&lookup, "PORT", 3000_u16)?;
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let page_size = parse_var(&lookup, "STORY_PAGE_SIZE", StoryConfig::DEFAULT_PAGE_SIZE)?;
        let lock_seconds = parse_var(
            &lookup,
            "STORY_LOCK_SECONDS",
            StoryConfig::DEFAULT_LOCK_SECONDS,
        )?;
        let votes_required = parse_var(
            &lookup,
            "STORY_VOTES_REQUIRED",
            StoryConfig::DEFAULT_VOTES_REQUIRED,
        )?;
        let lock_duration = TimeDelta::try_seconds(lock_seconds).ok_or_else(|| {
            AppError::Config(format!("STORY_LOCK_SECONDS is out of range: {lock_seconds}"))
        })?;
        let story = StoryConfig::new(page_size, lock_duration, votes_required)
            .map_err(|e| AppError::Config(e.to_string()))?;

        Ok(Self {
            host,
            port,
            database_url,
            story,
        })
    }

    /// The socket address to listen on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `HOST:PORT` is not a valid address.
    pub fn listen_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }
}
