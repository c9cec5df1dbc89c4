use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read secret {path}: {source}")]
    Secret {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub activities_table: String,
    pub edit_close_delay: Duration,
    pub request_timeout: Duration,
    pub client_idle_timeout: Duration,
    pub password_min_length: usize,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `load` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let supabase_url = lookup("SUPABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("SUPABASE_URL"))?;

        let supabase_anon_key = match lookup("SUPABASE_ANON_KEY").filter(|v| !v.trim().is_empty()) {
            Some(key) => key,
            None => match lookup("SUPABASE_ANON_KEY_FILE") {
                Some(path) => read_secret(&path)?,
                None => return Err(ConfigError::Missing("SUPABASE_ANON_KEY")),
            },
        };

        Ok(Self {
            bind_addr: try_load(&lookup, "BIND_ADDR", "127.0.0.1")?,
            port: try_load(&lookup, "RUST_PORT", "8080")?,
            supabase_url,
            supabase_anon_key,
            activities_table: try_load(&lookup, "ACTIVITIES_TABLE", "activities")?,
            edit_close_delay: Duration::from_millis(try_load(&lookup, "EDIT_CLOSE_DELAY_MS", "1500")?),
            request_timeout: Duration::from_secs(try_load(&lookup, "REQUEST_TIMEOUT_SECS", "30")?),
            client_idle_timeout: Duration::from_secs(try_load(
                &lookup,
                "CLIENT_IDLE_TIMEOUT_SECS",
                "3600",
            )?),
            password_min_length: try_load(&lookup, "PASSWORD_MIN_LENGTH", "6")?,
        })
    }
}

fn try_load<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let value = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.trim().parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            value: value.clone(),
            reason: e.to_string(),
        }
    })
}

fn read_secret(path: &str) -> Result<String, ConfigError> {
    read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| ConfigError::Secret {
            path: path.to_string(),
            source,
        })
}
