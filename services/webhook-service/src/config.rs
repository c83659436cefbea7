use std::{env, str::FromStr, time::Duration};

use mailbridge_common::split_list;
use thiserror::Error;

pub const DEFAULT_POSTHOG_ENDPOINT: &str = "https://app.posthog.com";
pub const DEFAULT_USER_ID_VARIABLE_KEY: &str = "user_id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Immutable settings shared by every request.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub posthog_api_key: String,
    pub posthog_endpoint: String,
    pub posthog_timeout: Duration,
    pub mailgun_domain: String,
    pub mailgun_private_api_key: String,
    pub user_id_variable_key: String,
    pub additional_user_variables: Vec<String>,
    pub port: u16,
}

impl HandlerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset so a stray `FOO=` does not slip through.
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let timeout_secs = parse_or(get("POSTHOG_TIMEOUT_SECS"), "POSTHOG_TIMEOUT_SECS", 10u64)?;

        Ok(Self {
            posthog_api_key: required("POSTHOG_API_KEY")?,
            posthog_endpoint: get("POSTHOG_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_POSTHOG_ENDPOINT.to_string()),
            posthog_timeout: Duration::from_secs(timeout_secs),
            mailgun_domain: required("MAILGUN_DOMAIN")?,
            mailgun_private_api_key: required("MAILGUN_PRIVATE_API_KEY")?,
            user_id_variable_key: get("USER_ID_VARIABLE_KEY")
                .unwrap_or_else(|| DEFAULT_USER_ID_VARIABLE_KEY.to_string()),
            additional_user_variables: get("ADDITIONAL_USER_VARIABLES")
                .map(|value| split_list(&value))
                .unwrap_or_default(),
            port: parse_or(get("PORT"), "PORT", 8080u16)?,
        })
    }
}

fn parse_or<T: FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
