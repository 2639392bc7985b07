//! Configuration module for environment variable parsing.
//!
//! Everything that is not a per-run command line flag (credential locations,
//! retry policy, provider endpoints) is read from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::send::RetryPolicy;

pub const DEFAULT_GMAIL_API_URL: &str = "https://gmail.googleapis.com";
pub const DEFAULT_OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// OAuth client secrets downloaded from Google Cloud Console
    pub credentials_file: PathBuf,

    /// Cached OAuth token, written after the first successful authorization
    pub token_file: PathBuf,

    /// Attempts per message for transient provider errors
    pub max_attempts: u32,

    /// First backoff delay in milliseconds; doubled before each further retry
    pub backoff_base_ms: u64,

    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Base URL of the Gmail REST API
    pub gmail_api_url: String,

    /// OAuth token endpoint used for code exchange and refresh
    pub oauth_token_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            credentials_file: PathBuf::from("credentials.json"),
            token_file: PathBuf::from("token.json"),
            max_attempts: 3,
            backoff_base_ms: 1000,
            request_timeout_ms: 30_000,
            gmail_api_url: DEFAULT_GMAIL_API_URL.to_string(),
            oauth_token_url: DEFAULT_OAUTH_TOKEN_URL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            credentials_file: env::var("BULKMAILER_CREDENTIALS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.credentials_file),

            token_file: env::var("BULKMAILER_TOKEN_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.token_file),

            max_attempts: parse_number("BULKMAILER_MAX_ATTEMPTS", defaults.max_attempts),

            backoff_base_ms: parse_number("BULKMAILER_BACKOFF_BASE_MS", defaults.backoff_base_ms),

            request_timeout_ms: parse_number(
                "BULKMAILER_REQUEST_TIMEOUT_MS",
                defaults.request_timeout_ms,
            ),

            gmail_api_url: env::var("BULKMAILER_GMAIL_API_URL")
                .unwrap_or(defaults.gmail_api_url),

            oauth_token_url: env::var("BULKMAILER_OAUTH_TOKEN_URL")
                .unwrap_or(defaults.oauth_token_url),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_base_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Parse a numeric variable, falling back to `default` when unset or malformed.
fn parse_number<T: FromStr + Copy>(name: &str, default: T) -> T {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid number, using default");
            default
        }
    }
}
