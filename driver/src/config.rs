//! Client configuration.
//!
//! A [`ClientConfig`] is assembled once, either through the builder or from
//! `POSTHOG_*` environment variables, and never changes afterwards.

use std::fmt;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::error::{DriverError, DriverResult};
use crate::retry::RetryPolicy;
use crate::throttle::ThrottleConfig;

pub const DEFAULT_API_URL: &str = "https://us.posthog.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub const ENV_PERSONAL_API_KEY: &str = "POSTHOG_PERSONAL_API_KEY";
pub const ENV_PROJECT_API_KEY: &str = "POSTHOG_PROJECT_API_KEY";
pub const ENV_PROJECT_ID: &str = "POSTHOG_PROJECT_ID";
pub const ENV_API_URL: &str = "POSTHOG_API_URL";
pub const ENV_CAPTURE_URL: &str = "POSTHOG_CAPTURE_URL";
pub const ENV_TIMEOUT_SECS: &str = "POSTHOG_TIMEOUT_SECS";
pub const ENV_MAX_RETRIES: &str = "POSTHOG_MAX_RETRIES";

/// A credential whose value never shows up in `Debug` output.
#[derive(Clone)]
pub struct ApiKey(Zeroizing<String>);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// PostHog Cloud regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Us,
    Eu
}

impl Region {
    pub fn api_url(self) -> &'static str {
        match self {
            Self::Us => "https://us.posthog.com",
            Self::Eu => "https://eu.posthog.com"
        }
    }
}

/// Derives the ingestion host from the API host: PostHog Cloud serves
/// capture from `*.i.posthog.com`; any other host (self-hosted) is used
/// unchanged.
pub fn derive_capture_url(api_url: &str) -> String {
    const CLOUD_DOMAIN: &str = "posthog.com";

    let Ok(mut url) = reqwest::Url::parse(api_url) else {
        return api_url.to_string();
    };
    let Some(host) = url.host_str() else {
        return api_url.to_string();
    };

    let prefix = if host == CLOUD_DOMAIN {
        ""
    } else if let Some(prefix) = host.strip_suffix(".posthog.com") {
        if prefix == "i" || prefix.ends_with(".i") {
            return api_url.to_string();
        }
        prefix
    } else {
        return api_url.to_string();
    };

    let capture_host = if prefix.is_empty() {
        format!("i.{CLOUD_DOMAIN}")
    } else {
        format!("{prefix}.i.{CLOUD_DOMAIN}")
    };
    if url.set_host(Some(&capture_host)).is_err() {
        return api_url.to_string();
    }
    url.as_str().trim_end_matches('/').to_string()
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST/query API, without trailing slash.
    pub api_url: String,
    /// Base URL of the capture/flags endpoints, without trailing slash.
    pub capture_url: String,
    /// Read-scoped credential sent as a bearer token.
    pub personal_api_key: ApiKey,
    /// Write-scoped credential embedded in capture payloads.
    pub project_api_key: Option<ApiKey>,
    pub project_id: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Client-side throttling; disabled when `None`.
    pub throttle: Option<ThrottleConfig>,
    pub user_agent: String
}

impl ClientConfig {
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Loads configuration from `POSTHOG_*` environment variables.
    ///
    /// - `POSTHOG_PERSONAL_API_KEY` (required)
    /// - `POSTHOG_PROJECT_ID` (required)
    /// - `POSTHOG_PROJECT_API_KEY` (required only for capture and flags)
    /// - `POSTHOG_API_URL` (default `https://us.posthog.com`)
    /// - `POSTHOG_CAPTURE_URL` (default derived from the API URL)
    /// - `POSTHOG_TIMEOUT_SECS` (default 30)
    /// - `POSTHOG_MAX_RETRIES` (default 3)
    pub fn from_env() -> DriverResult<Self> {
        let mut builder = Self::builder();

        if let Some(key) = env_var(ENV_PERSONAL_API_KEY) {
            builder = builder.personal_api_key(key);
        }
        if let Some(key) = env_var(ENV_PROJECT_API_KEY) {
            builder = builder.project_api_key(key);
        }
        if let Some(id) = env_var(ENV_PROJECT_ID) {
            builder = builder.project_id(id);
        }
        if let Some(url) = env_var(ENV_API_URL) {
            builder = builder.api_url(url);
        }
        if let Some(url) = env_var(ENV_CAPTURE_URL) {
            builder = builder.capture_url(url);
        }
        if let Some(secs) = parse_env::<u64>(ENV_TIMEOUT_SECS)? {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(retries) = parse_env::<u32>(ENV_MAX_RETRIES)? {
            builder = builder.max_retries(retries);
        }

        builder.build()
    }

    pub fn max_retries(&self) -> u32 {
        self.retry.max_retries
    }

    pub fn has_project_api_key(&self) -> bool {
        self.project_api_key.is_some()
    }

    /// Upper bound on the duration of one logical call.
    pub fn worst_case_latency(&self) -> Duration {
        self.retry.worst_case_latency(self.timeout)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> DriverResult<Option<T>> {
    env_var(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| DriverError::Configuration(format!("{name} is not a valid number: {raw}")))
        })
        .transpose()
}

/// Builder for `ClientConfig`.
#[derive(Default)]
pub struct ClientConfigBuilder {
    api_url: Option<String>,
    capture_url: Option<String>,
    personal_api_key: Option<ApiKey>,
    project_api_key: Option<ApiKey>,
    project_id: Option<String>,
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    max_retries: Option<u32>,
    throttle: Option<ThrottleConfig>,
    user_agent: Option<String>
}

impl ClientConfigBuilder {
    #[must_use]
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn region(self, region: Region) -> Self {
        self.api_url(region.api_url())
    }

    /// Overrides the capture host instead of deriving it from the API URL.
    #[must_use]
    pub fn capture_url(mut self, url: impl Into<String>) -> Self {
        self.capture_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn personal_api_key(mut self, key: impl Into<String>) -> Self {
        self.personal_api_key = Some(ApiKey::new(key));
        self
    }

    #[must_use]
    pub fn project_api_key(mut self, key: impl Into<String>) -> Self {
        self.project_api_key = Some(ApiKey::new(key));
        self
    }

    #[must_use]
    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.project_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Replaces the whole retry policy. A later `max_retries` call still
    /// overrides the attempt count.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    #[must_use]
    pub fn throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = Some(throttle);
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> DriverResult<ClientConfig> {
        let personal_api_key = self
            .personal_api_key
            .filter(|k| !k.is_blank())
            .ok_or_else(|| {
                DriverError::Configuration(format!(
                    "personal API key is required (set {ENV_PERSONAL_API_KEY})"
                ))
            })?;

        let project_id = self
            .project_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                DriverError::Configuration(format!("project id is required (set {ENV_PROJECT_ID})"))
            })?;

        let project_api_key = self.project_api_key.filter(|k| !k.is_blank());

        let api_url = normalize_url(
            "api_url",
            self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
        )?;
        let capture_url = match self.capture_url.as_deref() {
            Some(url) => normalize_url("capture_url", url)?,
            None => derive_capture_url(&api_url)
        };

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(DriverError::Configuration(
                "timeout must be greater than zero".to_string()
            ));
        }

        let mut retry = self.retry.unwrap_or_default();
        if let Some(max_retries) = self.max_retries {
            retry.max_retries = max_retries;
        }
        if retry.max_retries == 0 {
            return Err(DriverError::Configuration(
                "max_retries must allow at least one attempt".to_string()
            ));
        }
        if retry.base_backoff > retry.max_backoff {
            return Err(DriverError::Configuration(
                "base backoff must not exceed the backoff cap".to_string()
            ));
        }

        Ok(ClientConfig {
            api_url,
            capture_url,
            personal_api_key,
            project_api_key,
            project_id,
            timeout,
            retry,
            throttle: self.throttle,
            user_agent: self
                .user_agent
                .unwrap_or_else(|| format!("posthog-driver-rs/{}", env!("CARGO_PKG_VERSION")))
        })
    }
}

fn normalize_url(field: &str, raw: &str) -> DriverResult<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|e| DriverError::Configuration(format!("{field} is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DriverError::Configuration(format!(
            "{field} must use http or https"
        )));
    }
    Ok(trimmed.to_string())
}
