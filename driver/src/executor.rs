//! Authenticated HTTP calls with bounded retry.
//!
//! One logical request runs through this state machine:
//!
//! ```text
//! ATTEMPT(n) -> 2xx                       -> Ok(response)
//!            -> 401 / 403                 -> Err(Authentication)
//!            -> 404                       -> Err(NotFound)
//!            -> other 4xx                 -> Err(Request)
//!            -> 429 / 5xx / network error -> n < max_retries ? sleep(backoff) -> ATTEMPT(n+1)
//!                                                            : Err(RateLimited | Transient)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ApiErrorBody, DriverError, DriverResult};
use crate::retry::parse_retry_after;
use crate::telemetry::{RequestTimer, Telemetry};
use crate::throttle::{RateClass, Throttle};

/// Which base URL a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    /// REST and query API; authenticated with the personal API key.
    Api,
    /// Capture and flag endpoints; the project key travels in the body.
    Capture
}

/// One logical API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub host: Host,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub rate_class: RateClass
}

impl ApiRequest {
    fn new(method: Method, host: Host, path: impl Into<String>, rate_class: RateClass) -> Self {
        Self {
            method,
            host,
            path: path.into(),
            query: Vec::new(),
            body: None,
            rate_class
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, Host::Api, path, RateClass::Crud)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, Host::Api, path, RateClass::Crud).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, Host::Api, path, RateClass::Crud).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, Host::Api, path, RateClass::Crud)
    }

    /// POST against the capture host.
    pub fn capture(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, Host::Capture, path, RateClass::Capture).with_body(body)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_rate_class(mut self, rate_class: RateClass) -> Self {
        self.rate_class = rate_class;
        self
    }
}

/// A successful response. `body` is `None` when the payload was empty or not
/// JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>
}

impl ApiResponse {
    /// The decoded body, for operations that cannot do without one.
    pub fn require_json(self, operation: &str) -> DriverResult<Value> {
        self.body.ok_or_else(|| {
            DriverError::Decode(format!(
                "{operation}: expected a JSON body in the HTTP {} response",
                self.status
            ))
        })
    }
}

enum Attempt {
    Done(ApiResponse),
    Fatal(DriverError),
    Retry {
        error: DriverError,
        retry_after: Option<Duration>,
        reason: &'static str
    }
}

impl Attempt {
    fn outcome(&self) -> &'static str {
        match self {
            Self::Done(_) => "success",
            Self::Fatal(err) => err.kind(),
            Self::Retry { reason, .. } => *reason
        }
    }
}

/// Executes [`ApiRequest`]s over one pooled HTTP session.
///
/// The underlying `reqwest::Client` is safe to share across tasks; the
/// executor holds no other mutable state besides the optional throttle.
pub struct RequestExecutor {
    http: Client,
    config: Arc<ClientConfig>,
    throttle: Option<Throttle>,
    shutdown: CancellationToken
}

impl RequestExecutor {
    pub fn new(config: Arc<ClientConfig>) -> DriverResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(|e| DriverError::Configuration(format!("failed to build HTTP client: {e}")))?;

        let throttle = config.throttle.map(Throttle::new);

        Ok(Self {
            http,
            config,
            throttle,
            shutdown: CancellationToken::new()
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Cancels every in-flight and future call made through this executor.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Runs `request` to completion, retrying transient failures.
    pub async fn execute(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken
    ) -> DriverResult<ApiResponse> {
        let method = request.method.as_str();
        let max_attempts = self.config.retry.max_retries.max(1);
        let mut attempt = 1;

        loop {
            // Every attempt, retries included, is charged to the window.
            if let Some(throttle) = &self.throttle {
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => return Err(DriverError::Cancelled),
                    acquired = throttle.acquire(request.rate_class, cancel) => acquired?,
                }
            }

            let timer = RequestTimer::new(method);
            let outcome = tokio::select! {
                biased;
                () = self.cancelled(cancel) => {
                    debug!(method, path = %request.path, attempt, "Request cancelled");
                    Telemetry::record_attempt(method, "cancelled");
                    return Err(DriverError::Cancelled);
                }
                outcome = self.attempt(request, attempt) => outcome,
            };
            let latency_ms = timer.finish();
            Telemetry::record_attempt(method, outcome.outcome());

            match outcome {
                Attempt::Done(response) => {
                    debug!(
                        method,
                        path = %request.path,
                        attempt,
                        status = response.status,
                        latency_ms,
                        "PostHog request succeeded"
                    );
                    return Ok(response);
                }
                Attempt::Fatal(error) => {
                    warn!(
                        method,
                        path = %request.path,
                        attempt,
                        outcome = error.kind(),
                        latency_ms,
                        error = %error,
                        "PostHog request failed"
                    );
                    return Err(error);
                }
                Attempt::Retry {
                    error,
                    retry_after,
                    reason
                } => {
                    if attempt >= max_attempts {
                        warn!(
                            method,
                            path = %request.path,
                            attempt,
                            outcome = reason,
                            latency_ms,
                            error = %error,
                            "PostHog request failed, retries exhausted"
                        );
                        return Err(error);
                    }

                    let delay = self.config.retry.delay_for(attempt, retry_after);
                    warn!(
                        method,
                        path = %request.path,
                        attempt,
                        outcome = reason,
                        latency_ms,
                        delay_ms = delay.as_millis() as u64,
                        "PostHog request failed, retrying"
                    );
                    Telemetry::record_retry(reason);

                    tokio::select! {
                        biased;
                        () = self.cancelled(cancel) => return Err(DriverError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn cancelled(&self, cancel: &CancellationToken) {
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = cancel.cancelled() => {}
        }
    }

    async fn attempt(&self, request: &ApiRequest, attempt: u32) -> Attempt {
        let base = match request.host {
            Host::Api => &self.config.api_url,
            Host::Capture => &self.config.capture_url
        };
        let url = format!("{base}{}", request.path);

        let mut builder = self.http.request(request.method.clone(), &url);
        if request.host == Host::Api {
            builder = builder.bearer_auth(self.config.personal_api_key.expose());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        match builder.send().await {
            Ok(response) => self.classify_response(request, response, attempt).await,
            Err(err) => self.classify_transport_error(err, attempt)
        }
    }

    fn classify_transport_error(&self, err: reqwest::Error, attempt: u32) -> Attempt {
        if err.is_builder() {
            return Attempt::Fatal(DriverError::Configuration(format!(
                "invalid request: {}",
                err.without_url()
            )));
        }

        let (message, reason) = if err.is_timeout() {
            (
                format!("request timed out after {}s", self.config.timeout.as_secs_f64()),
                "timeout"
            )
        } else if err.is_connect() {
            (format!("connection failed: {}", err.without_url()), "connect")
        } else {
            (format!("network error: {}", err.without_url()), "network")
        };

        Attempt::Retry {
            error: DriverError::Transient {
                status: None,
                message,
                attempts: attempt
            },
            retry_after: None,
            reason
        }
    }

    async fn classify_response(
        &self,
        request: &ApiRequest,
        response: Response,
        attempt: u32
    ) -> Attempt {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));

        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => {
                return Attempt::Retry {
                    error: DriverError::Transient {
                        status: Some(status.as_u16()),
                        message: format!("failed to read response body: {}", err.without_url()),
                        attempts: attempt
                    },
                    retry_after: None,
                    reason: "network"
                };
            }
        };

        if status.is_success() {
            return Attempt::Done(ApiResponse {
                status: status.as_u16(),
                body: decode_success_body(&request.path, &text)
            });
        }

        let body = ApiErrorBody::parse(&text);
        match status {
            StatusCode::UNAUTHORIZED => Attempt::Fatal(DriverError::Authentication {
                status: Some(401),
                message: body.detail_or("check the personal API key")
            }),
            StatusCode::FORBIDDEN => Attempt::Fatal(DriverError::Authentication {
                status: Some(403),
                message: body.detail_or("the API key lacks the required scope")
            }),
            StatusCode::NOT_FOUND => Attempt::Fatal(DriverError::NotFound {
                resource: format!("{} {}", request.method, request.path)
            }),
            StatusCode::TOO_MANY_REQUESTS => Attempt::Retry {
                error: DriverError::RateLimited {
                    retry_after,
                    attempts: attempt
                },
                retry_after,
                reason: "rate_limited"
            },
            s if s.is_server_error() => Attempt::Retry {
                error: DriverError::Transient {
                    status: Some(s.as_u16()),
                    message: body.detail_or("server error"),
                    attempts: attempt
                },
                retry_after: None,
                reason: "server_error"
            },
            s => Attempt::Fatal(DriverError::Request {
                status: s.as_u16(),
                code: body.code.clone(),
                detail: body.detail_or(s.canonical_reason().unwrap_or("request failed"))
            })
        }
    }
}

/// Upstream endpoints occasionally answer 2xx with an empty or non-JSON
/// body; those decode to `None` rather than failing the call.
fn decode_success_body(path: &str, text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(path, error = %err, "Ignoring non-JSON success body");
            None
        }
    }
}
