use std::time::Duration;

use posthog_driver::{ClientConfig, PostHogClient, RetryPolicy};
use tracing_subscriber::EnvFilter;
use wiremock::MockServer;

pub const PERSONAL_KEY: &str = "phx_integration_key";
pub const PROJECT_KEY: &str = "phc_integration_key";
pub const PROJECT_ID: &str = "4242";
pub const BASE_BACKOFF: Duration = Duration::from_millis(100);

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_backoff: BASE_BACKOFF,
        max_backoff: Duration::from_millis(400),
        jitter: false
    }
}

/// Routes driver logs to the test writer; `RUST_LOG=posthog_driver=debug`
/// shows per-attempt output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(server: &MockServer, with_project_key: bool) -> ClientConfig {
    let mut builder = ClientConfig::builder()
        .api_url(server.uri())
        .personal_api_key(PERSONAL_KEY)
        .project_id(PROJECT_ID)
        .timeout(Duration::from_secs(2))
        .retry_policy(fast_retry(3));
    if with_project_key {
        builder = builder.project_api_key(PROJECT_KEY);
    }
    builder.build().unwrap()
}

pub fn client(server: &MockServer) -> PostHogClient {
    init_tracing();
    PostHogClient::new(config(server, true)).unwrap()
}

pub fn query_path() -> String {
    format!("/api/projects/{PROJECT_ID}/query/")
}
