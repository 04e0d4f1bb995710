use std::fmt;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{DriverError, DriverResult};
use crate::executor::{ApiRequest, ApiResponse, RequestExecutor};
use crate::records::QueryResult;
use crate::schema::{self, EntitySchema};
use crate::throttle::RateClass;

struct ClientInner {
    executor: RequestExecutor
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.executor.shutdown();
        debug!(
            project_id = %self.executor.config().project_id,
            "PostHog client released"
        );
    }
}

/// Handle to one PostHog project.
///
/// Clones share the connection pool. Each handle carries its own
/// cancellation token (see [`PostHogClient::with_cancellation`]); `close`
/// shuts down every handle at once.
#[derive(Clone)]
pub struct PostHogClient {
    inner: Arc<ClientInner>,
    cancel: CancellationToken
}

impl PostHogClient {
    pub fn new(config: ClientConfig) -> DriverResult<Self> {
        let executor = RequestExecutor::new(Arc::new(config))?;
        info!(
            project_id = %executor.config().project_id,
            api_url = %executor.config().api_url,
            max_retries = executor.config().max_retries(),
            "PostHog client initialized"
        );
        Ok(Self {
            inner: Arc::new(ClientInner { executor }),
            cancel: CancellationToken::new()
        })
    }

    /// Builds a client from `POSTHOG_*` environment variables.
    pub fn from_env() -> DriverResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// A handle whose calls are also aborted when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel: token
        }
    }

    /// Aborts in-flight calls on every handle and rejects later ones with
    /// [`DriverError::Cancelled`]. The pool itself is freed when the last
    /// handle is dropped.
    pub fn close(&self) {
        if !self.inner.executor.is_shut_down() {
            info!(project_id = %self.config().project_id, "Closing PostHog client");
        }
        self.inner.executor.shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.executor.is_shut_down()
    }

    pub fn config(&self) -> &ClientConfig {
        self.inner.executor.config()
    }

    /// Entity kinds this driver knows about, in a stable order.
    pub fn list_objects(&self) -> Vec<&'static str> {
        schema::list_entity_types()
    }

    pub fn get_fields(&self, entity_type: &str) -> DriverResult<&'static EntitySchema> {
        schema::get_schema(entity_type)
    }

    /// Runs a HogQL query against the project.
    pub async fn query(&self, hogql: &str) -> DriverResult<QueryResult> {
        if hogql.trim().is_empty() {
            return Err(DriverError::validation("query", "query must not be empty"));
        }

        debug!(query_len = hogql.len(), "Running HogQL query");
        let request = ApiRequest::post(
            self.project_path("query/"),
            json!({
                "query": {
                    "kind": "HogQLQuery",
                    "query": hogql
                }
            })
        )
        .with_rate_class(RateClass::Analytics);

        let response = self.send(&request).await?;
        QueryResult::from_response(response.body)
    }

    pub(crate) async fn send(&self, request: &ApiRequest) -> DriverResult<ApiResponse> {
        self.inner.executor.execute(request, &self.cancel).await
    }

    /// `/api/projects/{project_id}/{suffix}`
    pub(crate) fn project_path(&self, suffix: &str) -> String {
        format!("/api/projects/{}/{suffix}", self.config().project_id)
    }
}

impl fmt::Debug for PostHogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostHogClient")
            .field("project_id", &self.config().project_id)
            .field("api_url", &self.config().api_url)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
