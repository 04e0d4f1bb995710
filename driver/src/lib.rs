//! Async client for the PostHog product analytics API.
//!
//! The driver contract is three calls: [`PostHogClient::list_objects`],
//! [`PostHogClient::get_fields`] and [`PostHogClient::query`]. Event capture,
//! feature flag evaluation, HogQL convenience getters and REST wrappers sit
//! on the same client.
//!
//! ```no_run
//! use posthog_driver::{ClientConfig, EventFilter, PostHogClient};
//!
//! # async fn run() -> posthog_driver::DriverResult<()> {
//! let client = PostHogClient::new(
//!     ClientConfig::builder()
//!         .personal_api_key("phx_...")
//!         .project_id("12345")
//!         .build()?
//! )?;
//!
//! let top = client
//!     .query("SELECT event, count() FROM events GROUP BY event ORDER BY count() DESC LIMIT 10")
//!     .await?;
//! for row in &top {
//!     println!("{:?} {:?}", row.get("event"), row.get_index(1));
//! }
//!
//! let signups = client
//!     .get_events(&EventFilter::new().event("User Signup").limit(50))
//!     .await?;
//! println!("{} signups", signups.len());
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod client;
pub mod config;
pub mod entities;
pub mod error;
pub mod executor;
pub mod records;
pub mod retry;
pub mod schema;
pub mod telemetry;
pub mod throttle;

pub use capture::{CaptureAck, CaptureEvent, FlagValue};
pub use client::PostHogClient;
pub use config::{ApiKey, ClientConfig, ClientConfigBuilder, Region};
pub use entities::{AnnotationScope, EventFilter, PersonFilter, SessionFilter};
pub use error::{DriverError, DriverResult};
pub use records::{QueryResult, Record};
pub use retry::RetryPolicy;
pub use schema::{EntitySchema, EntityType, FieldSpec, FieldType, get_schema, list_entity_types};
pub use throttle::{RateClass, ThrottleConfig};

pub use hogql;
pub use tokio_util::sync::CancellationToken;
