//! Optional client-side throttling.
//!
//! PostHog answers with 429 once a project exceeds its per-minute budget.
//! When configured, this sliding-window limiter delays calls locally so a
//! burst of agent queries queues up instead of burning retries.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DriverError, DriverResult};
use crate::telemetry::Telemetry;

/// Budget bucket a request is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    /// HogQL query endpoint.
    Analytics,
    /// CRUD endpoints under `/api/projects/`.
    Crud,
    /// Capture and flag endpoints; never throttled.
    Capture
}

impl RateClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analytics => "analytics",
            Self::Crud => "crud",
            Self::Capture => "capture"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub analytics_per_minute: u32,
    pub crud_per_minute: u32,
    pub window: Duration
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            analytics_per_minute: 240,
            crud_per_minute: 480,
            window: Duration::from_secs(60)
        }
    }
}

pub struct Throttle {
    windows: Arc<Mutex<HashMap<RateClass, VecDeque<Instant>>>>,
    config: ThrottleConfig
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            config
        }
    }

    fn limit(&self, class: RateClass) -> Option<usize> {
        match class {
            RateClass::Analytics => Some(self.config.analytics_per_minute as usize),
            RateClass::Crud => Some(self.config.crud_per_minute as usize),
            RateClass::Capture => None
        }
    }

    /// Records a request slot, returning how long the caller must wait first
    /// if the window is full.
    async fn try_acquire(&self, class: RateClass) -> Option<Duration> {
        let limit = self.limit(class)?;
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let window = windows.entry(class).or_default();

        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) >= self.config.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < limit.max(1) {
            window.push_back(now);
            return None;
        }

        let oldest = window.front().copied().unwrap_or(now);
        Some(self.config.window.saturating_sub(now.duration_since(oldest)))
    }

    /// Waits until `class` has budget left. Cancellation aborts the wait.
    pub async fn acquire(&self, class: RateClass, cancel: &CancellationToken) -> DriverResult<()> {
        loop {
            let Some(wait) = self.try_acquire(class).await else {
                return Ok(());
            };
            debug!(class = class.as_str(), wait_ms = wait.as_millis() as u64, "Client-side throttle engaged");
            Telemetry::record_throttle_wait(class.as_str());
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(DriverError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    pub async fn remaining(&self, class: RateClass) -> Option<u32> {
        let limit = self.limit(class)?;
        let windows = self.windows.lock().await;
        let now = Instant::now();
        let used = windows
            .get(&class)
            .map(|w| {
                w.iter()
                    .filter(|&&at| now.duration_since(at) < self.config.window)
                    .count()
            })
            .unwrap_or(0);
        Some(limit.saturating_sub(used) as u32)
    }
}
