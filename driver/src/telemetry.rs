use metrics::{counter, histogram};
use std::time::Instant;

pub struct Telemetry;

impl Telemetry {
    pub fn record_attempt(method: &str, outcome: &str) {
        counter!("posthog_driver_requests_total", "method" => method.to_string(), "outcome" => outcome.to_string())
            .increment(1);
    }

    pub fn record_retry(reason: &str) {
        counter!("posthog_driver_retries_total", "reason" => reason.to_string()).increment(1);
    }

    pub fn record_latency(method: &str, duration_ms: f64) {
        histogram!("posthog_driver_request_duration_ms", "method" => method.to_string())
            .record(duration_ms);
    }

    pub fn record_throttle_wait(class: &str) {
        counter!("posthog_driver_throttle_waits_total", "class" => class.to_string()).increment(1);
    }
}

pub struct RequestTimer {
    start: Instant,
    method: String
}

impl RequestTimer {
    pub fn new(method: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string()
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Records the latency histogram and returns the elapsed milliseconds.
    pub fn finish(self) -> u64 {
        let elapsed = self.elapsed_ms();
        Telemetry::record_latency(&self.method, elapsed as f64);
        elapsed
    }
}
