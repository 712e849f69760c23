//! # Application State Management
//!
//! State shared by every HTTP request handler of the relay server.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Lets every worker thread hold the same configuration and metrics
//! - **Immutable config**: `Arc<AppConfig>` is never written after startup, so it needs no lock
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Metrics are written by every request and read by the metrics endpoints
//! - **Short critical sections**: Each method takes the lock, updates a counter, and releases it
//!
//! ## Per-stream isolation:
//! Nothing about an individual relay stream lives here. Each request owns its
//! upstream response and byte counters; this struct only aggregates totals.

use crate::config::AppConfig;
use crate::upstream::UpstreamClient;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The application state shared across all HTTP request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Configuration loaded at startup
    pub config: Arc<AppConfig>,

    /// Client for the TTS provider (shares one connection pool)
    pub upstream: UpstreamClient,

    /// Request and relay counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// Relay streams currently sending audio
    pub active_streams: u32,

    /// Per-endpoint statistics, keyed by "METHOD /route"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    pub relay: RelayMetrics,
}

/// Outcome counters for the relay pipeline.
///
/// ## Fields:
/// - **streams_started**: Responses committed with a 200 after the first upstream chunk
/// - **streams_completed**: Streams that reached the upstream end of body
/// - **streams_truncated**: Streams cut short by a transport failure after commitment
/// - **bytes_relayed**: Audio bytes forwarded to clients
/// - **upstream_rejections**: Non-success statuses returned by the provider
/// - **precommit_failures**: Transport failures before any byte was sent (502s)
#[derive(Debug, Default, Clone)]
pub struct RelayMetrics {
    pub streams_started: u64,
    pub streams_completed: u64,
    pub streams_truncated: u64,
    pub bytes_relayed: u64,
    pub upstream_rejections: u64,
    pub precommit_failures: u64,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the shared state, including the upstream HTTP client.
    ///
    /// ## Errors:
    /// Fails if the HTTP client cannot be built (e.g. the API key is not a valid header value).
    pub fn new(config: AppConfig) -> Result<Self> {
        let upstream = UpstreamClient::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            upstream,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## HashMap operations:
    /// The first request to an endpoint creates its entry with `or_default()`;
    /// later requests update the same entry.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A relay response was committed and audio started flowing.
    pub fn stream_started(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_streams += 1;
        metrics.relay.streams_started += 1;
    }

    /// Add relayed bytes as they are sent.
    pub fn record_bytes_relayed(&self, bytes: usize) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.relay.bytes_relayed += bytes as u64;
    }

    /// A committed relay stream ended, either at end of body or by truncation.
    ///
    /// ## Underflow protection:
    /// `active_streams` is only decremented when positive.
    pub fn stream_finished(&self, truncated: bool) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_streams > 0 {
            metrics.active_streams -= 1;
        }
        if truncated {
            metrics.relay.streams_truncated += 1;
        } else {
            metrics.relay.streams_completed += 1;
        }
    }

    pub fn record_upstream_rejection(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.relay.upstream_rejections += 1;
    }

    pub fn record_precommit_failure(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.relay.precommit_failures += 1;
    }

    /// Get a snapshot of current metrics (cloned so no lock is held while serializing).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average = Total Duration ÷ Number of Requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error Rate = Number of Errors ÷ Total Requests
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_counters() {
        let state = AppState::new(AppConfig::default()).unwrap();
        state.stream_started();
        state.stream_started();
        state.record_bytes_relayed(100);
        state.stream_finished(false);
        state.stream_finished(true);
        state.stream_finished(true);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_streams, 0);
        assert_eq!(metrics.relay.streams_started, 2);
        assert_eq!(metrics.relay.streams_completed, 1);
        assert_eq!(metrics.relay.streams_truncated, 2);
        assert_eq!(metrics.relay.bytes_relayed, 100);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default()).unwrap();
        state.record_endpoint_request("POST /tts/stream", 10, false);
        state.record_endpoint_request("POST /tts/stream", 30, true);

        let metrics = state.get_metrics_snapshot();
        let endpoint = &metrics.endpoint_metrics["POST /tts/stream"];
        assert_eq!(endpoint.average_duration_ms(), 20.0);
        assert_eq!(endpoint.error_rate(), 0.5);
    }
}
