//! # Application State
//!
//! State shared by all HTTP request handlers.
//!
//! ## What is shared:
//! - **Configuration and pipeline components**: Built once at startup and read-only
//!   afterwards. Each request drives its own ffmpeg process and its own outbound
//!   HTTP request, so nothing here is mutated by the evaluation path.
//! - **Metrics**: Counters behind `Arc<RwLock<T>>`, updated by middleware and handlers.
//!   They never influence how a request is processed.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (every worker thread holds a clone of AppState)
//! - **RwLock**: Many readers or one writer
//! - Locks are held only for the duration of a counter update or snapshot copy

use crate::audio::AudioNormalizer;
use crate::config::AppConfig;
use crate::scoring::{Credentials, EvaluationDispatcher, SessionEnvelopeBuilder};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Configuration loaded at startup (never changes afterwards)
    pub config: Arc<AppConfig>,

    pub normalizer: Arc<AudioNormalizer>,
    pub envelope_builder: Arc<SessionEnvelopeBuilder>,
    pub dispatcher: Arc<EvaluationDispatcher>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of error responses since server start
    pub error_count: u64,

    /// Evaluations that returned a scoring result
    pub evaluations_completed: u64,

    /// Failed evaluations, keyed by failure kind (e.g. "transcode_error")
    pub evaluation_failures: HashMap<String, u64>,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Derived values:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the pipeline components from configuration.
    ///
    /// Fails only if the HTTP client cannot be constructed, which is a
    /// startup error like any other configuration problem.
    pub fn new(config: AppConfig) -> Result<Self> {
        let credentials = Credentials::new(
            config.scoring.app_key.clone(),
            config.scoring.secret_key.clone(),
        );

        Ok(Self {
            normalizer: Arc::new(AudioNormalizer::new(&config.transcoder)),
            envelope_builder: Arc::new(SessionEnvelopeBuilder::new(credentials)),
            dispatcher: Arc::new(EvaluationDispatcher::new(&config.scoring)?),
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        })
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    /// Increment the total error counter (4xx and 5xx responses).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// The first time an endpoint is seen a zeroed entry is created for it.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn record_evaluation_success(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.evaluations_completed += 1;
    }

    pub fn record_evaluation_failure(&self, kind: &str) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        *metrics.evaluation_failures.entry(kind.to_string()).or_default() += 1;
    }

    /// Copy of the current metrics, so no lock is held while serializing a response.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str, ffmpeg_path: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.scoring.app_key = "test-app-key".to_string();
    config.scoring.secret_key = "test-secret-key".to_string();
    config.scoring.base_url = base_url.to_string();
    config.transcoder.ffmpeg_path = ffmpeg_path.to_string();
    config
}
