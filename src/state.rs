//! # Application State Management
//!
//! Shared state that every HTTP handler and every WebSocket actor can reach.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Many handlers and actors share ownership of the same data
//! - **Memory safety**: The data is freed when the last reference goes away
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Many readers OR one writer at a time
//! - **Why needed**: Config and metrics are read constantly and written rarely
//!
//! ## What lives here:
//! - **config**: Runtime-updatable configuration
//! - **metrics**: Request, connection and audio counters
//! - **rooms**: The live room registry (it does its own locking)
//! - **hub**: Connection id to actor address, used to deliver room events

use crate::config::AppConfig;
use crate::room::registry::RoomRegistry;
use crate::websocket::ConnectionHub;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::info;

/// State shared across all HTTP request handlers and WebSocket actors.
///
/// Cloning is cheap: every field is either an `Arc` or `Copy`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Counters updated by middleware and the relay actors
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    pub rooms: Arc<RoomRegistry>,

    pub hub: Arc<ConnectionHub>,
}

/// Counters collected since startup.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed
    pub request_count: u64,

    /// Total number of HTTP requests that ended in 4xx/5xx
    pub error_count: u64,

    /// Currently open relay WebSockets
    pub active_connections: u32,

    /// Audio frames forwarded to their target
    pub frames_relayed: u64,

    /// Audio frames rejected by the talk gate or addressed to a dead room
    pub frames_dropped: u64,

    /// Transmissions appended to room logs
    pub transmissions_logged: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Create the state for a fresh server.
    ///
    /// ## What this does:
    /// 1. Wraps the config in `Arc<RwLock<>>` for runtime updates
    /// 2. Builds the room registry with the configured limits
    /// 3. Creates an empty connection hub and zeroed metrics
    pub fn new(config: AppConfig) -> Self {
        let rooms = RoomRegistry::new(config.rooms.max_rooms, config.rooms.max_display_name_len);
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            rooms: Arc::new(rooms),
            hub: Arc::new(ConnectionHub::default()),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Validate and swap in a new configuration.
    ///
    /// Room limits take effect immediately; the bind address only on restart.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;

        self.rooms
            .set_limits(new_config.rooms.max_rooms, new_config.rooms.max_display_name_len);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        info!("Configuration updated");
        Ok(())
    }

    fn with_metrics(&self, update: impl FnOnce(&mut AppMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }

    pub fn increment_request_count(&self) {
        self.with_metrics(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.with_metrics(|m| m.error_count += 1);
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## Parameters:
    /// - **endpoint**: The API endpoint (e.g., "GET /api/v1/health")
    /// - **duration_ms**: How long the request took to process
    /// - **is_error**: Whether this request resulted in an error
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|m| {
            let endpoint_metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            endpoint_metric.request_count += 1;
            endpoint_metric.total_duration_ms += duration_ms;
            if is_error {
                endpoint_metric.error_count += 1;
            }
        });
    }

    pub fn connection_opened(&self) {
        self.with_metrics(|m| m.active_connections += 1);
    }

    /// Saturates at zero.
    pub fn connection_closed(&self) {
        self.with_metrics(|m| m.active_connections = m.active_connections.saturating_sub(1));
    }

    pub fn record_frame(&self, relayed: bool) {
        self.with_metrics(|m| {
            if relayed {
                m.frames_relayed += 1;
            } else {
                m.frames_dropped += 1;
            }
        });
    }

    pub fn record_transmission(&self) {
        self.with_metrics(|m| m.transmissions_logged += 1);
    }

    /// Snapshot of the current metrics, taken under a read lock.
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

    /// Fraction of requests that failed, 0.0 to 1.0.
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
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /api/v1/health", 10, false);
        state.record_endpoint_request("GET /api/v1/health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let endpoint = &metrics.endpoint_metrics["GET /api/v1/health"];
        assert_eq!(endpoint.request_count, 2);
        assert_eq!(endpoint.average_duration_ms(), 20.0);
        assert_eq!(endpoint.error_rate(), 0.5);
    }

    #[test]
    fn test_connection_and_frame_counters() {
        let state = AppState::new(AppConfig::default());
        state.connection_closed();
        state.connection_opened();
        state.record_frame(true);
        state.record_frame(false);
        state.record_frame(false);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_connections, 1);
        assert_eq!(metrics.frames_relayed, 1);
        assert_eq!(metrics.frames_dropped, 2);
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let state = AppState::new(AppConfig::default());
        let mut bad = state.get_config();
        bad.rooms.max_rooms = 0;
        assert!(state.update_config(bad).is_err());
        assert_eq!(state.get_config().rooms.max_rooms, 10_000);
    }
}
