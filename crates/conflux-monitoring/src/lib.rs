//! Monitoring for the Conflux engine: logging bootstrap and engine metrics.

use conflux_core::EngineConfig;
use serde::{Deserialize, Serialize};

pub mod logging;
pub mod metrics;

/// Configuration for initializing logging and metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to startup logs
    pub service_name: String,
    /// Log level filter (e.g., "info,conflux_core=debug"); `RUST_LOG` wins
    pub log_filter: String,
    /// JSON lines instead of pretty output on stdout
    pub enable_json_logging: bool,
    /// Also write JSON logs to this file, rotated daily
    pub log_file: Option<String>,
    /// Record engine metrics
    pub enable_metrics: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "conflux".to_string(),
            log_filter: "info".to_string(),
            enable_json_logging: false,
            log_file: None,
            enable_metrics: true,
        }
    }
}

impl MonitoringConfig {
    /// Defaults with the engine's log filter
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self {
            log_filter: config.log_filter.clone(),
            ..Self::default()
        }
    }
}


// Exported types
pub use crate::logging::{build_filter, init_logging, init_test_logging, LogExt};
pub use crate::metrics::{EngineMetrics, EngineMetricsSnapshot, MetricsEventHandler};
