//! Common configuration types for classroom engine components.

use serde::{Deserialize, Serialize};

/// Default `EnvFilter` directive used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "session_engine=debug,control_protocol=info";

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Log filter directive (same syntax as `RUST_LOG`)
    pub log_filter: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}
