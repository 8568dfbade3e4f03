//! Scanner module: sweep specs, probes and the sweep engine

pub mod engine;
pub mod probe;
pub mod spec;

use crate::network::{PortState, ScanTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub use engine::SweepEngine;
pub use probe::{ConnectProbe, NetworkProbe, SynProbe};
pub use spec::{ScanUnit, SubnetDefinition, SweepSpec};

/// How a sweep dispatches its units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One unit at a time, in expansion order
    Sequential,
    /// Bounded pool of concurrent probes
    #[default]
    Concurrent,
}

impl FromStr for ExecutionMode {
    type Err = crate::SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" | "serial" => Ok(ExecutionMode::Sequential),
            "concurrent" | "threaded" => Ok(ExecutionMode::Concurrent),
            other => Err(crate::SweepError::ConfigError(format!(
                "unknown execution mode '{}'",
                other
            ))),
        }
    }
}

/// Outcome of probing one unit, created once and never modified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub target: ScanTarget,
    pub state: PortState,
    pub probed_at: DateTime<Utc>,
}

impl ScanResult {
    pub fn new(target: ScanTarget, state: PortState) -> Self {
        Self {
            target,
            state,
            probed_at: Utc::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}

/// Thread-safe result collector, created per sweep call
pub type ResultCollector = std::sync::Arc<tokio::sync::Mutex<Vec<ScanResult>>>;
