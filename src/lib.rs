//! synsweep - TCP half-open sweeps across IPv4 subnets
//!
//! Expands subnet definitions and ports into endpoints, probes each one with a
//! crafted SYN (or a plain connect when raw sockets are unavailable) and
//! reports the endpoints that answered SYN+ACK.

pub mod config;
pub mod error;
pub mod network;
pub mod output;
pub mod scanner;

// Re-export commonly used types
pub use config::SweepConfig;
pub use error::SweepError;
pub use network::{PortState, ScanTarget, TeardownMode};
pub use output::{EndpointMetadata, MetadataTable, ScanReport, SweepStats};
pub use scanner::engine::SweepEngine;
pub use scanner::{ExecutionMode, ScanResult, SweepSpec};

pub type Result<T> = std::result::Result<T, SweepError>;
