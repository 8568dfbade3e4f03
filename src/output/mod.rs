//! Output formatting and management

pub mod aggregate;
pub mod metadata;

use crate::network::ScanTarget;
use crate::scanner::SweepSpec;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

pub use aggregate::ResultAggregator;
pub use metadata::{EndpointMetadata, MetadataTable};

/// Width of the rules framing a text report
const RULE_WIDTH: usize = 50;

/// Output format options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// One open endpoint in the final listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub target: ScanTarget,
    pub probed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EndpointMetadata>,
}

/// Per-state counts for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepStats {
    pub units: usize,
    pub open: usize,
    pub closed: usize,
    pub down: usize,
    /// Extra probe attempts spent on units that came back down
    pub retried: usize,
}

/// Result of one sweep invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub entries: Vec<ReportEntry>,
    pub stats: SweepStats,
    #[serde(rename = "elapsed_secs", with = "elapsed_secs")]
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl ScanReport {
    pub fn new(entries: Vec<ReportEntry>, stats: SweepStats, elapsed: Duration) -> Self {
        Self {
            entries,
            stats,
            elapsed,
            cancelled: false,
        }
    }

    /// Report for a sweep stopped before completion; never carries entries
    pub fn cancelled(elapsed: Duration) -> Self {
        Self {
            entries: Vec::new(),
            stats: SweepStats::default(),
            elapsed,
            cancelled: true,
        }
    }

    pub fn open_count(&self) -> usize {
        self.entries.len()
    }
}

mod elapsed_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(elapsed.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Elapsed time the way the report header shows it
///
/// Up to a minute it is seconds rounded to a tenth, beyond that minutes.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 60.0 {
        format!("{:.2} sec", (secs * 10.0).round() / 10.0)
    } else {
        format!("{:.2} min", secs / 60.0)
    }
}

/// Output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub file: Option<PathBuf>,
    pub colored: bool,
    /// A metadata table was supplied, so unmatched entries are flagged
    pub metadata_supplied: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            file: None,
            colored: true,
            metadata_supplied: false,
        }
    }
}

/// Main output manager
pub struct OutputManager {
    config: OutputConfig,
}

impl OutputManager {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    /// Write a report to the configured file or stdout
    pub fn write_report(&self, report: &ScanReport, spec: &SweepSpec) -> crate::Result<()> {
        let output = self.render(report, spec)?;

        match &self.config.file {
            Some(path) => {
                let mut file = File::create(path)?;
                file.write_all(output.as_bytes())?;
                log::info!("Report written to {}", path.display());
            }
            None => print!("{}", output),
        }

        Ok(())
    }

    pub fn render(&self, report: &ScanReport, spec: &SweepSpec) -> crate::Result<String> {
        match self.config.format {
            OutputFormat::Text => Ok(self.format_text(report, spec)),
            OutputFormat::Json => self.format_json(report),
        }
    }

    fn format_text(&self, report: &ScanReport, spec: &SweepSpec) -> String {
        if report.cancelled {
            return "Sweep cancelled. Exiting with no output.\n".to_string();
        }

        let subnets = format!("[{}]", spec.subnets.join(", "));
        let ports = format!(
            "[{}]",
            spec.ports.iter().map(u16::to_string).collect::<Vec<_>>().join(", ")
        );
        let range = format!("{}:{}", spec.start_ip, spec.end_ip);
        let elapsed = format_elapsed(report.elapsed);
        let rule = "=".repeat(RULE_WIDTH);

        let mut output = String::new();
        output.push('\n');
        output.push_str(&rule);
        output.push('\n');

        if report.entries.is_empty() {
            let line = format!(
                "No open endpoints found: subnet(s)={} port(s)={} range {}, {}",
                subnets, ports, range, elapsed
            );
            output.push_str(&self.paint(&line, Paint::Muted));
            output.push('\n');
        } else {
            let header = format!(
                "Open endpoints: subnet(s)={} port(s)={} range {}, {} count {}",
                subnets,
                ports,
                range,
                elapsed,
                report.open_count()
            );
            output.push_str(&self.paint(&header, Paint::Header));
            output.push('\n');

            for entry in &report.entries {
                output.push_str(&self.format_entry(entry));
                output.push('\n');
            }
        }

        output.push_str(&rule);
        output.push('\n');
        output
    }

    fn format_entry(&self, entry: &ReportEntry) -> String {
        let target = self.paint(&entry.target.to_string(), Paint::Open);
        match &entry.metadata {
            Some(meta) => {
                let field = |value: &Option<String>| value.clone().unwrap_or_default();
                format!(
                    "{} {:<20} {:<18} {:<18}",
                    target,
                    field(&meta.company),
                    field(&meta.product),
                    field(&meta.version)
                )
                .trim_end()
                .to_string()
            }
            None if self.config.metadata_supplied => {
                format!("{} {}", target, self.paint("UnknownServer", Paint::Muted))
            }
            None => target,
        }
    }

    fn format_json(&self, report: &ScanReport) -> crate::Result<String> {
        let mut json = serde_json::to_string_pretty(report)?;
        json.push('\n');
        Ok(json)
    }

    fn paint(&self, text: &str, paint: Paint) -> String {
        if !self.config.colored {
            return text.to_string();
        }

        match paint {
            Paint::Header => text.bold().to_string(),
            Paint::Open => text.green().to_string(),
            Paint::Muted => text.bright_black().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Paint {
    Header,
    Open,
    Muted,
}
