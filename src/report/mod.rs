//! Report generation for the periodic throughput snapshot

use serde::Serialize;

use crate::stats::{Throughput, human_bytes};
use crate::types::{FrontendStatus, PipelineStats};

/// One channel's line in a report
#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    pub channel: String,
    pub state: &'static str,
    /// Rendered frontend flags, e.g. `HAS_SIGNAL HAS_LOCK`
    pub frontend: String,
    pub read_bytes: u64,
    pub read_rate_bps: f64,
    pub written_bytes: u64,
    pub write_rate_bps: f64,
    pub outstanding_packets: u64,
    pub overflows: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelReport {
    pub fn new(
        channel: &str,
        state: &'static str,
        frontend: FrontendStatus,
        stats: &PipelineStats,
        throughput: &Throughput,
    ) -> Self {
        Self {
            channel: channel.to_string(),
            state,
            frontend: frontend.to_string(),
            read_bytes: throughput.read_bytes,
            read_rate_bps: throughput.read_rate,
            written_bytes: throughput.written_bytes,
            write_rate_bps: throughput.write_rate,
            outstanding_packets: throughput.outstanding_packets,
            overflows: stats.overflows,
            read_errors: stats.read_errors,
            write_errors: stats.write_errors,
            error: None,
        }
    }

    /// A channel that never started: counters stay at zero
    pub fn failed(channel: &str, error: String) -> Self {
        Self {
            channel: channel.to_string(),
            state: "failed",
            frontend: String::new(),
            read_bytes: 0,
            read_rate_bps: 0.0,
            written_bytes: 0,
            write_rate_bps: 0.0,
            outstanding_packets: 0,
            overflows: 0,
            read_errors: 0,
            write_errors: 0,
            error: Some(error),
        }
    }
}

/// JSON structure for a complete snapshot
#[derive(Serialize)]
struct ReportJson<'a> {
    ts_time: String,
    elapsed_secs: f64,
    channels: &'a [ChannelReport],
}

/// Formats report snapshots for the report stream
pub struct Reporter;

impl Reporter {
    /// `PSB3: read 1.20 MiB (2.40 MiB/s) | wrote ... | 3 packets pending | HAS_LOCK`
    pub fn text_line(report: &ChannelReport) -> String {
        let mut line = format!(
            "{}: read {} ({}/s) | wrote {} ({}/s) | {} packets pending",
            report.channel,
            human_bytes(report.read_bytes as f64),
            human_bytes(report.read_rate_bps),
            human_bytes(report.written_bytes as f64),
            human_bytes(report.write_rate_bps),
            report.outstanding_packets,
        );
        if !report.frontend.is_empty() {
            line.push_str(" | ");
            line.push_str(&report.frontend);
        }
        if report.overflows > 0 {
            line.push_str(&format!(" | {} overflows", report.overflows));
        }
        if let Some(error) = &report.error {
            line.push_str(&format!(" | {} ({error})", report.state));
        }
        line
    }

    /// One text line per channel
    pub fn text(reports: &[ChannelReport]) -> String {
        reports
            .iter()
            .map(Self::text_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Single-line JSON snapshot, stamped with wall-clock time
    pub fn json(reports: &[ChannelReport], elapsed_secs: f64) -> String {
        let rep = ReportJson {
            ts_time: chrono::Utc::now().to_rfc3339(),
            elapsed_secs,
            channels: reports,
        };
        serde_json::to_string(&rep)
            .unwrap_or_else(|_| "{\"error\": \"JSON serialization failed\"}".to_string())
    }
}
