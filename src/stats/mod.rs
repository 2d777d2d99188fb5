//! Throughput math for the periodic report

use std::time::Duration;

use crate::types::PipelineStats;

/// Rates never divide by less than this, so the first report isn't absurd
const MIN_ELAPSED_SECS: f64 = 0.1;

/// Derived per-channel figures for one report tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub read_bytes: u64,
    /// bytes per second since capture start
    pub read_rate: f64,
    pub written_bytes: u64,
    pub write_rate: f64,
    /// Packets read but not yet written
    pub outstanding_packets: u64,
}

impl Throughput {
    pub fn from_snapshot(stats: &PipelineStats, elapsed: Duration, packet_size: usize) -> Self {
        Self {
            read_bytes: stats.bytes_produced,
            read_rate: rate(stats.bytes_produced, elapsed),
            written_bytes: stats.bytes_consumed,
            write_rate: rate(stats.bytes_consumed, elapsed),
            outstanding_packets: outstanding_packets(stats, packet_size),
        }
    }
}

/// Average bytes per second over `elapsed`
pub fn rate(bytes: u64, elapsed: Duration) -> f64 {
    bytes as f64 / elapsed.as_secs_f64().max(MIN_ELAPSED_SECS)
}

/// `(produced - consumed) / packet_size`
pub fn outstanding_packets(stats: &PipelineStats, packet_size: usize) -> u64 {
    let pending = stats.bytes_produced.saturating_sub(stats.bytes_consumed);
    pending / packet_size.max(1) as u64
}

/// Binary-prefixed size, e.g. `12.34 MiB`
pub fn human_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
