//! Constants for transport stream capture

use std::time::Duration;

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;

/// Reporting
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Producer backlog: 256k packets is ~49 MB of queued stream
pub const DEFAULT_MAX_BACKLOG: usize = 256 * 1024;
/// How often a producer parked on a full queue re-checks its stop flag
pub const BACKLOG_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Frontend status polling
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Warn on the first transient read failure, then once per this many
pub const READ_WARN_EVERY: u64 = 1000;

/// Linux DVB device nodes live under `<root>/adapter<N>/<node>0`
pub const DVB_DEVICE_ROOT: &str = "/dev/dvb";

/// PID 0x2000 asks the demux for the whole transport stream
pub const FULL_TS_PID: u16 = 0x2000;

/// Extension for capture artifacts
pub const OUTPUT_EXTENSION: &str = "ts";

/// UDP receive staging buffer: the largest IPv4 UDP payload, so `recv` never truncates
pub const UDP_RECV_BUFFER: usize = 65_507;
pub const UDP_READ_TIMEOUT: Duration = Duration::from_millis(200);
