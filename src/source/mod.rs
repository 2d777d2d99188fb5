//! Source adapters: anything that can be tuned and then read in fixed-size units.
//!
//! The capture core only relies on the contract below. A read of `Ok(0)` means
//! "nothing right now", never end of stream; sources are live feeds.

#[cfg(target_os = "linux")]
pub mod dvb;
pub mod mock;

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::SourceError;
use crate::types::{ChannelConfig, FrontendStatus, SignalStats, TuningParams};

pub use mock::{MockProvider, MockSource, ReadStep};

/// A tunable, blocking packet source. Owned by exactly one producer thread.
pub trait Source: Send {
    /// Human-readable device name, used in logs
    fn name(&self) -> String;

    fn tune(&mut self, params: &TuningParams) -> Result<(), SourceError>;

    fn set_filters(&mut self) -> Result<(), SourceError>;

    /// Fill `buf` with up to `buf.len()` bytes. `Ok(0)` means no data yet.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError>;

    fn status(&mut self) -> Result<FrontendStatus, SourceError>;

    fn signal_stats(&mut self) -> Result<SignalStats, SourceError> {
        Err(SourceError::Unsupported("signal statistics"))
    }
}

/// Opens one [`Source`] per configured channel.
pub trait SourceProvider: Send + Sync {
    fn open(&self, channel: &ChannelConfig) -> Result<Box<dyn Source>, SourceError>;
}

impl<F> SourceProvider for F
where
    F: Fn(&ChannelConfig) -> Result<Box<dyn Source>, SourceError> + Send + Sync,
{
    fn open(&self, channel: &ChannelConfig) -> Result<Box<dyn Source>, SourceError> {
        self(channel)
    }
}

/// Outcome of waiting for the frontend to lock after tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked(FrontendStatus),
    TimedOut(FrontendStatus),
}

/// Poll the frontend status with a sleep between polls until it reports
/// `HAS_LOCK` or `timeout` elapses.
pub fn wait_for_lock(
    source: &mut dyn Source,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<LockState, SourceError> {
    let started = Instant::now();
    loop {
        let status = source.status()?;
        if status.has_lock() {
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, %status, "frontend locked");
            return Ok(LockState::Locked(status));
        }
        if started.elapsed() >= timeout {
            warn!(%status, "frontend did not lock within {:?}", timeout);
            return Ok(LockState::TimedOut(status));
        }
        std::thread::sleep(poll_interval);
    }
}
