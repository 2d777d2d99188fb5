//! Scripted source for testing without tuner hardware.
//!
//! A [`MockSource`] replays a list of [`ReadStep`]s, then either idles (returns
//! empty reads) or repeats a fixed unit forever.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::constants::TS_PACKET_SIZE;
use crate::error::SourceError;
use crate::source::{Source, SourceProvider};
use crate::types::{ChannelConfig, FrontendStatus, SignalStats, TuningParams};

/// One scripted read result
#[derive(Debug, Clone)]
pub enum ReadStep {
    Data(Vec<u8>),
    Empty,
    Overflow,
    Fail(io::ErrorKind),
}

/// Shared view of what a mock source has been asked to do
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    reads: Arc<AtomicUsize>,
    tuned: Arc<Mutex<Option<TuningParams>>>,
}

impl MockProbe {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn tuned_with(&self) -> Option<TuningParams> {
        self.tuned.lock().clone()
    }
}

pub struct MockSource {
    steps: VecDeque<ReadStep>,
    endless: Option<Vec<u8>>,
    idle: Duration,
    fail_tune: bool,
    fail_filters: bool,
    lock_after: u32,
    status_polls: u32,
    probe: MockProbe,
}

impl MockSource {
    pub fn new(steps: Vec<ReadStep>) -> Self {
        Self {
            steps: steps.into(),
            endless: None,
            idle: Duration::from_millis(1),
            fail_tune: false,
            fail_filters: false,
            lock_after: 0,
            status_polls: 0,
            probe: MockProbe::default(),
        }
    }

    /// `count` units of `len` bytes each, with a recognisable byte pattern.
    pub fn packets(count: usize, len: usize) -> Self {
        let steps = (0..count)
            .map(|i| ReadStep::Data(vec![(i % 251) as u8; len]))
            .collect();
        Self::new(steps)
    }

    /// After the script runs out, hand out `unit` on every read, pausing `pause` first.
    pub fn endless(mut self, unit: Vec<u8>, pause: Duration) -> Self {
        self.endless = Some(unit);
        self.idle = pause;
        self
    }

    pub fn failing_tune(mut self) -> Self {
        self.fail_tune = true;
        self
    }

    pub fn failing_filters(mut self) -> Self {
        self.fail_filters = true;
        self
    }

    /// Report `HAS_LOCK` starting with the `polls`-th status query.
    pub fn with_lock_after(mut self, polls: u32) -> Self {
        self.lock_after = polls;
        self
    }

    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }

    pub fn status_polls(&self) -> u32 {
        self.status_polls
    }
}

impl Source for MockSource {
    fn name(&self) -> String {
        "mock".to_string()
    }

    fn tune(&mut self, params: &TuningParams) -> Result<(), SourceError> {
        if self.fail_tune {
            return Err(SourceError::Tune(io::Error::new(
                io::ErrorKind::InvalidInput,
                "scripted tune failure",
            )));
        }
        *self.probe.tuned.lock() = Some(params.clone());
        Ok(())
    }

    fn set_filters(&mut self) -> Result<(), SourceError> {
        if self.fail_filters {
            return Err(SourceError::Filter(io::Error::new(
                io::ErrorKind::InvalidInput,
                "scripted filter failure",
            )));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(ReadStep::Data(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(ReadStep::Empty) => Ok(0),
            Some(ReadStep::Overflow) => Err(SourceError::Overflow),
            Some(ReadStep::Fail(kind)) => Err(SourceError::Io(io::Error::from(kind))),
            None => {
                // a live device blocks here; do the same instead of spinning
                std::thread::sleep(self.idle);
                match &self.endless {
                    Some(unit) => {
                        let n = unit.len().min(buf.len());
                        buf[..n].copy_from_slice(&unit[..n]);
                        Ok(n)
                    }
                    None => Ok(0),
                }
            }
        }
    }

    fn status(&mut self) -> Result<FrontendStatus, SourceError> {
        self.status_polls = self.status_polls.saturating_add(1);
        if self.status_polls >= self.lock_after {
            Ok(FrontendStatus(
                FrontendStatus::HAS_SIGNAL
                    | FrontendStatus::HAS_CARRIER
                    | FrontendStatus::HAS_VITERBI
                    | FrontendStatus::HAS_SYNC
                    | FrontendStatus::HAS_LOCK,
            ))
        } else {
            Ok(FrontendStatus(FrontendStatus::HAS_SIGNAL))
        }
    }

    fn signal_stats(&mut self) -> Result<SignalStats, SourceError> {
        Ok(SignalStats {
            strength: 0xC000,
            snr: 0x0100,
            ber: 0,
            uncorrected_blocks: 0,
        })
    }
}

/// A null transport packet (PID 0x1FFF)
pub fn null_packet() -> Vec<u8> {
    let mut packet = vec![0xFF; TS_PACKET_SIZE];
    packet[..4].copy_from_slice(&[0x47, 0x1F, 0xFF, 0x10]);
    packet
}

/// Provider that feeds every channel an endless stream of null packets.
pub struct MockProvider {
    pause: Duration,
}

impl MockProvider {
    pub fn new(pause: Duration) -> Self {
        Self { pause }
    }
}

impl SourceProvider for MockProvider {
    fn open(&self, _channel: &ChannelConfig) -> Result<Box<dyn Source>, SourceError> {
        Ok(Box::new(MockSource::new(vec![]).endless(null_packet(), self.pause)))
    }
}
