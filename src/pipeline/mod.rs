//! One capture pipeline per tuned channel.
//!
//! A producer thread reads fixed-size units from a [`Source`] and pushes them onto a
//! [`BoundedQueue`]; a consumer thread pops them and writes them to the channel's sink.
//! Shutdown is cooperative: [`CapturePipeline::stop`] raises a flag the producer checks
//! between reads, the producer then marks itself done and closes the queue, and the
//! consumer exits only once the queue is closed *and* empty. Nothing pushed before the
//! producer finished is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, info, warn};

use crate::constants::{
    BACKLOG_WAIT_SLICE, DEFAULT_MAX_BACKLOG, LOCK_POLL_INTERVAL, LOCK_TIMEOUT, READ_WARN_EVERY,
    STATUS_INTERVAL, TS_PACKET_SIZE,
};
use crate::error::{CaptureError, SourceError};
use crate::queue::BoundedQueue;
use crate::sink::Sink;
use crate::source::{LockState, Source, wait_for_lock};
use crate::types::{ChannelConfig, FrontendStatus, PipelineStats};

/// Units reserved per allocation of the producer's read buffer
const READ_AHEAD_UNITS: usize = 64;

/// An owned, non-empty chunk of captured stream.
///
/// Moves from producer to queue to consumer; never shared.
#[derive(Debug, PartialEq, Eq)]
pub struct Packet(Bytes);

impl Packet {
    /// `None` for empty data: empty units are never queued.
    pub fn new(data: Bytes) -> Option<Self> {
        if data.is_empty() { None } else { Some(Self(data)) }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Tunables for a single pipeline
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Bytes requested per source read
    pub packet_size: usize,
    /// Producer stops reading while this many units are queued; `None` never waits
    pub max_backlog: Option<usize>,
    /// How long to wait for frontend lock after tuning; zero skips the wait
    pub lock_timeout: Duration,
    /// How often the producer refreshes frontend status between reads
    pub status_interval: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            packet_size: TS_PACKET_SIZE,
            max_backlog: Some(DEFAULT_MAX_BACKLOG),
            lock_timeout: LOCK_TIMEOUT,
            status_interval: STATUS_INTERVAL,
        }
    }
}

/// Lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Running,
    StopRequested,
    /// Producer finished; consumer flushing what is left
    Draining,
    Joined,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::StopRequested => "stopping",
            Self::Draining => "draining",
            Self::Joined => "joined",
        }
    }
}

/// State shared by the producer, the consumer and observers.
struct Shared {
    queue: BoundedQueue<Packet>,
    stop: AtomicBool,
    producer_done: AtomicBool,
    bytes_produced: AtomicU64,
    bytes_consumed: AtomicU64,
    overflows: AtomicU64,
    read_errors: AtomicU64,
    write_errors: AtomicU64,
    status: AtomicU32,
}

impl Shared {
    fn new() -> Self {
        Self {
            queue: BoundedQueue::new(),
            stop: AtomicBool::new(false),
            producer_done: AtomicBool::new(false),
            bytes_produced: AtomicU64::new(0),
            bytes_consumed: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            status: AtomicU32::new(0),
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Runs once: flag first, then close the queue so a parked consumer wakes.
    fn mark_producer_done(&self) {
        if !self.producer_done.swap(true, Ordering::AcqRel) {
            self.queue.close();
        }
    }
}

/// Marks the producer done even if the read loop unwinds.
struct ProducerDoneGuard<'a>(&'a Shared);

impl Drop for ProducerDoneGuard<'_> {
    fn drop(&mut self) {
        self.0.mark_producer_done();
    }
}

/// First occurrence, then every `READ_WARN_EVERY`th
fn should_report(count: u64) -> bool {
    count == 1 || count % READ_WARN_EVERY == 0
}

/// Producer, consumer and queue for one channel.
pub struct CapturePipeline {
    channel: ChannelConfig,
    options: CaptureOptions,
    shared: Arc<Shared>,
    pending: Option<(Box<dyn Source>, Sink)>,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
    joined: bool,
}

impl CapturePipeline {
    pub fn new(
        channel: ChannelConfig,
        source: Box<dyn Source>,
        sink: Sink,
        options: CaptureOptions,
    ) -> Self {
        Self {
            channel,
            options,
            shared: Arc::new(Shared::new()),
            pending: Some((source, sink)),
            producer: None,
            consumer: None,
            joined: false,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.channel.identifier
    }

    pub fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    /// Tune, install filters, wait for lock, then spawn consumer and producer.
    ///
    /// Tune or filter failure is returned before any thread exists; the pipeline
    /// stays `Created` and owns nothing that needs joining.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        let (mut source, sink) = self.pending.take().ok_or(CaptureError::AlreadyStarted)?;
        let id = self.channel.identifier.clone();

        info!(channel = %id, source = %source.name(), tuning = %self.channel.tuning, "tuning");
        source
            .tune(&self.channel.tuning)
            .map_err(|e| CaptureError::source_failed(&id, e))?;
        debug!(channel = %id, "setting filters");
        source
            .set_filters()
            .map_err(|e| CaptureError::source_failed(&id, e))?;

        if !self.options.lock_timeout.is_zero() {
            match wait_for_lock(source.as_mut(), self.options.lock_timeout, LOCK_POLL_INTERVAL) {
                Ok(LockState::Locked(status)) | Ok(LockState::TimedOut(status)) => {
                    self.shared.status.store(status.0, Ordering::Release);
                }
                Err(e) => debug!(channel = %id, "frontend status unavailable: {e}"),
            }
        }

        let consumer = {
            let shared = self.shared.clone();
            let id = id.clone();
            std::thread::Builder::new()
                .name(format!("{id}-consumer"))
                .spawn(move || consume(&shared, sink, &id))
                .map_err(CaptureError::Spawn)?
        };

        let producer = {
            let shared = self.shared.clone();
            let options = self.options.clone();
            let id = id.clone();
            std::thread::Builder::new()
                .name(format!("{id}-producer"))
                .spawn(move || produce(&shared, source, &options, &id))
        };
        let producer = match producer {
            Ok(handle) => handle,
            Err(e) => {
                // no producer will ever close the queue; do it so the consumer exits
                self.shared.mark_producer_done();
                let _ = consumer.join();
                self.joined = true;
                return Err(CaptureError::Spawn(e));
            }
        };

        self.consumer = Some(consumer);
        self.producer = Some(producer);
        Ok(())
    }

    /// Ask the producer to stop after its current read. Idempotent, never blocks.
    pub fn stop(&self) {
        if !self.shared.stop.swap(true, Ordering::AcqRel) {
            info!(channel = %self.channel.identifier, "stop requested");
        }
    }

    /// Wait for both threads to exit. Requests a stop first if nobody did.
    pub fn join(&mut self) {
        if self.joined {
            return;
        }
        if self.producer.is_some() && !self.shared.stop_requested() {
            warn!(channel = %self.channel.identifier, "join without stop; stopping first");
            self.stop();
        }
        let handles = [
            ("producer", self.producer.take()),
            ("consumer", self.consumer.take()),
        ];
        for (role, handle) in handles {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!(channel = %self.channel.identifier, "{role} thread panicked");
                }
            }
        }
        self.joined = true;
        let stats = self.snapshot();
        info!(
            channel = %self.channel.identifier,
            produced = stats.bytes_produced,
            consumed = stats.bytes_consumed,
            "pipeline joined"
        );
    }

    /// Lock-free read of the running counters.
    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            bytes_produced: self.shared.bytes_produced.load(Ordering::Acquire),
            bytes_consumed: self.shared.bytes_consumed.load(Ordering::Acquire),
            overflows: self.shared.overflows.load(Ordering::Relaxed),
            read_errors: self.shared.read_errors.load(Ordering::Relaxed),
            write_errors: self.shared.write_errors.load(Ordering::Relaxed),
        }
    }

    pub fn state(&self) -> PipelineState {
        if self.joined {
            PipelineState::Joined
        } else if self.producer.is_none() {
            PipelineState::Created
        } else if self.shared.producer_done.load(Ordering::Acquire) {
            PipelineState::Draining
        } else if self.shared.stop_requested() {
            PipelineState::StopRequested
        } else {
            PipelineState::Running
        }
    }

    /// Last frontend status the producer observed
    pub fn frontend_status(&self) -> FrontendStatus {
        FrontendStatus(self.shared.status.load(Ordering::Acquire))
    }

    /// Units currently waiting for the consumer
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if self.producer.is_some() || self.consumer.is_some() {
            self.stop();
            self.join();
        }
    }
}

fn produce(shared: &Shared, mut source: Box<dyn Source>, options: &CaptureOptions, id: &str) {
    let _done = ProducerDoneGuard(shared);
    info!(channel = %id, "producer started");

    let packet_size = options.packet_size.max(1);
    let mut scratch = BytesMut::new();
    let mut last_status = Instant::now();
    let mut backlogged = false;

    while !shared.stop_requested() {
        if let Some(limit) = options.max_backlog {
            if !shared.queue.wait_for_room(limit, BACKLOG_WAIT_SLICE) {
                if !backlogged {
                    warn!(channel = %id, queued = limit, "writer is behind; pausing reads");
                    backlogged = true;
                }
                continue;
            }
            if backlogged {
                info!(channel = %id, "writer caught up; resuming reads");
                backlogged = false;
            }
        }

        if last_status.elapsed() >= options.status_interval {
            refresh_status(source.as_mut(), shared, id);
            last_status = Instant::now();
        }

        if scratch.capacity() < packet_size {
            scratch.reserve(packet_size * READ_AHEAD_UNITS);
        }
        scratch.resize(packet_size, 0);

        match source.read(&mut scratch[..]) {
            Ok(n) => {
                scratch.truncate(n);
                // zero bytes means "nothing yet": drop it and read again
                if let Some(packet) = Packet::new(scratch.split().freeze()) {
                    shared.bytes_produced.fetch_add(n as u64, Ordering::AcqRel);
                    shared.queue.push(packet);
                }
            }
            Err(SourceError::Overflow) => {
                scratch.clear();
                let count = shared.overflows.fetch_add(1, Ordering::Relaxed) + 1;
                if should_report(count) {
                    warn!(
                        channel = %id,
                        overflows = count,
                        "device buffer overflowed; data lost upstream"
                    );
                }
            }
            Err(e) => {
                scratch.clear();
                let count = shared.read_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if should_report(count) {
                    warn!(channel = %id, errors = count, "read failed: {e}");
                }
            }
        }
    }

    info!(
        channel = %id,
        produced = shared.bytes_produced.load(Ordering::Acquire),
        "producer stopped"
    );
}

fn refresh_status(source: &mut dyn Source, shared: &Shared, id: &str) {
    match source.status() {
        Ok(status) => {
            let previous = FrontendStatus(shared.status.swap(status.0, Ordering::AcqRel));
            if previous.has_lock() && !status.has_lock() {
                warn!(channel = %id, %status, "frontend lost lock");
            } else if !previous.has_lock() && status.has_lock() {
                info!(channel = %id, %status, "frontend locked");
            }
        }
        Err(e) => debug!(channel = %id, "status query failed: {e}"),
    }
    if let Ok(stats) = source.signal_stats() {
        debug!(
            channel = %id,
            strength = stats.strength_ratio(),
            snr = stats.snr,
            ber = stats.ber,
            uncorrected = stats.uncorrected_blocks,
            "signal statistics"
        );
    }
}

fn consume(shared: &Shared, mut sink: Sink, id: &str) {
    info!(channel = %id, "consumer started");

    // returns None only when the producer is done and the queue is empty
    while let Some(packet) = shared.queue.pop_or_drained() {
        match sink.write_all(packet.as_bytes()) {
            Ok(()) => {
                shared
                    .bytes_consumed
                    .fetch_add(packet.len() as u64, Ordering::AcqRel);
            }
            Err(e) => {
                let count = shared.write_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if should_report(count) {
                    error!(channel = %id, errors = count, "write failed: {e}");
                }
                if !shared.stop.swap(true, Ordering::AcqRel) {
                    warn!(channel = %id, "stopping capture after write failure");
                }
            }
        }
    }

    if let Err(e) = sink.flush() {
        shared.write_errors.fetch_add(1, Ordering::Relaxed);
        error!(channel = %id, "flush failed: {e}");
    }
    drop(sink);
    info!(
        channel = %id,
        consumed = shared.bytes_consumed.load(Ordering::Acquire),
        "consumer drained"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MockSource, ReadStep};
    use crate::types::{
        Bandwidth, CodeRate, DeliverySystem, GuardInterval, Hierarchy, Modulation,
        TransmissionMode, TuningParams,
    };
    use parking_lot::Mutex;
    use std::io::{self, Write};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn channel(id: &str) -> ChannelConfig {
        ChannelConfig {
            identifier: id.to_string(),
            tuning: TuningParams {
                delivery: DeliverySystem::DvbT,
                frequency: 570_000_000,
                bandwidth: Bandwidth::Mhz8,
                fec: CodeRate::Fec2_3,
                code_rate_lp: CodeRate::None,
                modulation: Modulation::Qam64,
                transmission: TransmissionMode::Mode8k,
                guard: GuardInterval::G1_32,
                hierarchy: Hierarchy::None,
            },
            adapter: 0,
        }
    }

    fn options() -> CaptureOptions {
        CaptureOptions {
            lock_timeout: Duration::ZERO,
            ..CaptureOptions::default()
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn empty_data_is_not_a_packet() {
        assert!(Packet::new(Bytes::new()).is_none());
        let packet = Packet::new(Bytes::from_static(&[0x47; 188])).unwrap();
        assert_eq!(packet.len(), 188);
    }

    #[test]
    fn zero_length_reads_never_enqueue() {
        let source = MockSource::new(vec![ReadStep::Empty; 50]);
        let probe = source.probe();
        let out = SharedBuf::default();
        let mut pipeline = CapturePipeline::new(
            channel("empty"),
            Box::new(source),
            Box::new(out.clone()),
            options(),
        );
        pipeline.start().unwrap();
        wait_until(|| probe.reads() >= 60);
        pipeline.stop();
        pipeline.join();

        assert_eq!(pipeline.snapshot(), PipelineStats::default());
        assert!(out.0.lock().is_empty());
    }

    #[test]
    fn lifecycle_states() {
        let source = MockSource::packets(3, 188);
        let mut pipeline = CapturePipeline::new(
            channel("life"),
            Box::new(source),
            Box::new(SharedBuf::default()),
            options(),
        );
        assert_eq!(pipeline.state(), PipelineState::Created);
        pipeline.start().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        pipeline.stop();
        assert!(matches!(
            pipeline.state(),
            PipelineState::StopRequested | PipelineState::Draining
        ));
        pipeline.join();
        assert_eq!(pipeline.state(), PipelineState::Joined);
        assert!(matches!(pipeline.start(), Err(CaptureError::AlreadyStarted)));
    }

    #[test]
    fn stop_is_idempotent() {
        let source = MockSource::packets(10, 188);
        let out = SharedBuf::default();
        let mut pipeline = CapturePipeline::new(
            channel("twice"),
            Box::new(source),
            Box::new(out.clone()),
            options(),
        );
        pipeline.start().unwrap();
        wait_until(|| pipeline.snapshot().bytes_consumed == 1880);
        pipeline.stop();
        pipeline.stop();
        pipeline.stop();
        pipeline.join();
        pipeline.join();
        assert_eq!(out.0.lock().len(), 1880);
    }

    #[test]
    fn tune_failure_never_starts_threads() {
        let source = MockSource::packets(1, 188).failing_tune();
        let mut pipeline = CapturePipeline::new(
            channel("dead"),
            Box::new(source),
            Box::new(SharedBuf::default()),
            options(),
        );
        let err = pipeline.start().unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Source { ref channel, source: SourceError::Tune(_) } if channel == "dead"
        ));
        assert_eq!(pipeline.state(), PipelineState::Created);
    }

    #[test]
    fn filter_failure_is_fatal_too() {
        let source = MockSource::packets(1, 188).failing_filters();
        let mut pipeline = CapturePipeline::new(
            channel("nofilter"),
            Box::new(source),
            Box::new(SharedBuf::default()),
            options(),
        );
        assert!(matches!(
            pipeline.start(),
            Err(CaptureError::Source { source: SourceError::Filter(_), .. })
        ));
    }

    #[test]
    fn transient_read_errors_are_counted_and_skipped() {
        let source = MockSource::new(vec![
            ReadStep::Data(vec![1; 188]),
            ReadStep::Overflow,
            ReadStep::Fail(io::ErrorKind::Other),
            ReadStep::Overflow,
            ReadStep::Data(vec![2; 188]),
        ]);
        let out = SharedBuf::default();
        let mut pipeline = CapturePipeline::new(
            channel("flaky"),
            Box::new(source),
            Box::new(out.clone()),
            options(),
        );
        pipeline.start().unwrap();
        wait_until(|| pipeline.snapshot().bytes_consumed == 376);
        pipeline.stop();
        pipeline.join();

        let stats = pipeline.snapshot();
        assert_eq!(stats.overflows, 2);
        assert_eq!(stats.read_errors, 1);
        let written = out.0.lock().clone();
        assert_eq!(&written[..188], &[1; 188][..]);
        assert_eq!(&written[188..], &[2; 188][..]);
    }

    #[test]
    fn short_reads_keep_their_length() {
        let source = MockSource::new(vec![
            ReadStep::Data(vec![9; 100]),
            ReadStep::Data(vec![8; 188]),
        ]);
        let out = SharedBuf::default();
        let mut pipeline = CapturePipeline::new(
            channel("short"),
            Box::new(source),
            Box::new(out.clone()),
            options(),
        );
        pipeline.start().unwrap();
        wait_until(|| pipeline.snapshot().bytes_consumed == 288);
        pipeline.stop();
        pipeline.join();
        assert_eq!(out.0.lock().len(), 288);
    }

    #[test]
    fn write_failure_stops_the_pipeline() {
        let source = MockSource::new(vec![]).endless(vec![0x47; 188], Duration::from_millis(1));
        let mut pipeline = CapturePipeline::new(
            channel("full"),
            Box::new(source),
            Box::new(FailingSink),
            options(),
        );
        pipeline.start().unwrap();
        wait_until(|| pipeline.state() != PipelineState::Running);
        pipeline.join();
        let stats = pipeline.snapshot();
        assert!(stats.write_errors >= 1);
        assert_eq!(stats.bytes_consumed, 0);
    }

    #[test]
    fn backlog_limit_pauses_the_producer() {
        struct Stalled(Arc<AtomicBool>);
        impl Write for Stalled {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                while !self.0.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let release = Arc::new(AtomicBool::new(false));
        let source = MockSource::packets(100, 188);
        let opts = CaptureOptions {
            max_backlog: Some(4),
            ..options()
        };
        let mut pipeline = CapturePipeline::new(
            channel("slow"),
            Box::new(source),
            Box::new(Stalled(release.clone())),
            opts,
        );
        pipeline.start().unwrap();
        wait_until(|| pipeline.queued() == 4);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(pipeline.queued(), 4);
        // one more is held by the blocked writer
        assert_eq!(pipeline.snapshot().bytes_produced, 5 * 188);

        release.store(true, Ordering::SeqCst);
        wait_until(|| pipeline.snapshot().bytes_consumed == 100 * 188);
        pipeline.stop();
        pipeline.join();
    }

    #[test]
    fn drop_joins_a_running_pipeline() {
        let source = MockSource::new(vec![]).endless(vec![0x47; 188], Duration::from_millis(1));
        let out = SharedBuf::default();
        {
            let mut pipeline = CapturePipeline::new(
                channel("dropped"),
                Box::new(source),
                Box::new(out.clone()),
                options(),
            );
            pipeline.start().unwrap();
            wait_until(|| pipeline.snapshot().bytes_consumed > 0);
        }
        assert_eq!(out.0.lock().len() % 188, 0);
    }
}
