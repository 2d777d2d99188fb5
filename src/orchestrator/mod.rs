//! Runs every configured channel, reports on them, and shuts them down together.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::CaptureError;
use crate::pipeline::{CaptureOptions, CapturePipeline};
use crate::report::ChannelReport;
use crate::sink::SinkProvider;
use crate::source::SourceProvider;
use crate::stats::Throughput;
use crate::types::ChannelConfig;

/// A channel that never reached `Running`
#[derive(Debug)]
pub struct FailedChannel {
    pub identifier: String,
    pub error: CaptureError,
}

/// Owns one pipeline per started channel, in configuration order.
pub struct Orchestrator {
    pipelines: Vec<CapturePipeline>,
    failed: Vec<FailedChannel>,
    started: Instant,
    packet_size: usize,
}

impl Orchestrator {
    /// Open, tune and start every channel. A channel that fails is recorded and
    /// skipped; its siblings still start.
    pub fn start(
        channels: Vec<ChannelConfig>,
        sources: &dyn SourceProvider,
        sinks: &dyn SinkProvider,
        options: &CaptureOptions,
    ) -> Self {
        // rates count from here; channels start one after another
        let started = Instant::now();
        let mut pipelines = Vec::with_capacity(channels.len());
        let mut failed = Vec::new();
        let mut seen = HashSet::new();

        for channel in channels {
            let identifier = channel.identifier.clone();
            if !seen.insert(identifier.clone()) {
                let error = CaptureError::DuplicateChannel(identifier.clone());
                error!(channel = %identifier, "{error}");
                failed.push(FailedChannel { identifier, error });
                continue;
            }
            match start_pipeline(channel, sources, sinks, options) {
                Ok(pipeline) => pipelines.push(pipeline),
                Err(error) => {
                    error!(channel = %identifier, "channel failed to start: {error}");
                    failed.push(FailedChannel { identifier, error });
                }
            }
        }

        info!(running = pipelines.len(), failed = failed.len(), "capture started");
        Self {
            pipelines,
            failed,
            started,
            packet_size: options.packet_size,
        }
    }

    /// Pipelines that started successfully
    pub fn active(&self) -> usize {
        self.pipelines.len()
    }

    pub fn failed(&self) -> &[FailedChannel] {
        &self.failed
    }

    pub fn pipeline(&self, identifier: &str) -> Option<&CapturePipeline> {
        self.pipelines.iter().find(|p| p.identifier() == identifier)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// One report per configured channel: running ones first, then failures.
    pub fn reports(&self) -> Vec<ChannelReport> {
        let elapsed = self.elapsed();
        let mut reports: Vec<ChannelReport> = self
            .pipelines
            .iter()
            .map(|p| {
                let stats = p.snapshot();
                let throughput = Throughput::from_snapshot(&stats, elapsed, self.packet_size);
                ChannelReport::new(
                    p.identifier(),
                    p.state().as_str(),
                    p.frontend_status(),
                    &stats,
                    &throughput,
                )
            })
            .collect();
        reports.extend(
            self.failed
                .iter()
                .map(|f| ChannelReport::failed(&f.identifier, f.error.to_string())),
        );
        reports
    }

    /// Request stop on every pipeline. Never blocks.
    pub fn stop_all(&self) {
        for pipeline in &self.pipelines {
            pipeline.stop();
        }
    }

    /// Wait for every pipeline to drain. Call after [`stop_all`](Self::stop_all).
    pub fn join_all(&mut self) {
        for pipeline in &mut self.pipelines {
            pipeline.join();
        }
    }

    /// Stop everything, then join everything, and return the final reports.
    pub fn shutdown(mut self) -> Vec<ChannelReport> {
        info!(pipelines = self.pipelines.len(), "stopping all pipelines");
        self.stop_all();
        self.join_all();
        info!("all pipelines joined");
        self.reports()
    }

    /// Call `report` every `interval` until `shutdown` is cancelled, then stop
    /// and join all pipelines off the async runtime. Returns the final reports.
    pub async fn run<F>(
        self,
        shutdown: CancellationToken,
        interval: Duration,
        mut report: F,
    ) -> Vec<ChannelReport>
    where
        F: FnMut(&[ChannelReport], Duration),
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => report(&self.reports(), self.elapsed()),
            }
        }

        info!("shutdown requested");
        match tokio::task::spawn_blocking(move || self.shutdown()).await {
            Ok(reports) => reports,
            Err(e) => {
                error!("shutdown task failed: {e}");
                Vec::new()
            }
        }
    }
}

fn start_pipeline(
    channel: ChannelConfig,
    sources: &dyn SourceProvider,
    sinks: &dyn SinkProvider,
    options: &CaptureOptions,
) -> Result<CapturePipeline, CaptureError> {
    let source = sources
        .open(&channel)
        .map_err(|e| CaptureError::source_failed(&channel.identifier, e))?;
    let sink = sinks.open(&channel)?;
    let mut pipeline = CapturePipeline::new(channel, source, sink, options.clone());
    pipeline.start()?;
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::sink::Sink;
    use crate::source::{MockSource, Source};
    use crate::types::{
        Bandwidth, CodeRate, DeliverySystem, GuardInterval, Hierarchy, Modulation,
        TransmissionMode, TuningParams,
    };
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::{self, Write};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct MemorySinks(Arc<Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>>);

    struct MemoryWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for MemoryWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SinkProvider for MemorySinks {
        fn open(&self, channel: &ChannelConfig) -> Result<Sink, CaptureError> {
            let buf = Arc::new(Mutex::new(Vec::new()));
            self.0.lock().insert(channel.identifier.clone(), buf.clone());
            Ok(Box::new(MemoryWriter(buf)))
        }
    }

    impl MemorySinks {
        fn written(&self, id: &str) -> usize {
            self.0.lock().get(id).map_or(0, |b| b.lock().len())
        }
    }

    fn channel(id: &str, adapter: u32) -> ChannelConfig {
        ChannelConfig {
            identifier: id.to_string(),
            tuning: TuningParams {
                delivery: DeliverySystem::DvbT,
                frequency: 545_800_000,
                bandwidth: Bandwidth::Mhz8,
                fec: CodeRate::Fec2_3,
                code_rate_lp: CodeRate::None,
                modulation: Modulation::Qam256,
                transmission: TransmissionMode::Mode32k,
                guard: GuardInterval::G1_128,
                hierarchy: Hierarchy::None,
            },
            adapter,
        }
    }

    fn options() -> CaptureOptions {
        CaptureOptions {
            lock_timeout: Duration::ZERO,
            ..CaptureOptions::default()
        }
    }

    /// Adapter 1 fails to tune; every other adapter streams null packets
    fn provider(channel: &ChannelConfig) -> Result<Box<dyn Source>, SourceError> {
        let source =
            MockSource::new(vec![]).endless(vec![0x47; 188], Duration::from_millis(1));
        if channel.adapter == 1 {
            Ok(Box::new(source.failing_tune()))
        } else {
            Ok(Box::new(source))
        }
    }

    #[test]
    fn failed_channel_does_not_stop_siblings() {
        let sinks = MemorySinks::default();
        let channels = vec![channel("PSB3", 0), channel("COM7", 1), channel("PSB1", 2)];
        let orchestrator = Orchestrator::start(channels, &provider, &sinks, &options());

        assert_eq!(orchestrator.active(), 2);
        assert_eq!(orchestrator.failed().len(), 1);
        assert_eq!(orchestrator.failed()[0].identifier, "COM7");
        assert!(orchestrator.pipeline("COM7").is_none());

        std::thread::sleep(Duration::from_millis(30));
        let reports = orchestrator.reports();
        let ids: Vec<&str> = reports.iter().map(|r| r.channel.as_str()).collect();
        assert_eq!(ids, ["PSB3", "PSB1", "COM7"]);
        assert_eq!(reports[2].state, "failed");
        assert_eq!(reports[2].read_bytes, 0);

        let last = orchestrator.shutdown();
        for report in last.iter().filter(|r| r.state == "joined") {
            assert_eq!(report.read_bytes, report.written_bytes);
            assert_eq!(report.outstanding_packets, 0);
            assert_eq!(sinks.written(&report.channel) as u64, report.written_bytes);
        }
        assert!(last[0].written_bytes > 0);
    }

    #[test]
    fn duplicate_identifier_is_rejected() {
        let sinks = MemorySinks::default();
        let channels = vec![channel("PSB3", 0), channel("PSB3", 2)];
        let orchestrator = Orchestrator::start(channels, &provider, &sinks, &options());
        assert_eq!(orchestrator.active(), 1);
        assert!(matches!(
            orchestrator.failed()[0].error,
            CaptureError::DuplicateChannel(ref id) if id == "PSB3"
        ));
        orchestrator.shutdown();
    }

    #[test]
    fn rates_count_from_before_a_slow_start() {
        let slow_open = Duration::from_millis(300);
        let sources = |channel: &ChannelConfig| -> Result<Box<dyn Source>, SourceError> {
            if channel.adapter == 2 {
                std::thread::sleep(slow_open);
            }
            provider(channel)
        };
        let sinks = MemorySinks::default();
        let channels = vec![channel("PSB3", 0), channel("PSB1", 2)];
        let orchestrator = Orchestrator::start(channels, &sources, &sinks, &options());
        assert!(orchestrator.elapsed() >= slow_open);

        let reports = orchestrator.reports();
        let first = &reports[0];
        assert!(first.read_bytes > 0);
        // PSB3 has been reading for at least the whole slow open
        let ceiling = first.read_bytes as f64 / slow_open.as_secs_f64();
        assert!(
            first.read_rate_bps <= ceiling,
            "rate {} above {ceiling}",
            first.read_rate_bps
        );
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn already_cancelled_run_still_drains() {
        let sinks = MemorySinks::default();
        let orchestrator =
            Orchestrator::start(vec![channel("PSB3", 0)], &provider, &sinks, &options());
        let token = CancellationToken::new();
        token.cancel();

        let mut ticks = 0;
        let last = orchestrator
            .run(token, Duration::from_millis(10), |_, _| ticks += 1)
            .await;

        assert_eq!(ticks, 0);
        assert_eq!(last[0].state, "joined");
        assert_eq!(last[0].read_bytes, last[0].written_bytes);
        assert_eq!(sinks.written("PSB3") as u64, last[0].written_bytes);
    }

    #[tokio::test]
    async fn run_reports_until_cancelled() {
        let sinks = MemorySinks::default();
        let orchestrator =
            Orchestrator::start(vec![channel("PSB3", 0)], &provider, &sinks, &options());
        let token = CancellationToken::new();

        let cancel = token.clone();
        let mut ticks = 0;
        let last = orchestrator
            .run(token, Duration::from_millis(10), move |reports, _elapsed| {
                assert_eq!(reports.len(), 1);
                ticks += 1;
                if ticks == 3 {
                    cancel.cancel();
                }
            })
            .await;

        assert_eq!(last.len(), 1);
        assert_eq!(last[0].state, "joined");
        assert_eq!(last[0].read_bytes, last[0].written_bytes);
        assert_eq!(sinks.written("PSB3") as u64, last[0].written_bytes);
    }
}
