// src/lib.rs
pub mod capture {
    use std::io::Write;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use anyhow::{Context, bail};
    use tokio_util::sync::CancellationToken;
    use tracing::{info, warn};

    use crate::config::ChannelList;
    use crate::network::UdpProvider;
    use crate::orchestrator::Orchestrator;
    use crate::pipeline::CaptureOptions;
    use crate::report::{ChannelReport, Reporter};
    use crate::sink::OutputDir;
    use crate::source::{MockProvider, SourceProvider};

    /// Where the stream bytes come from
    #[derive(Debug, Clone)]
    pub enum SourceKind {
        /// `/dev/dvb/adapterN`, Linux only
        Dvb,
        /// One UDP port per adapter index, counting up from the base address
        Udp(SocketAddr),
        /// Endless null packets, for running without hardware
        Mock,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ReportFormat {
        Text,
        Json,
    }

    pub struct Options {
        pub channels: PathBuf,
        pub output_dir: PathBuf,
        pub refresh: Duration,
        pub format: ReportFormat,
        pub source: SourceKind,
        pub capture: CaptureOptions,
    }

    /// Async entry-point; returns after Ctrl-C / SIGTERM once every pipeline drained
    pub async fn run(opts: Options) -> anyhow::Result<()> {
        let shutdown = CancellationToken::new();
        // before any channel starts writing, so an early Ctrl-C still drains
        let watcher = crate::signal::spawn_watcher(shutdown.clone());
        let result = run_until(opts, shutdown.clone()).await;
        shutdown.cancel();
        let _ = watcher.await;
        result
    }

    /// Capture until `shutdown` is cancelled. A token cancelled during start-up
    /// stops and drains whatever already started.
    pub async fn run_until(opts: Options, shutdown: CancellationToken) -> anyhow::Result<()> {
        let list = ChannelList::load(&opts.channels)?;
        if !list.errors.is_empty() {
            warn!(skipped = list.errors.len(), "some channel lines were rejected");
        }
        if list.channels.is_empty() {
            bail!("no channels configured in {}", opts.channels.display());
        }

        std::fs::create_dir_all(&opts.output_dir).with_context(|| {
            format!("cannot create output directory {}", opts.output_dir.display())
        })?;

        let sources = provider(&opts.source)?;
        let sinks = OutputDir::new(&opts.output_dir);
        let capture = opts.capture.clone();
        let started = Instant::now();
        // tuning and lock waits block
        let orchestrator = tokio::task::spawn_blocking(move || {
            Orchestrator::start(list.channels, sources.as_ref(), &sinks, &capture)
        })
        .await
        .context("channel start-up task failed")?;

        if orchestrator.active() == 0 {
            for failed in orchestrator.failed() {
                warn!(channel = %failed.identifier, "{}", failed.error);
            }
            bail!("no channel could be started");
        }

        let format = opts.format;
        let last = orchestrator
            .run(shutdown, opts.refresh, |reports, elapsed| {
                emit(format, reports, elapsed)
            })
            .await;

        let written: u64 = last.iter().map(|r| r.written_bytes).sum();
        info!(channels = last.len(), written, "capture finished");
        emit(format, &last, started.elapsed());
        Ok(())
    }

    fn provider(kind: &SourceKind) -> anyhow::Result<Box<dyn SourceProvider>> {
        Ok(match kind {
            #[cfg(target_os = "linux")]
            SourceKind::Dvb => Box::new(crate::source::dvb::DvbProvider::default()),
            #[cfg(not(target_os = "linux"))]
            SourceKind::Dvb => bail!("DVB capture needs Linux; use --source udp or mock"),
            SourceKind::Udp(base) => Box::new(UdpProvider::new(*base)),
            SourceKind::Mock => Box::new(MockProvider::new(Duration::from_millis(1))),
        })
    }

    /// Write one snapshot to stdout
    fn emit(format: ReportFormat, reports: &[ChannelReport], elapsed: Duration) {
        let text = match format {
            ReportFormat::Text => Reporter::text(reports),
            ReportFormat::Json => Reporter::json(reports, elapsed.as_secs_f64()),
        };
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{text}").and_then(|_| out.flush()) {
            warn!("cannot write report: {e}");
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn options(dir: &std::path::Path) -> Options {
            let channels = dir.join("channels.conf");
            std::fs::write(
                &channels,
                "T 545800000 8MHz 2/3 NONE QAM256 32k 1/128 NONE # PSB3\n\
                 T 570000000 8MHz 2/3 NONE QAM64 8k 1/32 NONE # COM7\n",
            )
            .unwrap();
            Options {
                channels,
                output_dir: dir.join("out"),
                refresh: Duration::from_secs(1),
                format: ReportFormat::Json,
                source: SourceKind::Mock,
                capture: CaptureOptions {
                    lock_timeout: Duration::ZERO,
                    ..CaptureOptions::default()
                },
            }
        }

        #[tokio::test]
        async fn shutdown_during_start_up_still_drains() {
            let dir = tempfile::tempdir().unwrap();
            let shutdown = CancellationToken::new();
            shutdown.cancel();

            run_until(options(dir.path()), shutdown).await.unwrap();

            for id in ["PSB3", "COM7"] {
                let len = std::fs::metadata(dir.path().join("out").join(format!("{id}.ts")))
                    .unwrap()
                    .len();
                assert_eq!(len % 188, 0);
            }
        }

        #[tokio::test]
        async fn empty_channel_list_is_an_error() {
            let dir = tempfile::tempdir().unwrap();
            let opts = options(dir.path());
            std::fs::write(&opts.channels, "# nothing here\n").unwrap();
            let err = run_until(opts, CancellationToken::new()).await.unwrap_err();
            assert!(err.to_string().contains("no channels configured"));
        }
    }
}

pub mod config;
pub mod constants;
pub mod error;
pub mod network;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod report;
pub mod signal;
pub mod sink;
pub mod source;
pub mod stats;
pub mod types;

pub use config::ChannelList;
pub use error::{CaptureError, ConfigError, LineError, SourceError};
pub use orchestrator::Orchestrator;
pub use pipeline::{CaptureOptions, CapturePipeline, Packet, PipelineState};
pub use queue::BoundedQueue;
pub use source::{Source, SourceProvider};
pub use types::{ChannelConfig, PipelineStats, TuningParams};
