use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dvb_capture::capture::{Options, ReportFormat, SourceKind, run};
use dvb_capture::constants::{DEFAULT_MAX_BACKLOG, LOCK_TIMEOUT, REPORT_INTERVAL};
use dvb_capture::pipeline::CaptureOptions;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    /// Linux DVB adapters under /dev/dvb
    Dvb,
    /// Transport stream over UDP / multicast
    Udp,
    /// Null packets, no hardware needed
    Mock,
}

#[derive(Parser)]
#[command(version, about = "Capture whole DVB transport streams, one file per channel")]
struct Opt {
    /// Channel list, one tuning line per channel
    #[arg(long)]
    channels: PathBuf,

    /// Directory that receives `<identifier>.ts` files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Seconds between throughput reports
    #[arg(long, default_value_t = REPORT_INTERVAL.as_secs())]
    refresh: u64,

    /// Print reports as JSON lines
    #[arg(long, default_value_t = false)]
    json: bool,

    #[arg(long, value_enum, default_value = "dvb")]
    source: Backend,

    /// UDP source: channel N listens on this port + N
    #[arg(long, default_value = "239.1.1.1:1234")]
    udp_base: SocketAddr,

    /// Packets queued before reading pauses (0 = unbounded)
    #[arg(long, default_value_t = DEFAULT_MAX_BACKLOG)]
    max_backlog: usize,

    /// Seconds to wait for frontend lock after tuning
    #[arg(long, default_value_t = LOCK_TIMEOUT.as_secs())]
    lock_timeout: u64,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[arg(short, long, default_value_t = false, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    init_logging(opt.verbose, opt.quiet);

    let source = match opt.source {
        Backend::Dvb => SourceKind::Dvb,
        Backend::Udp => SourceKind::Udp(opt.udp_base),
        Backend::Mock => SourceKind::Mock,
    };

    run(Options {
        channels: opt.channels,
        output_dir: opt.output_dir,
        refresh: Duration::from_secs(opt.refresh.max(1)),
        format: if opt.json { ReportFormat::Json } else { ReportFormat::Text },
        source,
        capture: CaptureOptions {
            max_backlog: (opt.max_backlog > 0).then_some(opt.max_backlog),
            lock_timeout: Duration::from_secs(opt.lock_timeout),
            ..CaptureOptions::default()
        },
    })
    .await
}

/// Logs go to stderr; stdout carries the reports
fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}
