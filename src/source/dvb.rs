//! Linux DVB adapter (v3 frontend API).
//!
//! Adapter `N` is driven through `/dev/dvb/adapterN/{frontend0,demux0,dvr0}`: the
//! frontend is tuned, the demux is told to pass the whole transport stream to
//! the dvr node, and the dvr node is read for packets.

use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::mem::size_of;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::constants::{DVB_DEVICE_ROOT, FULL_TS_PID};
use crate::error::SourceError;
use crate::source::{Source, SourceProvider};
use crate::types::{
    Bandwidth, ChannelConfig, CodeRate, FrontendStatus, GuardInterval, Hierarchy, Modulation,
    SignalStats, TransmissionMode, TuningParams,
};

/// How long a dvr read waits for data before reporting an empty read
const DVR_POLL_TIMEOUT_MS: libc::c_int = 250;

/* ───── kernel ABI (linux/dvb/frontend.h, linux/dvb/dmx.h) ───── */

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct OfdmParameters {
    bandwidth: u32,
    code_rate_hp: u32,
    code_rate_lp: u32,
    constellation: u32,
    transmission_mode: u32,
    guard_interval: u32,
    hierarchy_information: u32,
}

/// `struct dvb_frontend_parameters`; OFDM is the largest member of its union
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct FrontendParameters {
    frequency: u32,
    inversion: u32,
    ofdm: OfdmParameters,
}

#[repr(C)]
#[allow(dead_code)]
struct FrontendInfo {
    name: [libc::c_char; 128],
    fe_type: u32,
    frequency_min: u32,
    frequency_max: u32,
    frequency_stepsize: u32,
    frequency_tolerance: u32,
    symbol_rate_min: u32,
    symbol_rate_max: u32,
    symbol_rate_tolerance: u32,
    notifier_delay: u32,
    caps: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct PesFilterParams {
    pid: u16,
    input: u32,
    output: u32,
    pes_type: u32,
    flags: u32,
}

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

/// `_IOC(dir, 'o', nr, size)` for the generic ioctl layout
const fn ioc(dir: u32, nr: u32, size: usize) -> libc::Ioctl {
    ((dir << 30) | ((size as u32) << 16) | ((b'o' as u32) << 8) | nr) as libc::Ioctl
}

const FE_GET_INFO: libc::Ioctl = ioc(IOC_READ, 61, size_of::<FrontendInfo>());
const FE_READ_STATUS: libc::Ioctl = ioc(IOC_READ, 69, size_of::<u32>());
const FE_READ_BER: libc::Ioctl = ioc(IOC_READ, 70, size_of::<u32>());
const FE_READ_SIGNAL_STRENGTH: libc::Ioctl = ioc(IOC_READ, 71, size_of::<u16>());
const FE_READ_SNR: libc::Ioctl = ioc(IOC_READ, 72, size_of::<u16>());
const FE_READ_UNCORRECTED_BLOCKS: libc::Ioctl = ioc(IOC_READ, 73, size_of::<u32>());
const FE_SET_FRONTEND: libc::Ioctl = ioc(IOC_WRITE, 76, size_of::<FrontendParameters>());
const DMX_SET_PES_FILTER: libc::Ioctl = ioc(IOC_WRITE, 44, size_of::<PesFilterParams>());

const INVERSION_AUTO: u32 = 2;
const DMX_IN_FRONTEND: u32 = 0;
const DMX_OUT_TS_TAP: u32 = 2;
const DMX_PES_OTHER: u32 = 20;
const DMX_IMMEDIATE_START: u32 = 4;

fn fe_bandwidth(bandwidth: Bandwidth) -> u32 {
    match bandwidth {
        Bandwidth::Mhz8 => 0,
        Bandwidth::Mhz7 => 1,
        Bandwidth::Mhz6 => 2,
        Bandwidth::Auto => 3,
        Bandwidth::Mhz5 => 4,
        Bandwidth::Mhz10 => 5,
        Bandwidth::Mhz1_712 => 6,
    }
}

fn fe_code_rate(rate: CodeRate) -> u32 {
    match rate {
        CodeRate::None => 0,
        CodeRate::Fec1_2 => 1,
        CodeRate::Fec2_3 => 2,
        CodeRate::Fec3_4 => 3,
        CodeRate::Fec4_5 => 4,
        CodeRate::Fec5_6 => 5,
        CodeRate::Fec6_7 => 6,
        CodeRate::Fec7_8 => 7,
        CodeRate::Fec8_9 => 8,
        CodeRate::Auto => 9,
        CodeRate::Fec3_5 => 10,
        CodeRate::Fec9_10 => 11,
        CodeRate::Fec2_5 => 12,
    }
}

fn fe_modulation(modulation: Modulation) -> u32 {
    match modulation {
        Modulation::Qpsk => 0,
        Modulation::Qam16 => 1,
        Modulation::Qam32 => 2,
        Modulation::Qam64 => 3,
        Modulation::Qam128 => 4,
        Modulation::Qam256 => 5,
        Modulation::Auto => 6,
    }
}

fn fe_transmit_mode(mode: TransmissionMode) -> u32 {
    match mode {
        TransmissionMode::Mode2k => 0,
        TransmissionMode::Mode8k => 1,
        TransmissionMode::Auto => 2,
        TransmissionMode::Mode4k => 3,
        TransmissionMode::Mode1k => 4,
        TransmissionMode::Mode16k => 5,
        TransmissionMode::Mode32k => 6,
    }
}

fn fe_guard_interval(guard: GuardInterval) -> u32 {
    match guard {
        GuardInterval::G1_32 => 0,
        GuardInterval::G1_16 => 1,
        GuardInterval::G1_8 => 2,
        GuardInterval::G1_4 => 3,
        GuardInterval::Auto => 4,
        GuardInterval::G1_128 => 5,
        GuardInterval::G19_128 => 6,
        GuardInterval::G19_256 => 7,
    }
}

fn fe_hierarchy(hierarchy: Hierarchy) -> u32 {
    match hierarchy {
        Hierarchy::None => 0,
        Hierarchy::H1 => 1,
        Hierarchy::H2 => 2,
        Hierarchy::H4 => 3,
        Hierarchy::Auto => 4,
    }
}

fn frontend_parameters(params: &TuningParams) -> FrontendParameters {
    FrontendParameters {
        frequency: params.frequency,
        inversion: INVERSION_AUTO,
        ofdm: OfdmParameters {
            bandwidth: fe_bandwidth(params.bandwidth),
            code_rate_hp: fe_code_rate(params.fec),
            code_rate_lp: fe_code_rate(params.code_rate_lp),
            constellation: fe_modulation(params.modulation),
            transmission_mode: fe_transmit_mode(params.transmission),
            guard_interval: fe_guard_interval(params.guard),
            hierarchy_information: fe_hierarchy(params.hierarchy),
        },
    }
}

fn ioctl<T>(file: &File, request: libc::Ioctl, arg: &mut T) -> io::Result<()> {
    // SAFETY: `arg` is a live, exclusively borrowed value whose layout matches
    // the kernel structure encoded in `request`.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request, arg as *mut T) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Wait up to `timeout_ms` for `file` to become readable.
fn poll_readable(file: &File, timeout_ms: libc::c_int) -> io::Result<bool> {
    let mut fds = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: one valid pollfd, count 1.
    let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    match rc {
        rc if rc < 0 => Err(io::Error::last_os_error()),
        0 => Ok(false),
        _ => Ok(true),
    }
}

pub fn device_path(root: &Path, adapter: u32, node: &str) -> PathBuf {
    root.join(format!("adapter{adapter}")).join(format!("{node}0"))
}

fn open_node(path: &Path, write: bool, nonblocking: bool) -> Result<File, SourceError> {
    let mut options = OpenOptions::new();
    options.read(true).write(write);
    if nonblocking {
        options.custom_flags(libc::O_NONBLOCK);
    }
    options.open(path).map_err(|source| SourceError::Open {
        path: path.display().to_string(),
        source,
    })
}

/// One tuner on one adapter
pub struct DvbSource {
    adapter: u32,
    name: String,
    frontend: File,
    demux: File,
    dvr: File,
}

impl DvbSource {
    pub fn open(root: &Path, adapter: u32) -> Result<Self, SourceError> {
        let frontend_path = device_path(root, adapter, "frontend");
        let frontend = open_node(&frontend_path, true, true)?;
        let demux = open_node(&device_path(root, adapter, "demux"), true, true)?;
        let dvr = open_node(&device_path(root, adapter, "dvr"), false, false)?;

        let name = Self::query_name(&frontend).unwrap_or_else(|e| {
            debug!(adapter, "FE_GET_INFO failed: {e}");
            "unknown".to_string()
        });
        info!(adapter, device = %frontend_path.display(), "using {name}");

        Ok(Self {
            adapter,
            name,
            frontend,
            demux,
            dvr,
        })
    }

    fn query_name(frontend: &File) -> io::Result<String> {
        let mut info = FrontendInfo {
            name: [0; 128],
            fe_type: 0,
            frequency_min: 0,
            frequency_max: 0,
            frequency_stepsize: 0,
            frequency_tolerance: 0,
            symbol_rate_min: 0,
            symbol_rate_max: 0,
            symbol_rate_tolerance: 0,
            notifier_delay: 0,
            caps: 0,
        };
        ioctl(frontend, FE_GET_INFO, &mut info)?;
        // the kernel NUL-terminates; force it anyway
        info.name[127] = 0;
        // SAFETY: NUL-terminated above, buffer outlives the borrow.
        let name = unsafe { CStr::from_ptr(info.name.as_ptr()) };
        Ok(name.to_string_lossy().into_owned())
    }
}

impl Source for DvbSource {
    fn name(&self) -> String {
        format!("adapter{} ({})", self.adapter, self.name)
    }

    fn tune(&mut self, params: &TuningParams) -> Result<(), SourceError> {
        let mut raw = frontend_parameters(params);
        debug!(adapter = self.adapter, ?raw, "FE_SET_FRONTEND");
        ioctl(&self.frontend, FE_SET_FRONTEND, &mut raw).map_err(SourceError::Tune)
    }

    fn set_filters(&mut self) -> Result<(), SourceError> {
        let mut filter = PesFilterParams {
            pid: FULL_TS_PID,
            input: DMX_IN_FRONTEND,
            output: DMX_OUT_TS_TAP,
            pes_type: DMX_PES_OTHER,
            flags: DMX_IMMEDIATE_START,
        };
        ioctl(&self.demux, DMX_SET_PES_FILTER, &mut filter).map_err(SourceError::Filter)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        match poll_readable(&self.dvr, DVR_POLL_TIMEOUT_MS) {
            Ok(false) => return Ok(0),
            Ok(true) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(SourceError::Io(e)),
        }
        match self.dvr.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.raw_os_error() == Some(libc::EOVERFLOW) => Err(SourceError::Overflow),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(SourceError::Io(e)),
        }
    }

    fn status(&mut self) -> Result<FrontendStatus, SourceError> {
        let mut status: u32 = 0;
        ioctl(&self.frontend, FE_READ_STATUS, &mut status).map_err(SourceError::Status)?;
        Ok(FrontendStatus(status))
    }

    fn signal_stats(&mut self) -> Result<SignalStats, SourceError> {
        read_signal_stats(&self.frontend).map_err(SourceError::Status)
    }
}

fn read_signal_stats(frontend: &File) -> io::Result<SignalStats> {
    let mut stats = SignalStats::default();
    ioctl(frontend, FE_READ_SIGNAL_STRENGTH, &mut stats.strength)?;
    ioctl(frontend, FE_READ_SNR, &mut stats.snr)?;
    ioctl(frontend, FE_READ_BER, &mut stats.ber)?;
    ioctl(frontend, FE_READ_UNCORRECTED_BLOCKS, &mut stats.uncorrected_blocks)?;
    Ok(stats)
}

/// Opens `/dev/dvb/adapter<N>` for each channel's adapter index
pub struct DvbProvider {
    root: PathBuf,
}

impl DvbProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for DvbProvider {
    fn default() -> Self {
        Self::new(DVB_DEVICE_ROOT)
    }
}

impl SourceProvider for DvbProvider {
    fn open(&self, channel: &ChannelConfig) -> Result<Box<dyn Source>, SourceError> {
        Ok(Box::new(DvbSource::open(&self.root, channel.adapter)?))
    }
}
