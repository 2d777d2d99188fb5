use serde::Serialize;
use std::fmt;

/// Delivery system named by the first token of a channel line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliverySystem {
    DvbT,
    DvbT2,
}

impl DeliverySystem {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "T" => Some(Self::DvbT),
            "T2" => Some(Self::DvbT2),
            _ => None,
        }
    }
}

/// Channel bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Bandwidth {
    Mhz8,
    Mhz7,
    Mhz6,
    Mhz5,
    Mhz10,
    Mhz1_712,
    Auto,
}

impl Bandwidth {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "8MHZ" => Some(Self::Mhz8),
            "7MHZ" => Some(Self::Mhz7),
            "6MHZ" => Some(Self::Mhz6),
            "5MHZ" => Some(Self::Mhz5),
            "10MHZ" => Some(Self::Mhz10),
            "1.712MHZ" => Some(Self::Mhz1_712),
            "AUTO" => Some(Self::Auto),
            _ => None,
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            Self::Mhz8 => "8MHz",
            Self::Mhz7 => "7MHz",
            Self::Mhz6 => "6MHz",
            Self::Mhz5 => "5MHz",
            Self::Mhz10 => "10MHz",
            Self::Mhz1_712 => "1.712MHz",
            Self::Auto => "AUTO",
        }
    }
}

/// Forward error correction rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CodeRate {
    None,
    Fec1_2,
    Fec2_3,
    Fec3_4,
    Fec4_5,
    Fec5_6,
    Fec6_7,
    Fec7_8,
    Fec8_9,
    Fec3_5,
    Fec9_10,
    Fec2_5,
    Auto,
}

impl CodeRate {
    /// Unknown rates fall back to `Auto` and let the frontend work it out
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "NONE" => Self::None,
            "1/2" => Self::Fec1_2,
            "2/3" => Self::Fec2_3,
            "3/4" => Self::Fec3_4,
            "4/5" => Self::Fec4_5,
            "5/6" => Self::Fec5_6,
            "6/7" => Self::Fec6_7,
            "7/8" => Self::Fec7_8,
            "8/9" => Self::Fec8_9,
            "3/5" => Self::Fec3_5,
            "9/10" => Self::Fec9_10,
            "2/5" => Self::Fec2_5,
            _ => Self::Auto,
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Fec1_2 => "1/2",
            Self::Fec2_3 => "2/3",
            Self::Fec3_4 => "3/4",
            Self::Fec4_5 => "4/5",
            Self::Fec5_6 => "5/6",
            Self::Fec6_7 => "6/7",
            Self::Fec7_8 => "7/8",
            Self::Fec8_9 => "8/9",
            Self::Fec3_5 => "3/5",
            Self::Fec9_10 => "9/10",
            Self::Fec2_5 => "2/5",
            Self::Auto => "AUTO",
        }
    }
}

/// Constellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Modulation {
    Qpsk,
    Qam16,
    Qam32,
    Qam64,
    Qam128,
    Qam256,
    Auto,
}

impl Modulation {
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "QPSK" => Self::Qpsk,
            "QAM16" => Self::Qam16,
            "QAM32" => Self::Qam32,
            "QAM64" => Self::Qam64,
            "QAM128" => Self::Qam128,
            "QAM256" => Self::Qam256,
            _ => Self::Auto,
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            Self::Qpsk => "QPSK",
            Self::Qam16 => "QAM16",
            Self::Qam32 => "QAM32",
            Self::Qam64 => "QAM64",
            Self::Qam128 => "QAM128",
            Self::Qam256 => "QAM256",
            Self::Auto => "AUTO",
        }
    }
}

/// OFDM transmission mode (carrier count)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransmissionMode {
    Mode1k,
    Mode2k,
    Mode4k,
    Mode8k,
    Mode16k,
    Mode32k,
    Auto,
}

impl TransmissionMode {
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "1k" => Self::Mode1k,
            "2k" => Self::Mode2k,
            "4k" => Self::Mode4k,
            "8k" => Self::Mode8k,
            "16k" => Self::Mode16k,
            "32k" => Self::Mode32k,
            _ => Self::Auto,
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            Self::Mode1k => "1k",
            Self::Mode2k => "2k",
            Self::Mode4k => "4k",
            Self::Mode8k => "8k",
            Self::Mode16k => "16k",
            Self::Mode32k => "32k",
            Self::Auto => "AUTO",
        }
    }
}

/// Guard interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GuardInterval {
    G1_4,
    G1_8,
    G1_16,
    G1_32,
    G1_128,
    G19_128,
    G19_256,
    Auto,
}

impl GuardInterval {
    pub fn from_token(token: &str) -> Self {
        match token {
            "1/4" => Self::G1_4,
            "1/8" => Self::G1_8,
            "1/16" => Self::G1_16,
            "1/32" => Self::G1_32,
            "1/128" => Self::G1_128,
            "19/128" => Self::G19_128,
            "19/256" => Self::G19_256,
            _ => Self::Auto,
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            Self::G1_4 => "1/4",
            Self::G1_8 => "1/8",
            Self::G1_16 => "1/16",
            Self::G1_32 => "1/32",
            Self::G1_128 => "1/128",
            Self::G19_128 => "19/128",
            Self::G19_256 => "19/256",
            Self::Auto => "AUTO",
        }
    }
}

/// Hierarchical modulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Hierarchy {
    None,
    H1,
    H2,
    H4,
    Auto,
}

impl Hierarchy {
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "NONE" => Self::None,
            "1" => Self::H1,
            "2" => Self::H2,
            "4" => Self::H4,
            _ => Self::Auto,
        }
    }
}

/// Tuning descriptor: handed to the source adapter untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TuningParams {
    pub delivery: DeliverySystem,
    /// Hz
    pub frequency: u32,
    pub bandwidth: Bandwidth,
    /// High-priority stream rate (the `fec` token)
    pub fec: CodeRate,
    /// Low-priority stream rate (the `code-rate` token)
    pub code_rate_lp: CodeRate,
    pub modulation: Modulation,
    pub transmission: TransmissionMode,
    pub guard: GuardInterval,
    pub hierarchy: Hierarchy,
}

impl fmt::Display for TuningParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz {} fec {} {} {} guard {}",
            self.frequency,
            self.bandwidth.as_token(),
            self.fec.as_token(),
            self.modulation.as_token(),
            self.transmission.as_token(),
            self.guard.as_token()
        )
    }
}

/// One configured channel; immutable once loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelConfig {
    pub identifier: String,
    pub tuning: TuningParams,
    pub adapter: u32,
}

/// Frontend lock-state flags as reported by the tuner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FrontendStatus(pub u32);

impl FrontendStatus {
    pub const HAS_SIGNAL: u32 = 0x01;
    pub const HAS_CARRIER: u32 = 0x02;
    pub const HAS_VITERBI: u32 = 0x04;
    pub const HAS_SYNC: u32 = 0x08;
    pub const HAS_LOCK: u32 = 0x10;
    pub const TIMEDOUT: u32 = 0x20;
    pub const REINIT: u32 = 0x40;

    const NAMES: [(u32, &'static str); 7] = [
        (Self::HAS_SIGNAL, "HAS_SIGNAL"),
        (Self::HAS_CARRIER, "HAS_CARRIER"),
        (Self::HAS_VITERBI, "HAS_VITERBI"),
        (Self::HAS_SYNC, "HAS_SYNC"),
        (Self::HAS_LOCK, "HAS_LOCK"),
        (Self::TIMEDOUT, "TIMEDOUT"),
        (Self::REINIT, "REINIT"),
    ];

    pub fn has_lock(&self) -> bool {
        self.0 & Self::HAS_LOCK != 0
    }
}

impl fmt::Display for FrontendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(" "))
    }
}

/// Signal quality counters read from the frontend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SignalStats {
    pub strength: u16,
    pub snr: u16,
    pub ber: u32,
    pub uncorrected_blocks: u32,
}

impl SignalStats {
    /// Strength as a 0..1 ratio of the 16-bit scale
    pub fn strength_ratio(&self) -> f32 {
        self.strength as f32 / 65536.0
    }
}

/// Point-in-time pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub bytes_produced: u64,
    pub bytes_consumed: u64,
    /// Reads the device reported as buffer overflows (data lost upstream)
    pub overflows: u64,
    pub read_errors: u64,
    pub write_errors: u64,
}
