//! Channel list loader.
//!
//! One channel per line:
//!
//! ```text
//! # type frequency bandwidth fec code-rate constellation transmission guard [hierarchy] [# id]
//! T 545800000 8MHz 2/3 NONE QAM256 32k 1/128 NONE # PSB3
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. A bad line is reported
//! and skipped; it never stops the rest of the file from loading.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{ConfigError, LineError};
use crate::types::{
    Bandwidth, ChannelConfig, CodeRate, DeliverySystem, GuardInterval, Hierarchy, Modulation,
    TransmissionMode, TuningParams,
};

/// type, frequency, bandwidth, fec, code-rate, constellation, transmission, guard
const REQUIRED_TOKENS: usize = 8;

/// Parsed channels plus every line that was rejected
#[derive(Debug, Default)]
pub struct ChannelList {
    pub channels: Vec<ChannelConfig>,
    pub errors: Vec<ConfigError>,
}

impl ChannelList {
    /// Parse lines in order. Adapter indices count successful entries from 0.
    pub fn parse<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for (idx, line) in lines.into_iter().enumerate() {
            let adapter = list.channels.len() as u32;
            match parse_line(line.as_ref(), adapter) {
                Ok(Some(channel)) => {
                    debug!(channel = %channel.identifier, adapter, "channel loaded");
                    list.channels.push(channel);
                }
                Ok(None) => {}
                Err(reason) => {
                    let line = idx + 1;
                    warn!(line, "skipping channel line: {reason}");
                    list.errors.push(ConfigError::Line { line, reason });
                }
            }
        }
        list
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(text.lines()))
    }
}

/// `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str, adapter: u32) -> Result<Option<ChannelConfig>, LineError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (body, comment) = match line.split_once('#') {
        Some((body, comment)) => (body, Some(comment)),
        None => (line, None),
    };

    let tokens: Vec<&str> = body.split_whitespace().collect();
    if tokens.len() < REQUIRED_TOKENS {
        return Err(LineError::TooFewTokens {
            found: tokens.len(),
            expected: REQUIRED_TOKENS,
        });
    }

    let delivery = DeliverySystem::from_token(tokens[0])
        .ok_or_else(|| LineError::UnknownDeliverySystem(tokens[0].to_string()))?;
    let frequency = tokens[1]
        .parse::<u32>()
        .map_err(|_| LineError::BadFrequency(tokens[1].to_string()))?;
    let bandwidth = Bandwidth::from_token(tokens[2])
        .ok_or_else(|| LineError::UnknownBandwidth(tokens[2].to_string()))?;

    let tuning = TuningParams {
        delivery,
        frequency,
        bandwidth,
        fec: CodeRate::from_token(tokens[3]),
        code_rate_lp: CodeRate::from_token(tokens[4]),
        modulation: Modulation::from_token(tokens[5]),
        transmission: TransmissionMode::from_token(tokens[6]),
        guard: GuardInterval::from_token(tokens[7]),
        hierarchy: tokens.get(8).map_or(Hierarchy::None, |t| Hierarchy::from_token(t)),
    };

    let identifier = comment
        .and_then(|c| c.split_whitespace().next())
        .map(str::to_string)
        .unwrap_or_else(|| frequency.to_string());

    Ok(Some(ChannelConfig {
        identifier,
        tuning,
        adapter,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_line() {
        let channel = parse_line("T 545800000 8MHz 2/3 NONE QAM256 32k 1/128 NONE # PSB3", 0)
            .unwrap()
            .unwrap();
        assert_eq!(channel.identifier, "PSB3");
        assert_eq!(channel.adapter, 0);
        let t = &channel.tuning;
        assert_eq!(t.delivery, DeliverySystem::DvbT);
        assert_eq!(t.frequency, 545_800_000);
        assert_eq!(t.bandwidth, Bandwidth::Mhz8);
        assert_eq!(t.fec, CodeRate::Fec2_3);
        assert_eq!(t.code_rate_lp, CodeRate::None);
        assert_eq!(t.modulation, Modulation::Qam256);
        assert_eq!(t.transmission, TransmissionMode::Mode32k);
        assert_eq!(t.guard, GuardInterval::G1_128);
        assert_eq!(t.hierarchy, Hierarchy::None);
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert_eq!(parse_line("", 0), Ok(None));
        assert_eq!(parse_line("   \t", 0), Ok(None));
        assert_eq!(
            parse_line("# T 570000000 8MHz 2/3 NONE QAM64 8k 1/32 NONE # COM7", 0),
            Ok(None)
        );
    }

    #[test]
    fn unknown_enumerants_become_auto() {
        let channel = parse_line("T 570000000 8MHz 7/9 NONE QAM999 3k 1/99 # X", 0)
            .unwrap()
            .unwrap();
        assert_eq!(channel.tuning.fec, CodeRate::Auto);
        assert_eq!(channel.tuning.modulation, Modulation::Auto);
        assert_eq!(channel.tuning.transmission, TransmissionMode::Auto);
        assert_eq!(channel.tuning.guard, GuardInterval::Auto);
    }

    #[test]
    fn identifier_defaults_to_frequency() {
        let channel = parse_line("T2 570000000 8MHz 2/3 NONE QAM256 32k 1/128", 4)
            .unwrap()
            .unwrap();
        assert_eq!(channel.identifier, "570000000");
        assert_eq!(channel.adapter, 4);
        assert_eq!(channel.tuning.delivery, DeliverySystem::DvbT2);
    }

    #[test]
    fn rejects_bad_lines() {
        assert_eq!(
            parse_line("T 545800000", 0),
            Err(LineError::TooFewTokens { found: 2, expected: 8 })
        );
        assert_eq!(
            parse_line("T 54.58MHz 8MHz 2/3 NONE QAM256 32k 1/128", 0),
            Err(LineError::BadFrequency("54.58MHz".into()))
        );
        assert_eq!(
            parse_line("S 545800000 8MHz 2/3 NONE QAM256 32k 1/128", 0),
            Err(LineError::UnknownDeliverySystem("S".into()))
        );
        assert_eq!(
            parse_line("T 545800000 9MHz 2/3 NONE QAM256 32k 1/128", 0),
            Err(LineError::UnknownBandwidth("9MHz".into()))
        );
    }

    #[test]
    fn bad_line_does_not_stop_the_file() {
        let text = "\
# Crystal Palace
T 545800000 8MHz 2/3 NONE QAM256 32k 1/128 NONE # PSB3
T 545800000
T 570000000 8MHz 2/3 NONE QAM64 8k 1/32 NONE # COM7
";
        let list = ChannelList::parse(text.lines());
        let ids: Vec<&str> = list.channels.iter().map(|c| c.identifier.as_str()).collect();
        assert_eq!(ids, ["PSB3", "COM7"]);
        assert_eq!(list.channels[0].adapter, 0);
        assert_eq!(list.channels[1].adapter, 1);
        assert_eq!(list.errors.len(), 1);
        assert!(matches!(
            list.errors[0],
            ConfigError::Line { line: 3, reason: LineError::TooFewTokens { found: 2, .. } }
        ));
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.conf");
        fs::write(&path, "T 570000000 8MHz 2/3 NONE QAM64 8k 1/32 NONE # COM7\n").unwrap();
        let list = ChannelList::load(&path).unwrap();
        assert_eq!(list.channels.len(), 1);

        let missing = ChannelList::load(&dir.path().join("nope.conf")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
