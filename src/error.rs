//! Error types for sources, pipelines and channel configuration.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a [`Source`](crate::source::Source) adapter.
#[derive(Error, Debug)]
pub enum SourceError {
    /// A device node or socket could not be opened
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Setting frontend parameters failed
    #[error("failed to tune: {0}")]
    Tune(#[source] io::Error),

    /// Installing the demux filter failed
    #[error("failed to set demux filters: {0}")]
    Filter(#[source] io::Error),

    /// Querying frontend status or statistics failed
    #[error("failed to read frontend status: {0}")]
    Status(#[source] io::Error),

    /// The device buffer overflowed; data was lost before we could read it
    #[error("device buffer overflow")]
    Overflow,

    /// Any other read failure
    #[error("read error: {0}")]
    Io(#[from] io::Error),

    /// The adapter does not implement this operation
    #[error("{0} is not supported by this source")]
    Unsupported(&'static str),
}

/// Errors that keep a capture pipeline from starting.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Opening, tuning or filtering the source failed
    #[error("channel {channel}: {source}")]
    Source {
        channel: String,
        #[source]
        source: SourceError,
    },

    /// The output artifact could not be created
    #[error("failed to open output {}: {source}", path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A worker thread could not be spawned
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] io::Error),

    /// Two channel entries share one identifier (and therefore one output file)
    #[error("duplicate channel identifier {0}")]
    DuplicateChannel(String),

    #[error("pipeline already started")]
    AlreadyStarted,
}

impl CaptureError {
    pub fn source_failed(channel: impl Into<String>, source: SourceError) -> Self {
        Self::Source {
            channel: channel.into(),
            source,
        }
    }
}

/// Why a single channel line was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    #[error("expected at least {expected} tokens, found {found}")]
    TooFewTokens { found: usize, expected: usize },

    #[error("invalid frequency {0:?}")]
    BadFrequency(String),

    #[error("unknown delivery system {0:?}")]
    UnknownDeliverySystem(String),

    #[error("unknown bandwidth {0:?}")]
    UnknownBandwidth(String),
}

/// Errors from loading a channel list.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read channel list {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A line that did not parse; reported per line, never fatal for the file
    #[error("line {line}: {reason}")]
    Line { line: usize, reason: LineError },
}
