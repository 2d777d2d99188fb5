//! Output artifacts: one transport stream file per channel.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::constants::OUTPUT_EXTENSION;
use crate::error::CaptureError;
use crate::types::ChannelConfig;

/// Anything the consumer thread can own and write raw stream bytes into
pub type Sink = Box<dyn Write + Send>;

/// Writes go through a buffer of this size before reaching the file
const WRITE_BUFFER: usize = 64 * 1024;

/// `<dir>/<identifier>.ts`, with path separators in the identifier replaced.
pub fn output_path(dir: &Path, identifier: &str) -> PathBuf {
    let name: String = identifier
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    dir.join(format!("{name}.{OUTPUT_EXTENSION}"))
}

/// Create or truncate `path` for writing (rw for user and group).
pub fn open_output(path: &Path) -> Result<BufWriter<File>, CaptureError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o660);
    }
    let file = options.open(path).map_err(|source| CaptureError::Sink {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufWriter::with_capacity(WRITE_BUFFER, file))
}

/// Opens the sink for each channel before its consumer starts.
pub trait SinkProvider: Send + Sync {
    fn open(&self, channel: &ChannelConfig) -> Result<Sink, CaptureError>;
}

impl<F> SinkProvider for F
where
    F: Fn(&ChannelConfig) -> Result<Sink, CaptureError> + Send + Sync,
{
    fn open(&self, channel: &ChannelConfig) -> Result<Sink, CaptureError> {
        self(channel)
    }
}

/// One `<identifier>.ts` per channel inside a directory
pub struct OutputDir {
    dir: PathBuf,
}

impl OutputDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SinkProvider for OutputDir {
    fn open(&self, channel: &ChannelConfig) -> Result<Sink, CaptureError> {
        let path = output_path(&self.dir, &channel.identifier);
        let writer = open_output(&path)?;
        info!(channel = %channel.identifier, path = %path.display(), "writing capture");
        Ok(Box::new(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn output_is_named_after_the_identifier() {
        let path = output_path(Path::new("/captures"), "PSB3");
        assert_eq!(path, PathBuf::from("/captures/PSB3.ts"));
        let path = output_path(Path::new("."), "BBC One/HD");
        assert_eq!(path, PathBuf::from("./BBC One_HD.ts"));
    }

    #[test]
    fn existing_output_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.ts");
        fs::write(&path, b"stale capture").unwrap();

        let mut sink = open_output(&path).unwrap();
        sink.write_all(b"new").unwrap();
        sink.flush().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn unwritable_output_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("x.ts");
        let err = open_output(&path).unwrap_err();
        assert!(matches!(err, CaptureError::Sink { path: ref p, .. } if p == &path));
    }
}
