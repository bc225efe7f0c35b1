use parking_lot::Mutex;
use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    path::Path,
};
use tracing::warn;

/// Append-only log shared by all classification workers
///
/// Every line is written under the lock and prefixed with the archive it
/// belongs to, so output of concurrent workers never interleaves mid-line.
#[derive(Debug)]
pub struct ClassifyLog {
    writer: Mutex<BufWriter<File>>,
}

impl ClassifyLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn record(&self, archive: &str, message: fmt::Arguments) {
        let mut writer = self.writer.lock();

        if let Err(error) = writeln!(writer, "[{archive}] {message}") {
            warn!(error = ?error, "Failed to write to classify log");
        }
    }

    pub fn close(self) -> io::Result<()> {
        self.writer.into_inner().flush()
    }
}
