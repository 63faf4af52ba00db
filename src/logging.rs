use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::MakeWriter;

/// File name of the command log inside the logs directory.
pub const LOG_FILE_NAME: &str = "gsh.log";

/// Once the log grows past this, it is moved to `gsh.log.1` on the next run.
const ROTATE_AT_BYTES: u64 = 4 * 1024 * 1024;

// ── DeferredFileWriter ───────────────────────────────────

/// A `MakeWriter` that discards writes until `handle.set_file(path)` is
/// called, then appends to that file.
///
/// The subscriber is installed before the config is loaded, so the log
/// location isn't known yet at that point.
#[derive(Clone)]
pub struct DeferredFileWriter {
    inner: Arc<Mutex<Option<File>>>,
}

/// Activates a [`DeferredFileWriter`].
#[derive(Clone)]
pub struct DeferredFileHandle {
    inner: Arc<Mutex<Option<File>>>,
}

fn lock(inner: &Mutex<Option<File>>) -> MutexGuard<'_, Option<File>> {
    // a panic mid-write leaves the file usable
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DeferredFileWriter {
    pub fn new() -> (Self, DeferredFileHandle) {
        let inner = Arc::new(Mutex::new(None));
        (
            Self {
                inner: inner.clone(),
            },
            DeferredFileHandle { inner },
        )
    }
}

impl DeferredFileHandle {
    /// Open `path` in append mode and start writing to it.
    pub fn set_file(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *lock(&self.inner) = Some(file);
        Ok(())
    }

    /// Rotate and activate `<logs_dir>/gsh.log`.
    pub fn activate(&self, logs_dir: &Path) -> std::io::Result<PathBuf> {
        let path = logs_dir.join(LOG_FILE_NAME);
        rotate_if_large(&path, ROTATE_AT_BYTES)?;
        self.set_file(&path)?;
        Ok(path)
    }
}

pub struct DeferredWriter {
    inner: Arc<Mutex<Option<File>>>,
}

impl Write for DeferredWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match lock(&self.inner).as_mut() {
            Some(f) => f.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match lock(&self.inner).as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DeferredFileWriter {
    type Writer = DeferredWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DeferredWriter {
            inner: self.inner.clone(),
        }
    }
}

// ── Rotation ─────────────────────────────────────────────

/// Move `path` to `<path>.1` when it is at least `limit` bytes, replacing
/// any previous `.1`. Keeps a single generation.
pub fn rotate_if_large(path: &Path, limit: u64) -> std::io::Result<()> {
    let Ok(meta) = fs::metadata(path) else {
        return Ok(());
    };
    if meta.len() < limit {
        return Ok(());
    }
    let mut rotated = path.as_os_str().to_owned();
    rotated.push(".1");
    fs::rename(path, PathBuf::from(rotated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discards_until_activated() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, handle) = DeferredFileWriter::new();

        writer.make_writer().write_all(b"dropped\n").unwrap();
        let path = handle.activate(dir.path()).unwrap();
        writer.make_writer().write_all(b"kept\n").unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "kept\n");
    }

    #[test]
    fn rotates_large_logs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        fs::write(&path, "0123456789").unwrap();

        rotate_if_large(&path, 100).unwrap();
        assert!(path.exists());

        rotate_if_large(&path, 10).unwrap();
        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("gsh.log.1")).unwrap(),
            "0123456789"
        );
    }

    #[test]
    fn rotating_missing_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        rotate_if_large(&dir.path().join("nope.log"), 1).unwrap();
    }
}
