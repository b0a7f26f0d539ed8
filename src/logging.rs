//! Logging bootstrap for binaries embedding the router.
//!
//! Writes structured logs to a rotating file with per-line flushing, so
//! a crash cannot lose the tail of the log. Libraries linking this crate
//! just emit `tracing` events; calling [`init`] is the host's choice.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Rotated generations kept next to the live log file.
const KEEP_ROTATIONS: u32 = 3;

const LOG_FILE_NAME: &str = "toolbridge.log";

/// Platform-standard data directory for the router.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("toolbridge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolbridge")
}

/// Initialize tracing with the default data directory.
pub fn init() {
    init_with_dir(&data_dir());
}

/// Initialize tracing, logging to `{dir}/toolbridge.log`.
///
/// Rotates existing logs first and installs an env-filtered subscriber.
/// Safe to call more than once; later calls are no-ops.
pub fn init_with_dir(dir: &Path) {
    let _ = std::fs::create_dir_all(dir);
    let log_path = dir.join(LOG_FILE_NAME);

    rotate_logs(&log_path, KEEP_ROTATIONS);

    let Ok(log_file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    else {
        return;
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("toolbridge=info,warn"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(LineFlushWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            log_file = %log_path.display(),
            pid = std::process::id(),
            "toolbridge logging initialized"
        );
    }
}

/// Rotate `base` -> `base.1` -> … -> `base.{keep}`, deleting the oldest.
/// Missing files in the chain are skipped.
pub fn rotate_logs(base: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base.display());
        let to = format!("{}.{}", base.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base.exists() {
        let to = format!("{}.1", base.display());
        let _ = std::fs::rename(base, &to);
    }
}

/// File writer that flushes after every write. The subscriber buffers
/// internally; without this, the last lines before a crash sit in OS
/// buffers and never reach disk.
#[derive(Clone)]
struct LineFlushWriter {
    file: Arc<Mutex<File>>,
}

impl LineFlushWriter {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl Write for LineFlushWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = file.write(buf)?;
        file.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        file.flush()
    }
}

impl<'a> MakeWriter<'a> for LineFlushWriter {
    type Writer = LineFlushWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
