use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;
const MAX_BACKUPS: usize = 3;

/// Install the global subscriber: everything (default `info`, `RUST_LOG`
/// overrides) goes to the size-rotated daemon log; warnings and errors are
/// mirrored to stderr.
pub fn init(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir).with_context(|| format!("mkdir {}", log_dir.display()))?;
    let file_writer = RotatingFileWriter::new(log_dir.join("viking_daemon.log"));

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(file_writer),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(io::stderr)
                .with_filter(LevelFilter::WARN),
        )
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(())
}

struct Inner {
    path: PathBuf,
    file: Option<File>,
}

/// Append-only log writer with size-based rotation:
/// `viking_daemon.log` → `.1` → `.2` → `.3`, oldest dropped.
#[derive(Clone)]
pub struct RotatingFileWriter {
    inner: Arc<Mutex<Inner>>,
}

impl RotatingFileWriter {
    pub fn new(path: PathBuf) -> Self {
        RotatingFileWriter {
            inner: Arc::new(Mutex::new(Inner { path, file: None })),
        }
    }
}

impl Inner {
    fn open(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }
        Ok(self.file.as_mut().expect("just opened"))
    }

    fn rotate_if_needed(&mut self) -> io::Result<()> {
        let size = match &self.file {
            Some(file) => file.metadata()?.len(),
            None => return Ok(()),
        };
        if size <= MAX_LOG_SIZE {
            return Ok(());
        }

        self.file = None;
        let backup = |n: usize| PathBuf::from(format!("{}.{n}", self.path.display()));
        let _ = fs::remove_file(backup(MAX_BACKUPS));
        for n in (1..MAX_BACKUPS).rev() {
            let _ = fs::rename(backup(n), backup(n + 1));
        }
        fs::rename(&self.path, backup(1))?;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().expect("log writer poisoned");
        let written = inner.open()?.write(buf)?;
        if let Err(err) = inner.rotate_if_needed() {
            eprintln!("[vikingd] log rotation failed: {err}");
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("log writer poisoned");
        match inner.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
