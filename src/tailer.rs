//! Alert file tailer.
//!
//! Follows the Snort alert file with a polling reader, surviving both
//! truncation (the file shrinks in place) and rotation (the path points at a
//! new inode); in either case reading restarts from offset zero. In testing
//! mode the file is read to EOF once and the tailer returns.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncBufReadExt, BufReader},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::AppConfig, models::decode_alert, processor::build_event, queue::EventBatchQueue,
};

/// How often the reader polls for new data, growth or rotation at EOF.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors terminating the tailer.
#[derive(Debug, Error)]
pub enum TailerError {
    /// The alert file could not be opened. Fatal at startup.
    #[error("failed to open alert file {path}: {source}")]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The follower hit an I/O error mid-stream.
    #[error("i/o error while tailing alert file: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(unix)]
fn inode(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn inode(_metadata: &std::fs::Metadata) -> u64 {
    0
}

/// The open file plus enough bookkeeping to detect rotation and truncation.
struct TailSource {
    reader: BufReader<File>,
    ino: u64,
    /// Bytes handed out by `read_line` since the last (re)open.
    pos: u64,
}

impl TailSource {
    async fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let metadata = file.metadata().await?;
        Ok(Self { reader: BufReader::new(file), ino: inode(&metadata), pos: 0 })
    }

    /// Reopens from offset zero when the path now names a different inode or
    /// the file shrank below the read position. Returns whether it reopened.
    /// A missing file (mid-rotation) is left for the next poll.
    async fn reopen_if_rotated(&mut self, path: &Path) -> std::io::Result<bool> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(_) => return Ok(false),
        };
        if inode(&metadata) != self.ino {
            tracing::info!(path = %path.display(), "Alert file rotated, reopening from start.");
            *self = Self::open(path).await?;
            return Ok(true);
        }
        if metadata.len() < self.pos {
            tracing::info!(path = %path.display(), "Alert file truncated, reopening from start.");
            *self = Self::open(path).await?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Follows the alert file and feeds decoded events into the batch queue.
pub struct FileTailer {
    path: PathBuf,
    follow: bool,
    truncate_on_exit: bool,
    sensor_id: String,
    stop_token: CancellationToken,
    lines_this_sec: AtomicI64,
    lines_per_sec: AtomicI64,
}

impl FileTailer {
    /// Creates a tailer for the configured alert file.
    pub fn new(config: &AppConfig) -> Self {
        Self {
            path: PathBuf::from(&config.file),
            follow: !config.testing_mode,
            truncate_on_exit: config.truncate_on_exit,
            sensor_id: config.sensor_id.clone(),
            stop_token: CancellationToken::new(),
            lines_this_sec: AtomicI64::new(0),
            lines_per_sec: AtomicI64::new(0),
        }
    }

    /// Signals the tailer to terminate. Idempotent.
    pub fn stop(&self) {
        self.stop_token.cancel();
    }

    /// Lines decoded during the last completed second.
    pub fn read_per_second(&self) -> i64 {
        self.lines_per_sec.load(Ordering::Acquire)
    }

    /// Tails the file until cancelled, stopped, or (in testing mode) EOF.
    ///
    /// Each complete line is decoded and added to `queue`; malformed lines
    /// are dropped with a debug log. Blocks for the lifetime of the tailer.
    pub async fn run(
        self: Arc<Self>,
        token: CancellationToken,
        queue: Arc<EventBatchQueue>,
    ) -> Result<(), TailerError> {
        let mut source = TailSource::open(&self.path)
            .await
            .map_err(|source| TailerError::Open { path: self.path.clone(), source })?;

        let sampler_token = CancellationToken::new();
        let sampler = tokio::spawn(Arc::clone(&self).run_rate_sampler(sampler_token.clone()));

        let result = self.follow_lines(&token, &queue, &mut source).await;

        sampler_token.cancel();
        let _ = sampler.await;

        if self.truncate_on_exit {
            match OpenOptions::new().write(true).truncate(true).open(&self.path).await {
                Ok(_) => tracing::info!(path = %self.path.display(), "Alert file truncated on shutdown."),
                Err(error) => tracing::warn!(
                    path = %self.path.display(),
                    %error,
                    "Failed to truncate alert file on shutdown."
                ),
            }
        }

        tracing::info!("File tailer stopped.");
        result
    }

    async fn follow_lines(
        &self,
        token: &CancellationToken,
        queue: &EventBatchQueue,
        source: &mut TailSource,
    ) -> Result<(), TailerError> {
        // Partial line carried across reads until its newline shows up.
        let mut pending = String::new();

        loop {
            if token.is_cancelled() || self.stop_token.is_cancelled() {
                tracing::info!("Tailer cancellation signal received, stopping.");
                return Ok(());
            }

            let read = source.reader.read_line(&mut pending).await?;
            source.pos += read as u64;

            if read == 0 {
                if !self.follow {
                    // Testing mode: a final unterminated line still counts.
                    if !pending.is_empty() {
                        self.process_line(queue, &pending);
                    }
                    tracing::info!("Reached end of alert file in testing mode.");
                    return Ok(());
                }

                tokio::select! {
                    biased;
                    _ = token.cancelled() => continue,
                    _ = self.stop_token.cancelled() => continue,
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }

                if source.reopen_if_rotated(&self.path).await? {
                    pending.clear();
                }
                continue;
            }

            if !pending.ends_with('\n') {
                // Mid-line EOF; the rest arrives with a later read.
                continue;
            }

            self.process_line(queue, &pending);
            pending.clear();
        }
    }

    fn process_line(&self, queue: &EventBatchQueue, line: &str) {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return;
        }

        let alert = match decode_alert(line) {
            Ok(alert) => alert,
            Err(error) => {
                tracing::debug!(%error, "Dropping unparseable alert line.");
                return;
            }
        };

        let read_at = chrono::Utc::now().timestamp_micros();
        let (event, metric) = build_event(&alert, &self.sensor_id, read_at);
        queue.add(event, metric);
        self.lines_this_sec.fetch_add(1, Ordering::Relaxed);
    }

    /// Publishes the per-second read counter once a second; zeroes both
    /// counters on the way out.
    async fn run_rate_sampler(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let count = self.lines_this_sec.swap(0, Ordering::AcqRel);
                    self.lines_per_sec.store(count, Ordering::Release);
                }
            }
        }
        self.lines_this_sec.store(0, Ordering::Release);
        self.lines_per_sec.store(0, Ordering::Release);
    }
}
