//! Follow a growing log file and forward each new line

use crate::sink::LogSink;
use rcon_bridge_core::{BridgeError, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tracing::{debug, info};

/// Default pause between file size checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Tails a file such as `logs/latest.log`
///
/// Starts at the current end of the file unless `from_start` is set. When
/// the file shrinks (rotation or truncation) reading restarts at offset 0.
/// A missing file is waited for.
pub struct LogTailer {
    path: PathBuf,
    poll_interval: Duration,
    from_start: bool,
    position: u64,
    partial: Vec<u8>,
}

impl LogTailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            from_start: false,
            position: 0,
            partial: Vec::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Forward the existing contents too, not only lines written later
    pub fn from_start(mut self, from_start: bool) -> Self {
        self.from_start = from_start;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run until `shutdown` flips to true
    pub async fn run<S>(mut self, sink: S, mut shutdown: watch::Receiver<bool>) -> Result<()>
    where
        S: LogSink,
    {
        if !self.from_start {
            self.position = file_len(&self.path).await.unwrap_or(0);
        }
        info!("Tailing {:?} from offset {}", self.path, self.position);

        while !*shutdown.borrow() {
            self.poll(&sink).await?;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Stopped tailing {:?}", self.path);
        Ok(())
    }

    /// Read whatever was appended since the last poll
    async fn poll<S: LogSink>(&mut self, sink: &S) -> Result<()> {
        let Some(len) = file_len(&self.path).await else {
            return Ok(());
        };

        if len < self.position {
            info!("{:?} shrank, reading from the start", self.path);
            self.position = 0;
            self.partial.clear();
        }
        if len == self.position {
            return Ok(());
        }

        let mut file = File::open(&self.path)
            .await
            .map_err(|e| BridgeError::Transport(format!("open {:?}: {}", self.path, e)))?;
        file.seek(SeekFrom::Start(self.position)).await?;

        let mut data = Vec::with_capacity((len - self.position) as usize);
        let read = file.read_to_end(&mut data).await?;
        self.position += read as u64;

        // Bytes, not text: a multi-byte char may straddle two polls
        self.partial.extend_from_slice(&data);
        while let Some(newline) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=newline).collect();
            let text = String::from_utf8_lossy(&line);
            sink.forward_line(text.trim_end_matches(['\n', '\r']));
        }

        Ok(())
    }
}

async fn file_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}
