//! Line-producing sources the ingestion activity consumes.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;

#[async_trait::async_trait]
pub trait LineSource: Send {
    /// Next complete line without its terminator. `None` once the source is
    /// exhausted. Must be safe to drop mid-await (used inside `select!`).
    async fn next_line(&mut self) -> Result<Option<String>>;

    fn name(&self) -> &str;
}

/// `tail -f` over a file: waits for appended data and yields whole lines in
/// arrival order. If the file shrinks (truncation, copytruncate rotation) it
/// is reopened and read from the start.
#[derive(Debug)]
pub struct TailFile {
    path: PathBuf,
    name: String,
    reader: BufReader<File>,
    /// Bytes consumed as complete lines since the current read position began.
    consumed: u64,
    /// Bytes of a line whose newline has not arrived yet.
    partial: Vec<u8>,
    poll: Duration,
}

impl TailFile {
    pub async fn open(path: impl AsRef<Path>, start_at_end: bool, poll: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)
            .await
            .with_context(|| format!("open log file {}", path.display()))?;
        let consumed = if start_at_end {
            file.seek(SeekFrom::End(0))
                .await
                .with_context(|| format!("seek to end of {}", path.display()))?
        } else {
            0
        };
        tracing::info!(path = %path.display(), offset = consumed, "tailing log file");
        Ok(Self {
            name: path.display().to_string(),
            path,
            reader: BufReader::new(file),
            consumed,
            partial: Vec::new(),
            poll,
        })
    }

    fn position(&self) -> u64 {
        self.consumed + self.partial.len() as u64
    }

    async fn was_truncated(&self) -> Result<bool> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len() < self.position()),
            // Mid-rotation: keep waiting on the current handle.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("stat {}", self.path.display())),
        }
    }

    async fn reopen(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .await
            .with_context(|| format!("reopen log file {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), "log file truncated, reading from start");
        self.reader = BufReader::new(file);
        self.consumed = 0;
        self.partial.clear();
        Ok(())
    }
}

#[async_trait::async_trait]
impl LineSource for TailFile {
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            // Partial reads land in `self.partial`, so dropping this future is harmless.
            let n = self
                .reader
                .read_until(b'\n', &mut self.partial)
                .await
                .with_context(|| format!("read {}", self.path.display()))?;

            if n == 0 {
                if self.was_truncated().await? {
                    self.reopen().await?;
                } else {
                    tokio::time::sleep(self.poll).await;
                }
                continue;
            }

            if self.partial.last() != Some(&b'\n') {
                continue;
            }

            let raw = std::mem::take(&mut self.partial);
            self.consumed += raw.len() as u64;
            return Ok(Some(strip_line_ending(&raw)));
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn strip_line_ending(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Lines pushed through a channel; exhausted once every sender is dropped.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<String>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    pub fn pair(buffer: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }
}

#[async_trait::async_trait]
impl LineSource for ChannelSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }

    fn name(&self) -> &str {
        "channel"
    }
}
