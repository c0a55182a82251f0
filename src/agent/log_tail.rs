//! Reads the tail of the agent's own rotated log file.

use std::path::{Path, PathBuf};

use crate::agent::AgentError;
use crate::config::LoggingConfig;

/// The last lines of a log file plus its size in lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogExcerpt {
    pub lines: String,
    pub total_lines: u64,
    pub sent_lines: u64,
}

/// Locates the newest file named `<prefix>*` in a directory and keeps its last lines.
#[derive(Debug, Clone)]
pub struct LogTail {
    dir: PathBuf,
    prefix: String,
    max_lines: usize,
}

impl LogTail {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, max_lines: usize) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            max_lines: max_lines.max(1),
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        Self::new(&config.dir, &config.file_prefix, config.tail_lines)
    }

    /// Newest log file by name. Daily rotation appends `YYYY-MM-DD`, which sorts by date.
    async fn newest_file(&self) -> Result<Option<PathBuf>, AgentError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut newest: Option<(String, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&self.prefix) || !entry.file_type().await?.is_file() {
                continue;
            }
            if newest.as_ref().is_none_or(|(best, _)| name > *best) {
                newest = Some((name, entry.path()));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }

    /// Read the current tail. `None` when no log file exists yet.
    pub async fn read(&self) -> Result<Option<LogExcerpt>, AgentError> {
        let Some(path) = self.newest_file().await? else {
            return Ok(None);
        };
        read_tail(&path, self.max_lines).await.map(Some)
    }
}

async fn read_tail(path: &Path, max_lines: usize) -> Result<LogExcerpt, AgentError> {
    let bytes = tokio::fs::read(path).await?;
    let content = String::from_utf8_lossy(&bytes);

    let all: Vec<&str> = content.lines().collect();
    let tail = &all[all.len().saturating_sub(max_lines)..];

    Ok(LogExcerpt {
        lines: tail.join("\n"),
        total_lines: all.len() as u64,
        sent_lines: tail.len() as u64,
    })
}
