//! Most-recent log lines from the generation process.
//!
//! Some backends print the file name of every image they finish saving. An
//! artifact whose name shows up in the last few lines is known to be fully
//! written, which is a stronger signal than its age alone.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Mutex;

/// A source of the most recent log lines, oldest first.
pub trait LogTail: Send + Sync {
    fn recent_lines(&self, n: usize) -> Vec<String>;
}

/// Bounded in-memory ring the host pushes process output into.
#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Append one line, evicting the oldest when full.
    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogTail for LogBuffer {
    fn recent_lines(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().skip(lines.len().saturating_sub(n)).cloned().collect()
    }
}

/// Reads the last lines of a log file the process writes to.
#[derive(Debug, Clone)]
pub struct LogFileTail {
    path: PathBuf,
}

/// How far back from the end of the file to look.
const TAIL_WINDOW_BYTES: u64 = 64 * 1024;

impl LogFileTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_tail(&self, n: usize) -> io::Result<Vec<String>> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        let start = len.saturating_sub(TAIL_WINDOW_BYTES);
        file.seek(SeekFrom::Start(start))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let text = String::from_utf8_lossy(&buf);

        let mut lines: Vec<&str> = text.lines().collect();
        // The first line is likely cut in half when reading from mid-file.
        if start > 0 && !lines.is_empty() {
            lines.remove(0);
        }
        let skip = lines.len().saturating_sub(n);
        Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
    }
}

impl LogTail for LogFileTail {
    /// A missing or unreadable log counts as empty.
    fn recent_lines(&self, n: usize) -> Vec<String> {
        match self.read_tail(n) {
            Ok(lines) => lines,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "log tail unavailable");
                Vec::new()
            }
        }
    }
}

/// Whether `file_name` appears in any of `lines`.
pub fn mentioned_in(lines: &[String], file_name: &str) -> bool {
    lines.iter().any(|l| l.contains(file_name))
}
