//! Where exported paths are announced.
//!
//! The pipeline hands the full list of exported paths that still exist to
//! the sink after every tick that has any. Delivery is fire-and-forget: a
//! sink never reports failure back.

use std::path::PathBuf;
use std::sync::mpsc;

pub trait PreviewSink: Send + Sync {
    fn publish(&self, paths: &[PathBuf]);
}

/// Forwards each published list over a channel.
///
/// A dropped receiver is ignored.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<PathBuf>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Vec<PathBuf>>) -> Self {
        Self { tx }
    }
}

impl PreviewSink for ChannelSink {
    fn publish(&self, paths: &[PathBuf]) {
        let _ = self.tx.send(paths.to_vec());
    }
}

/// Logs the newest exported path.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl PreviewSink for LogSink {
    fn publish(&self, paths: &[PathBuf]) {
        if let Some(last) = paths.last() {
            tracing::info!(total = paths.len(), latest = %last.display(), "preview updated");
        }
    }
}
