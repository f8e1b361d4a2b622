//! Per-run generation context and the state shared with the host.
//!
//! A [`GenerationSession`] is built once when a generation run starts and is
//! read-only afterwards; the pipeline holds it behind an `Arc`. Resetting a
//! session means dropping it and building a new one.
//!
//! [`SessionRuntime`] is the part that changes while the run is going: the
//! running image count, whether an import is still in progress, and the
//! cancellation signal. The host and the export loop both hold it.

use crate::naming::NamingOptions;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::watch;

/// Conditions that make the whole session unusable.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("watched directory {} does not exist", .0.display())]
    WatchDirMissing(PathBuf),
    #[error("output directory {} is unusable: {source}", .path.display())]
    OutputDirUnusable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The generation backend that produces the artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    #[default]
    InvokeAi,
    #[serde(rename = "nmkd")]
    NmkdDiffusers,
    Comfy,
}

impl Backend {
    /// Whether the backend logs the file name of each image it saves.
    pub fn surfaces_log_tail(self) -> bool {
        matches!(self, Self::InvokeAi)
    }

    /// Whether inpainting masks are composited back onto results.
    pub fn supports_mask_overlay(self) -> bool {
        matches!(self, Self::InvokeAi | Self::NmkdDiffusers)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvokeAi => "invoke-ai",
            Self::NmkdDiffusers => "nmkd",
            Self::Comfy => "comfy",
        })
    }
}

/// How the pipeline learns whether the generation process is still running.
#[derive(Debug, Clone)]
pub enum Liveness {
    /// Live while this file exists.
    SentinelFile(PathBuf),
    /// Live while the flag is set; the host clears it when the process exits.
    Process(Arc<AtomicBool>),
    /// Live until the image count reaches the target.
    ImageCount,
}

/// Immutable context of one generation run.
#[derive(Debug, Clone)]
pub struct GenerationSession {
    pub start_time: DateTime<Local>,
    pub target_image_count: usize,
    /// Directory the backend writes artifacts into.
    pub watch_dir: PathBuf,
    pub output_dir: PathBuf,
    pub subfolders_per_prompt: bool,
    pub session_subdir_name: Option<String>,
    pub naming: NamingOptions,
    pub backend: Backend,
    pub liveness: Liveness,
    /// Inpainting mask to composite over each result, if one was used.
    pub mask_path: Option<PathBuf>,
    /// Artifact extension without the dot.
    pub extension: String,
}

impl GenerationSession {
    /// Session starting now with default naming and image-count liveness.
    pub fn new(
        watch_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        target_image_count: usize,
    ) -> Self {
        Self {
            start_time: Local::now(),
            target_image_count,
            watch_dir: watch_dir.into(),
            output_dir: output_dir.into(),
            subfolders_per_prompt: false,
            session_subdir_name: None,
            naming: NamingOptions::default(),
            backend: Backend::default(),
            liveness: Liveness::ImageCount,
            mask_path: None,
            extension: "png".to_string(),
        }
    }

    /// Subfolder name for a session started at `start_time`.
    pub fn subdir_name_for(start_time: DateTime<Local>) -> String {
        start_time.format("%Y%m%d-%H%M%S").to_string()
    }

    /// Base export directory, including the session subfolder if any.
    pub fn export_root(&self) -> PathBuf {
        match &self.session_subdir_name {
            Some(name) => self.output_dir.join(name),
            None => self.output_dir.clone(),
        }
    }

    /// Mask to overlay, if the backend supports it and the file is present.
    pub fn active_mask(&self) -> Option<&Path> {
        self.mask_path
            .as_deref()
            .filter(|_| self.backend.supports_mask_overlay())
            .filter(|p| p.is_file())
    }

    /// Whether the generation process is still producing artifacts.
    pub fn upstream_live(&self, runtime: &SessionRuntime) -> bool {
        match &self.liveness {
            Liveness::SentinelFile(path) => path.exists(),
            Liveness::Process(running) => running.load(Ordering::Acquire),
            Liveness::ImageCount => runtime.image_count() < self.target_image_count,
        }
    }
}

/// Cancellation signal with an optional reason.
///
/// Cloning shares the signal. `None` means not cancelled.
#[derive(Debug, Clone)]
pub struct SessionCancel {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for SessionCancel {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }
}

impl SessionCancel {
    /// Request cancellation. The first reason given sticks.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Receiver for awaiting cancellation in `tokio::select!`.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

/// Mutable state shared between the host and the export loop.
#[derive(Debug, Default)]
pub struct SessionRuntime {
    image_count: AtomicUsize,
    import_in_progress: AtomicBool,
    cancel: SessionCancel,
}

impl SessionRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image_count(&self) -> usize {
        self.image_count.load(Ordering::Acquire)
    }

    /// Count one more exported image; returns the new count.
    pub fn increment_image_count(&self) -> usize {
        self.image_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn import_in_progress(&self) -> bool {
        self.import_in_progress.load(Ordering::Acquire)
    }

    pub fn set_import_in_progress(&self, value: bool) {
        self.import_in_progress.store(value, Ordering::Release);
    }

    pub fn cancel(&self) -> &SessionCancel {
        &self.cancel
    }
}

/// Check the directories a session depends on before exporting starts.
///
/// Failure cancels the session with the error as reason.
pub fn prepare_session(
    session: &GenerationSession,
    runtime: &SessionRuntime,
) -> Result<(), SessionError> {
    let result = if !session.watch_dir.is_dir() {
        Err(SessionError::WatchDirMissing(session.watch_dir.clone()))
    } else {
        let root = session.export_root();
        std::fs::create_dir_all(&root)
            .map_err(|source| SessionError::OutputDirUnusable { path: root, source })
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "session cannot start");
        runtime.cancel().cancel(e.to_string());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // =========================================================================
    // Liveness
    // =========================================================================

    #[test]
    fn sentinel_liveness_follows_file() {
        let tmp = TempDir::new().unwrap();
        let sentinel = tmp.path().join("prompts.txt");
        let mut session = GenerationSession::new(tmp.path(), tmp.path().join("out"), 4);
        session.liveness = Liveness::SentinelFile(sentinel.clone());
        let runtime = SessionRuntime::new();

        assert!(!session.upstream_live(&runtime));
        std::fs::write(&sentinel, "a cat").unwrap();
        assert!(session.upstream_live(&runtime));
    }

    #[test]
    fn process_liveness_follows_flag() {
        let running = Arc::new(AtomicBool::new(true));
        let mut session = GenerationSession::new("in", "out", 4);
        session.liveness = Liveness::Process(running.clone());
        let runtime = SessionRuntime::new();

        assert!(session.upstream_live(&runtime));
        running.store(false, Ordering::Release);
        assert!(!session.upstream_live(&runtime));
    }

    #[test]
    fn image_count_liveness_ends_at_target() {
        let session = GenerationSession::new("in", "out", 2);
        let runtime = SessionRuntime::new();

        assert!(session.upstream_live(&runtime));
        runtime.increment_image_count();
        assert!(session.upstream_live(&runtime));
        assert_eq!(runtime.increment_image_count(), 2);
        assert!(!session.upstream_live(&runtime));
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    #[test]
    fn first_cancel_reason_sticks() {
        let runtime = SessionRuntime::new();
        assert!(!runtime.cancel().is_cancelled());

        runtime.cancel().cancel("user stop");
        runtime.cancel().cancel("later");
        assert!(runtime.cancel().is_cancelled());
        assert_eq!(runtime.cancel().reason().as_deref(), Some("user stop"));
    }

    #[tokio::test]
    async fn subscribers_see_cancellation() {
        let cancel = SessionCancel::default();
        let mut rx = cancel.subscribe();
        let handle = cancel.clone();
        tokio::spawn(async move { handle.cancel("stop") });

        rx.wait_for(Option::is_some).await.unwrap();
        assert_eq!(rx.borrow().as_deref(), Some("stop"));
    }

    // =========================================================================
    // Session setup
    // =========================================================================

    #[test]
    fn mask_needs_supporting_backend_and_file() {
        let tmp = TempDir::new().unwrap();
        let mask = tmp.path().join("mask.png");
        let mut session = GenerationSession::new(tmp.path(), tmp.path(), 1);
        session.mask_path = Some(mask.clone());

        assert_eq!(session.active_mask(), None);
        std::fs::write(&mask, b"x").unwrap();
        assert_eq!(session.active_mask(), Some(mask.as_path()));

        session.backend = Backend::Comfy;
        assert_eq!(session.active_mask(), None);
    }

    #[test]
    fn export_root_includes_session_subfolder() {
        let mut session = GenerationSession::new("in", "out", 1);
        assert_eq!(session.export_root(), PathBuf::from("out"));
        session.session_subdir_name = Some("20240101-000000".into());
        assert_eq!(session.export_root(), PathBuf::from("out/20240101-000000"));
    }

    #[test]
    fn missing_watch_dir_cancels_session() {
        let tmp = TempDir::new().unwrap();
        let session = GenerationSession::new(tmp.path().join("gone"), tmp.path().join("out"), 1);
        let runtime = SessionRuntime::new();

        let err = prepare_session(&session, &runtime).unwrap_err();
        assert!(matches!(err, SessionError::WatchDirMissing(_)));
        assert!(runtime.cancel().reason().unwrap().contains("does not exist"));
    }

    #[test]
    fn unusable_output_dir_cancels_session() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("out");
        std::fs::write(&blocker, b"a file, not a dir").unwrap();
        let session = GenerationSession::new(tmp.path(), &blocker, 1);
        let runtime = SessionRuntime::new();

        let err = prepare_session(&session, &runtime).unwrap_err();
        assert!(matches!(err, SessionError::OutputDirUnusable { .. }));
        assert!(runtime.cancel().is_cancelled());
    }

    #[test]
    fn prepare_creates_output_dir() {
        let tmp = TempDir::new().unwrap();
        let session = GenerationSession::new(tmp.path(), tmp.path().join("a/b"), 1);
        prepare_session(&session, &SessionRuntime::new()).unwrap();
        assert!(tmp.path().join("a/b").is_dir());
    }
}
