//! The export pipeline: watched directory in, named artifacts out.
//!
//! ```text
//!   Idle ──tick──▶ Running ──upstream done──▶ Draining ──dir empty──▶ Terminated
//!                     │                                                  ▲
//!                     └──────────── cancelled / tick-fatal error ────────┘
//! ```
//!
//! [`ExportPipeline::tick`] does one pass and reports the state it ended in.
//! It never sleeps; timing, the startup delay and cancellation wake-ups
//! belong to the [`driver`].
//!
//! ## One tick
//!
//! 1. Stop if the session was cancelled.
//! 2. List artifacts in the watched directory (failure ends the loop).
//! 3. Ask the session whether the generation process is still live.
//! 4. Keep artifacts created since the session started. Not live, no import
//!    in progress and nothing left means the run is over.
//! 5. Keep artifacts that are unlocked and old enough.
//! 6. While upstream is live and the backend logs saved file names, keep
//!    only those mentioned in the last few log lines.
//! 7. Read metadata (in parallel), then name, overlay and move each artifact
//!    in creation order.
//! 8. Publish every exported path that still exists, on any tick where
//!    that list changed (new exports, or earlier ones deleted since). An
//!    unchanged list is not re-sent.
//!
//! A failure on one artifact is logged and the artifact is left where it is
//! for the next tick.

pub mod artifacts;
pub mod driver;
pub mod sink;

use crate::imaging::{AlphaOverlay, MaskOverlay, apply_mask_preserving_metadata};
use crate::logtail::{LogTail, mentioned_in};
use crate::metadata::{ImageMetadataRecord, read_metadata};
use crate::naming::{NamingOptions, build_filename, prompt_dir_name, suffix_token};
use crate::paths::{Reservations, move_no_clobber};
use crate::session::{GenerationSession, SessionError, SessionRuntime, prepare_session};
use artifacts::{Artifact, is_locked, list_artifacts};
use chrono::{DateTime, Local};
use rayon::prelude::*;
use serde::Serialize;
use sink::{LogSink, PreviewSink};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

pub use driver::{ExportSummary, run_export_loop, spawn_export_loop};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot list {}: {source}", .path.display())]
    Listing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("tick task failed: {0}")]
    Join(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Terminated,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        })
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The generation process is done and every artifact was exported.
    UpstreamFinished,
    Cancelled(Option<String>),
    /// A tick-wide failure ended the loop.
    Failed(String),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFinished => f.write_str("generation finished"),
            Self::Cancelled(Some(reason)) => write!(f, "cancelled: {reason}"),
            Self::Cancelled(None) => f.write_str("cancelled"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// One artifact moved into the output namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedImageRecord {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub metadata: ImageMetadataRecord,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub state: PipelineState,
    pub exported: Vec<ExportedImageRecord>,
    /// Candidates seen but left for a later tick.
    pub deferred: usize,
    pub termination: Option<Termination>,
}

impl TickOutcome {
    fn terminated(termination: Termination) -> Self {
        Self {
            state: PipelineState::Terminated,
            exported: Vec::new(),
            deferred: 0,
            termination: Some(termination),
        }
    }
}

/// Timing and filtering knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub poll_interval: Duration,
    pub startup_delay: Duration,
    /// How long an artifact must go unwritten before it is touched.
    pub minimum_age: Duration,
    pub log_correlation_lines: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            startup_delay: Duration::from_millis(1000),
            minimum_age: Duration::from_millis(200),
            log_correlation_lines: 5,
        }
    }
}

pub struct ExportPipeline {
    session: Arc<GenerationSession>,
    runtime: Arc<SessionRuntime>,
    settings: PipelineSettings,
    log_tail: Option<Arc<dyn LogTail>>,
    overlay: Arc<dyn MaskOverlay>,
    sink: Arc<dyn PreviewSink>,
    state: PipelineState,
    termination: Option<Termination>,
    published: Vec<PathBuf>,
}

impl ExportPipeline {
    /// Pipeline for `session`, after checking its directories.
    ///
    /// A session that cannot be exported is cancelled and the error returned.
    pub fn new(
        session: Arc<GenerationSession>,
        runtime: Arc<SessionRuntime>,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError> {
        prepare_session(&session, &runtime)?;
        Ok(Self {
            session,
            runtime,
            settings,
            log_tail: None,
            overlay: Arc::new(AlphaOverlay),
            sink: Arc::new(LogSink),
            state: PipelineState::Idle,
            termination: None,
            published: Vec::new(),
        })
    }

    pub fn with_log_tail(mut self, tail: Arc<dyn LogTail>) -> Self {
        self.log_tail = Some(tail);
        self
    }

    pub fn with_overlay(mut self, overlay: Arc<dyn MaskOverlay>) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn PreviewSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn runtime(&self) -> &Arc<SessionRuntime> {
        &self.runtime
    }

    pub fn session(&self) -> &Arc<GenerationSession> {
        &self.session
    }

    /// Every destination exported so far, in export order.
    pub fn published(&self) -> &[PathBuf] {
        &self.published
    }

    /// Run one pass at wall-clock time `now`.
    ///
    /// `Err` is tick-fatal: the loop should stop. Once terminated, further
    /// ticks do nothing and report the same termination.
    pub fn tick(&mut self, now: SystemTime) -> Result<TickOutcome, PipelineError> {
        if let Some(termination) = &self.termination {
            return Ok(TickOutcome::terminated(termination.clone()));
        }

        if self.runtime.cancel().is_cancelled() {
            return Ok(self.terminate(Termination::Cancelled(self.runtime.cancel().reason())));
        }

        let watch_dir = &self.session.watch_dir;
        let listed =
            list_artifacts(watch_dir, &self.session.extension).map_err(|source| {
                PipelineError::Listing {
                    path: watch_dir.clone(),
                    source,
                }
            })?;

        let live = self.session.upstream_live(&self.runtime);
        let session_start = SystemTime::from(self.session.start_time);
        let candidates: Vec<Artifact> = listed
            .into_iter()
            .filter(|a| a.created >= session_start)
            .collect();

        if !live && !self.runtime.import_in_progress() && candidates.is_empty() {
            return Ok(self.terminate(Termination::UpstreamFinished));
        }
        self.state = if live {
            PipelineState::Running
        } else {
            PipelineState::Draining
        };

        let mut ready: Vec<Artifact> = candidates
            .iter()
            .filter(|a| a.is_settled(now, self.settings.minimum_age) && !is_locked(&a.path))
            .cloned()
            .collect();

        // Once upstream has exited its log no longer moves, so every settled file is final.
        if live
            && let Some(tail) = self
                .log_tail
                .as_ref()
                .filter(|_| self.session.backend.surfaces_log_tail())
        {
            let lines = tail.recent_lines(self.settings.log_correlation_lines);
            ready.retain(|a| mentioned_in(&lines, &a.file_name()));
        }

        let deferred = candidates.len() - ready.len();
        let exported = self.export_batch(&ready, now);
        let deferred = deferred + (ready.len() - exported.len());

        self.published
            .extend(exported.iter().map(|e| e.destination.clone()));
        let listed_before = self.published.len();
        self.published.retain(|p| p.exists());
        let removed = listed_before != self.published.len();
        if !exported.is_empty() || removed {
            self.sink.publish(&self.published);
        }

        tracing::debug!(
            state = %self.state,
            exported = exported.len(),
            deferred,
            "tick complete"
        );

        Ok(TickOutcome {
            state: self.state,
            exported,
            deferred,
            termination: None,
        })
    }

    fn terminate(&mut self, termination: Termination) -> TickOutcome {
        tracing::info!(
            reason = %termination,
            exported = self.published.len(),
            "export loop end"
        );
        self.state = PipelineState::Terminated;
        self.termination = Some(termination.clone());
        TickOutcome::terminated(termination)
    }

    fn export_batch(&self, ready: &[Artifact], now: SystemTime) -> Vec<ExportedImageRecord> {
        let records: Vec<ImageMetadataRecord> = ready
            .par_iter()
            .map(|a| match read_metadata(&a.path) {
                Ok(outcome) => outcome.into_record(),
                Err(e) => {
                    tracing::warn!(path = %a.path.display(), error = %e, "cannot read metadata, exporting unnamed");
                    ImageMetadataRecord::default()
                }
            })
            .collect();

        let local_now = DateTime::<Local>::from(now);
        let mut reservations = Reservations::new();
        let mut exported = Vec::with_capacity(ready.len());

        for (artifact, record) in ready.iter().zip(records) {
            match self.export_one(artifact, &record, local_now, &mut reservations) {
                Ok(destination) => {
                    let count = self.runtime.increment_image_count();
                    tracing::info!(
                        src = %artifact.file_name(),
                        dst = %destination.display(),
                        count,
                        "exported"
                    );
                    exported.push(ExportedImageRecord {
                        source: artifact.path.clone(),
                        destination,
                        metadata: record,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        path = %artifact.path.display(),
                        error = %e,
                        "failed to export, will retry next tick"
                    );
                }
            }
        }
        exported
    }

    fn export_one(
        &self,
        artifact: &Artifact,
        record: &ImageMetadataRecord,
        now: DateTime<Local>,
        reservations: &mut Reservations,
    ) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
        let session = &self.session;
        let dir = self.destination_dir(record, now);
        std::fs::create_dir_all(&dir)?;

        let naming = if session.subfolders_per_prompt {
            NamingOptions {
                include_prompt: false,
                ..session.naming.clone()
            }
        } else {
            session.naming.clone()
        };
        let suffix = suffix_token(self.runtime.image_count() + 1, session.target_image_count);
        let filename = build_filename(
            record,
            &naming,
            path_len(&dir),
            &suffix,
            &session.extension,
            now,
        );
        let target = reservations.claim(&dir.join(filename));

        if let Some(mask) = session.active_mask()
            && let Err(e) = apply_mask_preserving_metadata(self.overlay.as_ref(), &artifact.path, mask)
        {
            reservations.release(&target);
            return Err(e.into());
        }

        Ok(move_no_clobber(&artifact.path, &target, reservations)?)
    }

    fn destination_dir(&self, record: &ImageMetadataRecord, now: DateTime<Local>) -> PathBuf {
        let root = self.session.export_root();
        if !self.session.subfolders_per_prompt {
            return root;
        }
        let name = prompt_dir_name(
            &record.prompt,
            self.session.naming.strip_wildcards,
            path_len(&root),
            now,
        );
        root.join(name)
    }
}

fn path_len(path: &Path) -> usize {
    path.as_os_str().len()
}
