//! Async driver for the export pipeline.
//!
//! Waits out the startup delay, then ticks on the poll interval until the
//! pipeline terminates. Each tick runs on tokio's blocking pool since it
//! does file I/O and image decoding. Both waits wake early on cancellation;
//! the following tick then sees the cancel and terminates normally.

use super::{ExportPipeline, PipelineError, Termination};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How a finished export loop ended and what it exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub termination: Termination,
    pub published: Vec<PathBuf>,
}

/// Run the loop to completion. Dropping the pipeline afterwards resets the session.
pub async fn run_export_loop(mut pipeline: ExportPipeline) -> ExportSummary {
    let mut cancel_rx = pipeline.runtime().cancel().subscribe();
    let poll_interval = pipeline.settings().poll_interval;

    tracing::debug!(
        watch_dir = %pipeline.session().watch_dir.display(),
        backend = %pipeline.session().backend,
        "export loop starting"
    );
    pause(pipeline.settings().startup_delay, &mut cancel_rx).await;

    loop {
        let joined = tokio::task::spawn_blocking(move || {
            let result = pipeline.tick(SystemTime::now());
            (pipeline, result)
        })
        .await;

        let (returned, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                let error = PipelineError::Join(e.to_string());
                tracing::error!(error = %error, "image export error");
                return ExportSummary {
                    termination: Termination::Failed(error.to_string()),
                    published: Vec::new(),
                };
            }
        };
        pipeline = returned;

        match result {
            Ok(outcome) => {
                if let Some(termination) = outcome.termination {
                    return ExportSummary {
                        termination,
                        published: pipeline.published().to_vec(),
                    };
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "image export error");
                tracing::info!(exported = pipeline.published().len(), "export loop end");
                return ExportSummary {
                    termination: Termination::Failed(e.to_string()),
                    published: pipeline.published().to_vec(),
                };
            }
        }

        pause(poll_interval, &mut cancel_rx).await;
    }
}

/// Run the loop as a background task.
pub fn spawn_export_loop(pipeline: ExportPipeline) -> JoinHandle<ExportSummary> {
    tokio::spawn(run_export_loop(pipeline))
}

/// Sleep for `duration`, returning early if cancellation is requested.
async fn pause(duration: Duration, cancel_rx: &mut watch::Receiver<Option<String>>) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        // Only a bool leaves this block; the borrowed value must not live across an await.
        sender_gone = async { cancel_rx.wait_for(Option::is_some).await.is_err() } => {
            // Nothing can cancel any more, just wait.
            if sender_gone {
                tokio::time::sleep(duration).await;
            }
        }
    }
}
