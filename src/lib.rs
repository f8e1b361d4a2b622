//! # sd-export
//!
//! Moves images produced by a Stable Diffusion backend out of its output
//! directory and files them under names derived from the generation
//! metadata embedded in each image.
//!
//! # Architecture: A Polling Export Loop
//!
//! The backend runs as a separate process and writes PNGs whenever it likes.
//! A background task polls its output directory and reconciles three
//! sources of truth that evolve independently:
//!
//! ```text
//! filesystem      files appear, are still being written, disappear
//! log stream      the backend's last few log lines name finished files
//! metadata        four incompatible text formats inside the PNGs
//! ```
//!
//! Each pass lists the directory, keeps the images that are stable, reads
//! their metadata, builds a name that fits the path budget, and moves them
//! without ever overwriting an existing file:
//!
//! ```text
//! list → filter stable → parse metadata → build name → resolve → overlay → move → publish
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`metadata`] | Parses generation metadata from the four known formats |
//! | [`imaging`] | PNG text-chunk I/O and the inpainting mask overlay |
//! | [`naming`] | Builds filenames and prompt folder names within the 255-byte path budget |
//! | [`paths`] | Collision-free destination paths and no-clobber moves |
//! | [`logtail`] | Most-recent log lines, from memory or from a log file |
//! | [`session`] | Per-run context, liveness sources, shared counters and cancellation |
//! | [`pipeline`] | The tick state machine and its async driver |
//! | [`config`] | `config.toml` loading, validation and merging over stock defaults |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Parsing Never Fails
//!
//! Metadata comes from whatever the backend happened to write. A parse
//! yields a [`metadata::ParseOutcome`] that says how much could be trusted
//! instead of an error, so one garbled field never blocks an export.
//!
//! ## Tick Versus Timing
//!
//! [`pipeline::ExportPipeline::tick`] does one synchronous pass and reports
//! the state it ended in. The async driver owns the startup delay, the poll
//! interval and cancellation. Ticks can therefore be tested one at a time
//! with a chosen clock value.
//!
//! ## Explicit Session
//!
//! Everything a run depends on lives in an immutable
//! [`session::GenerationSession`] passed to the pipeline. Starting over
//! means dropping it and building a new one; there is no global state.

pub mod config;
pub mod imaging;
pub mod logging;
pub mod logtail;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;
