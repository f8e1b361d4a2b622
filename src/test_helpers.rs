//! Shared test utilities for the sd-export test suite.
//!
//! Provides PNG fixture writers, session builders rooted in a temp
//! directory, and recording collaborators for the pipeline.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let session = finished_session(tmp.path());
//! write_artifact(&session.watch_dir.join("000001.1.png"), "\"a cat\" -s 20 -W 512 -H 512");
//! ```

use crate::imaging::{ImagingError, MaskOverlay, TextChunk};
use crate::pipeline::sink::PreviewSink;
use crate::session::{GenerationSession, Liveness};
use chrono::Local;
use image::{DynamicImage, Rgba, RgbaImage};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, SystemTime};

// =========================================================================
// PNG fixtures
// =========================================================================

/// Write a 4x4 RGBA gradient PNG carrying the given text chunks.
pub fn write_png(path: &Path, chunks: &[(&str, &str)]) {
    let img = RgbaImage::from_fn(4, 4, |x, y| Rgba([(x * 60) as u8, (y * 60) as u8, 128, 255]));
    let chunks: Vec<TextChunk> = chunks.iter().map(|(k, t)| TextChunk::new(*k, *t)).collect();
    crate::imaging::write_png(path, &DynamicImage::ImageRgba8(img), &chunks).unwrap();
}

/// Write a single-colour PNG without text chunks.
pub fn write_solid_png(path: &Path, width: u32, height: u32, color: Rgba<u8>) {
    let img = RgbaImage::from_pixel(width, height, color);
    DynamicImage::ImageRgba8(img).save(path).unwrap();
}

/// Push a file's last-write time `by` into the past.
pub fn age(path: &Path, by: Duration) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - by).unwrap();
}

/// Write a finished artifact with a dream-string side channel.
///
/// Its write time is a second old, past any minimum-age gate in the tests.
pub fn write_artifact(path: &Path, dream: &str) {
    write_png(path, &[("Dream", dream)]);
    age(path, Duration::from_secs(1));
}

// =========================================================================
// Sessions
// =========================================================================

/// Session watching `root/watch` and exporting to `root/out`.
///
/// Started a minute ago, one target image, image-count liveness.
pub fn test_session(root: &Path) -> GenerationSession {
    let watch = root.join("watch");
    let out = root.join("out");
    std::fs::create_dir_all(&watch).unwrap();
    std::fs::create_dir_all(&out).unwrap();

    let mut session = GenerationSession::new(watch, out, 1);
    session.start_time = Local::now() - chrono::Duration::seconds(60);
    session
}

/// Session whose generation process has already exited.
pub fn finished_session(root: &Path) -> GenerationSession {
    let mut session = test_session(root);
    session.liveness = Liveness::Process(Arc::new(AtomicBool::new(false)));
    session
}

// =========================================================================
// Recording collaborators
// =========================================================================

/// Sink that keeps every published list.
#[derive(Default)]
pub struct RecordingSink {
    lists: Mutex<Vec<Vec<PathBuf>>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<Vec<PathBuf>> {
        self.lists.lock().unwrap().clone()
    }
}

impl PreviewSink for RecordingSink {
    fn publish(&self, paths: &[PathBuf]) {
        self.lists.lock().unwrap().push(paths.to_vec());
    }
}

/// Overlay that records the masks it was given without touching pixels.
#[derive(Default)]
pub struct RecordingOverlay {
    calls: Mutex<Vec<PathBuf>>,
    fail: bool,
}

impl RecordingOverlay {
    /// An overlay that fails every call.
    pub fn failing() -> Self {
        Self {
            calls: Mutex::default(),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

impl MaskOverlay for RecordingOverlay {
    fn composite(&self, base: DynamicImage, mask: &Path) -> Result<DynamicImage, ImagingError> {
        self.calls.lock().unwrap().push(mask.to_path_buf());
        if self.fail {
            return Err(ImagingError::Io(std::io::Error::other("mask rejected")));
        }
        Ok(base)
    }
}
