//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Inspect
//!
//! ```text
//! 001 000001.3357757885.png
//!     Format: InvokeAI JSON
//!     Prompt: a lighthouse at dusk
//!     Negative: blurry
//!     Steps: 50
//!     Size: 512x768
//!     CFG scale: 7.50
//!     Sampler: k_lms
//!     Seed: 3357757885
//! ```
//!
//! Fields the metadata does not specify are left out. A partial parse adds
//! a `Warnings:` line; an unparseable one a `Status:` line with the reason.
//!
//! ## Watch
//!
//! ```text
//! 001 exported/20240131-142501-1-a_cat-1.png
//! 002 exported/20240131-142502-2-a_dog-2.png
//!
//! Exported 2 images (generation finished)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>` or
//! `String`) for testability and a `print_*` wrapper that writes to stdout.
//! Format functions are pure: no I/O, no side effects.

use crate::metadata::{ImageMetadataRecord, ParseOutcome, ParseStatus};
use crate::pipeline::ExportSummary;
use std::path::{Path, PathBuf};

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

// ============================================================================
// Inspect
// ============================================================================

/// Format the parsed metadata of one image.
pub fn format_inspect(index: usize, path: &Path, outcome: &ParseOutcome) -> Vec<String> {
    let pad = indent(1);
    let mut lines = vec![format!("{} {}", format_index(index), file_name(path))];
    lines.extend(
        record_fields(&outcome.record)
            .into_iter()
            .map(|(label, value)| format!("{pad}{label}: {value}")),
    );

    match &outcome.status {
        ParseStatus::Complete => {}
        ParseStatus::Partial { warnings } => {
            lines.push(format!("{pad}Warnings: {}", warnings.join("; ")));
        }
        ParseStatus::Unparseable { reason } => {
            lines.push(format!("{pad}Status: unparseable ({reason})"));
        }
    }
    lines
}

/// Label/value pairs for the fields a record actually carries.
fn record_fields(r: &ImageMetadataRecord) -> Vec<(&'static str, String)> {
    let mut fields = vec![("Format", r.format.to_string())];
    let mut push = |label: &'static str, value: Option<String>| {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            fields.push((label, v));
        }
    };

    push("Prompt", Some(r.prompt.clone()));
    push("Negative", Some(r.negative_prompt.clone()));
    push("Steps", r.steps.map(|s| s.to_string()));
    push("Batch", (r.batch_size > 1).then(|| r.batch_size.to_string()));
    push("Size", r.resolution.map(|res| res.to_string()));
    push("CFG scale", r.cfg_scale.map(|s| format!("{s:.2}")));
    push("Image scale", r.img_scale.map(|s| format!("{s:.2}")));
    push("Sampler", Some(r.sampler.clone()));
    push("Seed", r.seed.map(|s| s.to_string()));
    push("Model", Some(r.model.clone()));
    push(
        "Init image",
        r.init_image_path.as_ref().map(|p| match r.init_strength {
            Some(strength) => format!("{p} (strength {strength:.2})"),
            None => p.clone(),
        }),
    );
    push("Seamless", r.seamless.then(|| "yes".to_string()));
    push(
        "Face restoration",
        r.face_tool.map(|t| format!("{t:?}").to_lowercase()),
    );
    fields
}

/// The same information as JSON, one object per image.
pub fn format_inspect_json(path: &Path, outcome: &ParseOutcome) -> serde_json::Value {
    let (status, detail) = match &outcome.status {
        ParseStatus::Complete => ("complete", serde_json::Value::Null),
        ParseStatus::Partial { warnings } => ("partial", serde_json::json!(warnings)),
        ParseStatus::Unparseable { reason } => ("unparseable", serde_json::json!(reason)),
    };
    serde_json::json!({
        "file": path.display().to_string(),
        "status": status,
        "detail": detail,
        "metadata": outcome.record,
    })
}

/// Print metadata of several images.
pub fn print_inspect(results: &[(PathBuf, ParseOutcome)]) {
    for (i, (path, outcome)) in results.iter().enumerate() {
        if i > 0 {
            println!();
        }
        for line in format_inspect(i + 1, path, outcome) {
            println!("{}", line);
        }
    }
}

// ============================================================================
// Name
// ============================================================================

/// Format a dry-run naming result.
pub fn format_name(source: &Path, destination: &Path) -> String {
    format!("{} → {}", file_name(source), destination.display())
}

// ============================================================================
// Watch
// ============================================================================

/// Format the published paths not in `already_shown`, numbered after it.
///
/// The preview sink hands over the whole list each time, and it shrinks when
/// exported files are deleted, so new entries are found by path, not position.
pub fn format_exported(published: &[PathBuf], already_shown: &[PathBuf]) -> Vec<String> {
    published
        .iter()
        .filter(|p| !already_shown.contains(p))
        .enumerate()
        .map(|(i, p)| format!("{} {}", format_index(already_shown.len() + i + 1), p.display()))
        .collect()
}

/// Format the closing line of a watch run.
pub fn format_summary(summary: &ExportSummary) -> String {
    let n = summary.published.len();
    let noun = if n == 1 { "image" } else { "images" };
    format!("Exported {n} {noun} ({})", summary.termination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataFormat, Resolution, parse};
    use crate::pipeline::Termination;

    // =========================================================================
    // Inspect
    // =========================================================================

    #[test]
    fn inspect_lists_set_fields_only() {
        let outcome = parse(r#"Dream: "a cat [blurry]" -s 20 -S 42 -W 512 -H 768 -C 7.5 -A k_lms"#);
        let lines = format_inspect(1, Path::new("/in/000001.42.png"), &outcome);
        assert_eq!(
            lines,
            vec![
                "001 000001.42.png",
                "    Format: InvokeAI dream string",
                "    Prompt: a cat",
                "    Negative: blurry",
                "    Steps: 20",
                "    Size: 512x768",
                "    CFG scale: 7.50",
                "    Sampler: k_lms",
                "    Seed: 42",
            ]
        );
    }

    #[test]
    fn inspect_shows_init_image_and_strength() {
        let outcome = ParseOutcome {
            record: ImageMetadataRecord {
                format: MetadataFormat::GenericJson,
                prompt: "a castle".into(),
                init_image_path: Some("init.png".into()),
                init_strength: Some(0.7),
                ..ImageMetadataRecord::default()
            },
            status: ParseStatus::Complete,
        };
        let lines = format_inspect(2, Path::new("x.png"), &outcome);
        assert!(lines.contains(&"    Init image: init.png (strength 0.70)".to_string()));
        assert_eq!(lines[0], "002 x.png");
    }

    #[test]
    fn inspect_reports_unparseable() {
        let outcome = parse("Software: GIMP");
        let lines = format_inspect(1, Path::new("x.png"), &outcome);
        assert_eq!(lines[1], "    Format: unknown");
        assert_eq!(
            lines.last().unwrap(),
            "    Status: unparseable (no recognised metadata tag)"
        );
    }

    #[test]
    fn inspect_reports_partial_warnings() {
        let outcome = parse("parameters: a cat\nSteps: 20, Size: big");
        let lines = format_inspect(1, Path::new("x.png"), &outcome);
        assert!(lines.last().unwrap().starts_with("    Warnings: size"));
    }

    #[test]
    fn inspect_json_shape() {
        let outcome = ParseOutcome {
            record: ImageMetadataRecord {
                format: MetadataFormat::Auto1111Text,
                steps: Some(20),
                resolution: Some(Resolution {
                    width: 512,
                    height: 512,
                }),
                ..ImageMetadataRecord::default()
            },
            status: ParseStatus::Complete,
        };
        let json = format_inspect_json(Path::new("a.png"), &outcome);
        assert_eq!(json["status"], "complete");
        assert_eq!(json["metadata"]["format"], "auto1111-text");
        assert_eq!(json["metadata"]["steps"], 20);
        assert_eq!(json["metadata"]["seed"], serde_json::Value::Null);
        assert_eq!(json["metadata"]["resolution"]["width"], 512);
    }

    // =========================================================================
    // Watch
    // =========================================================================

    #[test]
    fn exported_lines_continue_numbering() {
        let a = PathBuf::from("out/a.png");
        let b = PathBuf::from("out/b.png");
        let published = vec![a.clone(), b.clone()];
        assert_eq!(format_exported(&published, &[]), vec!["001 out/a.png", "002 out/b.png"]);
        assert_eq!(format_exported(&published, &[a.clone()]), vec!["002 out/b.png"]);
        assert!(format_exported(&published, &[a, b]).is_empty());
    }

    #[test]
    fn exported_lines_survive_deleted_entries() {
        let a = PathBuf::from("out/a.png");
        let b = PathBuf::from("out/b.png");
        let c = PathBuf::from("out/c.png");
        // a was deleted after being shown; c is new
        let published = vec![b.clone(), c];
        assert_eq!(format_exported(&published, &[a, b]), vec!["003 out/c.png"]);
    }

    #[test]
    fn summary_line() {
        let summary = ExportSummary {
            termination: Termination::UpstreamFinished,
            published: vec![PathBuf::from("a.png")],
        };
        assert_eq!(format_summary(&summary), "Exported 1 image (generation finished)");

        let summary = ExportSummary {
            termination: Termination::Cancelled(Some("ctrl-c".into())),
            published: vec![],
        };
        assert_eq!(format_summary(&summary), "Exported 0 images (cancelled: ctrl-c)");
    }

    #[test]
    fn name_line() {
        assert_eq!(
            format_name(Path::new("/in/a.png"), Path::new("out/b.png")),
            "a.png → out/b.png"
        );
    }
}
