//! Generation metadata embedded in artifacts.
//!
//! Every image a backend writes carries its provenance as PNG text chunks.
//! Four mutually incompatible layouts are in circulation, each announced by
//! a tag at the start of the side-channel entry (`keyword: text`):
//!
//! | Tag | Format | Origin |
//! |---|---|---|
//! | `sd-metadata: ` | [`MetadataFormat::InvokeAiJson`] | InvokeAI 2.x structured JSON |
//! | `Dream: ` | [`MetadataFormat::InvokeAiDreamString`] | legacy InvokeAI CLI flag string |
//! | `parameters:` | [`MetadataFormat::Auto1111Text`] | Automatic1111 key/value block |
//! | `Nmkdiffusers:` | [`MetadataFormat::GenericJson`] | flat JSON dictionary |
//!
//! ## Dispatch
//!
//! Tags are tried in the table order above and the first hit wins. The JSON
//! tag sits ahead of the dream tag because InvokeAI wrote both for the same
//! image for a while and the JSON form is the complete one.
//!
//! ## Failure model
//!
//! Parsing never fails. [`parse`] always yields a [`ParseOutcome`] whose
//! [`ParseStatus`] says whether the record is complete, partially populated
//! (some fields garbled, the rest kept), or unparseable (no tag, or a payload
//! too broken to trust; `format` is then [`MetadataFormat::Unknown`]).
//!
//! Fields the source format never mentions stay `None`, so "not specified"
//! is never confused with "specified as zero".

mod auto1111;
mod dream;
mod flat_json;
mod invoke_json;
pub mod prompt;

use crate::imaging::{ImagingError, TextChunk, read_text_chunks};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which of the metadata layouts a record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataFormat {
    InvokeAiDreamString,
    InvokeAiJson,
    Auto1111Text,
    GenericJson,
    Unknown,
}

impl fmt::Display for MetadataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvokeAiDreamString => "InvokeAI dream string",
            Self::InvokeAiJson => "InvokeAI JSON",
            Self::Auto1111Text => "Automatic1111 text",
            Self::GenericJson => "NMKD JSON",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Face restoration post-processor named in the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceTool {
    Gfpgan,
    CodeFormer,
}

impl FaceTool {
    fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "gfpgan" => Some(Self::Gfpgan),
            "codeformer" => Some(Self::CodeFormer),
            _ => None,
        }
    }
}

/// Generated width × height in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Structured provenance of one artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageMetadataRecord {
    pub format: MetadataFormat,
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: Option<u32>,
    pub batch_size: u32,
    pub resolution: Option<Resolution>,
    pub cfg_scale: Option<f32>,
    pub img_scale: Option<f32>,
    /// Sampler identifier, empty when the source does not name one.
    pub sampler: String,
    pub seed: Option<i64>,
    pub init_image_path: Option<String>,
    /// Image-to-image strength in `0..=1`, already un-inverted.
    pub init_strength: Option<f32>,
    /// Model identifier, empty when unknown.
    pub model: String,
    pub seamless: bool,
    pub face_tool: Option<FaceTool>,
    /// The side-channel entry this record was parsed from, verbatim.
    pub raw_text: String,
}

impl Default for ImageMetadataRecord {
    fn default() -> Self {
        Self {
            format: MetadataFormat::Unknown,
            prompt: String::new(),
            negative_prompt: String::new(),
            steps: None,
            batch_size: 1,
            resolution: None,
            cfg_scale: None,
            img_scale: None,
            sampler: String::new(),
            seed: None,
            init_image_path: None,
            init_strength: None,
            model: String::new(),
            seamless: false,
            face_tool: None,
            raw_text: String::new(),
        }
    }
}

impl ImageMetadataRecord {
    /// Prompt with the negative prompt folded back into brackets.
    pub fn combined_prompt(&self) -> String {
        prompt::combine_prompt(&self.prompt, &self.negative_prompt)
    }

    fn set_width(&mut self, width: u32) {
        let height = self.resolution.map(|r| r.height).unwrap_or(0);
        self.resolution = Some(Resolution { width, height });
    }

    fn set_height(&mut self, height: u32) {
        let width = self.resolution.map(|r| r.width).unwrap_or(0);
        self.resolution = Some(Resolution { width, height });
    }

    /// Store the prompt, splitting a bracketed negative prompt off it.
    fn set_prompt_with_negative(&mut self, text: &str) {
        let (positive, negative) = prompt::split_negative_prompt(text.trim());
        self.prompt = positive;
        self.negative_prompt = negative;
    }
}

/// How much of the side channel could be trusted.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseStatus {
    Complete,
    /// Format recognised; the listed fields were garbled and left unset.
    Partial { warnings: Vec<String> },
    /// No tag, or the payload was structurally broken.
    Unparseable { reason: String },
}

/// Result of decoding a side channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub record: ImageMetadataRecord,
    pub status: ParseStatus,
}

impl ParseOutcome {
    fn unparseable(record: ImageMetadataRecord, reason: impl Into<String>) -> Self {
        Self {
            record,
            status: ParseStatus::Unparseable {
                reason: reason.into(),
            },
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status, ParseStatus::Complete)
    }

    pub fn into_record(self) -> ImageMetadataRecord {
        self.record
    }
}

/// Mutable record under construction plus the per-field complaints.
pub(crate) struct Draft {
    pub(crate) record: ImageMetadataRecord,
    warnings: Vec<String>,
}

impl Draft {
    fn new(raw_text: &str) -> Self {
        Self {
            record: ImageMetadataRecord {
                raw_text: raw_text.to_string(),
                ..ImageMetadataRecord::default()
            },
            warnings: Vec::new(),
        }
    }

    /// Parse a numeric field, recording a warning instead of failing.
    pub(crate) fn number<T: FromStr>(&mut self, field: &str, value: &str) -> Option<T> {
        match value.trim().parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                self.warn(format!("{field}: cannot read {value:?} as a number"));
                None
            }
        }
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

type VariantParser = fn(&str, &mut Draft) -> Result<(), String>;

struct FormatTag {
    tag: &'static str,
    format: MetadataFormat,
    parse: VariantParser,
}

/// Tag table in priority order. First match wins.
const FORMAT_TAGS: &[FormatTag] = &[
    FormatTag {
        tag: "sd-metadata: ",
        format: MetadataFormat::InvokeAiJson,
        parse: invoke_json::parse,
    },
    FormatTag {
        tag: "Dream: ",
        format: MetadataFormat::InvokeAiDreamString,
        parse: dream::parse,
    },
    FormatTag {
        tag: "parameters:",
        format: MetadataFormat::Auto1111Text,
        parse: auto1111::parse,
    },
    FormatTag {
        tag: "Nmkdiffusers:",
        format: MetadataFormat::GenericJson,
        parse: flat_json::parse,
    },
];

/// Decode one side-channel string.
pub fn parse(raw: &str) -> ParseOutcome {
    for entry in FORMAT_TAGS {
        if raw.contains(entry.tag) {
            return run_variant(entry, raw);
        }
    }
    tracing::debug!("no metadata tag in side channel");
    ParseOutcome::unparseable(
        ImageMetadataRecord {
            raw_text: raw.to_string(),
            ..ImageMetadataRecord::default()
        },
        "no recognised metadata tag",
    )
}

/// Decode the text chunks of one artifact.
///
/// The tag table is walked in priority order across all chunks, so a JSON
/// chunk beats a dream chunk no matter which was written first.
pub fn parse_chunks(chunks: &[TextChunk]) -> ParseOutcome {
    let entries: Vec<String> = chunks.iter().map(TextChunk::side_channel_text).collect();

    for entry in FORMAT_TAGS {
        if let Some(text) = entries.iter().find(|t| t.contains(entry.tag)) {
            return run_variant(entry, text);
        }
    }

    let reason = if entries.is_empty() {
        "no text chunks"
    } else {
        "no recognised metadata tag"
    };
    tracing::debug!(chunks = entries.len(), "{reason}");
    ParseOutcome::unparseable(
        ImageMetadataRecord {
            raw_text: entries.join("\n"),
            ..ImageMetadataRecord::default()
        },
        reason,
    )
}

/// Read and decode the metadata of an image on disk.
pub fn read_metadata(path: &Path) -> Result<ParseOutcome, ImagingError> {
    let chunks = read_text_chunks(path)?;
    Ok(parse_chunks(&chunks))
}

fn run_variant(entry: &FormatTag, raw: &str) -> ParseOutcome {
    let payload = raw
        .rfind(entry.tag)
        .map(|idx| &raw[idx + entry.tag.len()..])
        .unwrap_or_default();

    let mut draft = Draft::new(raw);
    match (entry.parse)(payload, &mut draft) {
        Ok(()) => {
            draft.record.format = entry.format;
            let status = if draft.warnings.is_empty() {
                ParseStatus::Complete
            } else {
                tracing::debug!(
                    format = %entry.format,
                    warnings = ?draft.warnings,
                    "metadata partially parsed"
                );
                ParseStatus::Partial {
                    warnings: draft.warnings,
                }
            };
            ParseOutcome {
                record: draft.record,
                status,
            }
        }
        Err(reason) => {
            tracing::warn!(format = %entry.format, %reason, "failed to parse image metadata");
            draft.record.format = MetadataFormat::Unknown;
            ParseOutcome::unparseable(draft.record, reason)
        }
    }
}
