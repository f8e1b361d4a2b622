//! Filename construction under a fixed path-length budget.
//!
//! Exported artifacts are named from their generation metadata:
//!
//! ```text
//! 20240131-142501-007-a_lighthouse_at_dusk-3357757885-scale7.50-k_euler-v1-5-pruned.png
//! └─ timestamp ──┘ └┬┘ └──── prompt ──────┘ └─ seed ─┘ └ scale ─┘ └ smp ┘ └ model ─┘
//!                 suffix
//! ```
//!
//! The whole path must stay within [`MAX_PATH_LEN`] bytes. Timestamp and
//! suffix are always present. The optional tokens are granted budget in a
//! fixed priority order (seed, scale, sampler, prompt, model), each only if
//! it fits whole; the prompt is the one token that is truncated to fit
//! rather than dropped, unless fewer than [`MIN_PROMPT_LEN`] bytes remain.
//! The prompt is placed right after the suffix regardless of when it was
//! granted budget.
//!
//! All lengths are byte lengths.

use crate::metadata::ImageMetadataRecord;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Longest path the target filesystem accepts.
pub const MAX_PATH_LEN: usize = 255;

/// Below this many bytes a prompt fragment is noise; it is dropped instead.
pub const MIN_PROMPT_LEN: usize = 4;

/// Space reserved for the file name when a per-prompt subfolder is created.
const PROMPT_DIR_RESERVE: usize = 65;

const MODEL_TOKEN_CHARS: usize = 20;
const SEPARATOR: &str = "-";
const MODEL_EXTENSIONS: &[&str] = &["ckpt", "safetensors", "pt", "bin", "onnx"];

/// Leading timestamp format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimestampMode {
    None,
    Date,
    #[default]
    DateTime,
    UnixEpoch,
}

/// Which optional tokens go into exported filenames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingOptions {
    pub timestamp: TimestampMode,
    pub include_prompt: bool,
    pub include_seed: bool,
    pub include_scale: bool,
    pub include_sampler: bool,
    pub include_model: bool,
    /// Model to name files after. Falls back to the record's model when empty.
    pub model_name: String,
    pub strip_wildcards: bool,
}

impl Default for NamingOptions {
    fn default() -> Self {
        Self {
            timestamp: TimestampMode::DateTime,
            include_prompt: true,
            include_seed: true,
            include_scale: true,
            include_sampler: true,
            include_model: false,
            model_name: String::new(),
            strip_wildcards: true,
        }
    }
}

/// Build the file name (stem plus extension) for one artifact.
///
/// `parent_dir_len` is the byte length of the destination directory path;
/// the separator between it and the file name is accounted for here.
pub fn build_filename(
    record: &ImageMetadataRecord,
    naming: &NamingOptions,
    parent_dir_len: usize,
    suffix: &str,
    extension: &str,
    now: DateTime<Local>,
) -> String {
    let filename_budget = MAX_PATH_LEN.saturating_sub(parent_dir_len + 1);
    let stem_budget = filename_budget.saturating_sub(1 + extension.len());

    let timestamp = timestamp_token(naming.timestamp, now);
    let mandatory: Vec<&str> = [timestamp.as_str(), suffix]
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect();
    let mandatory_len = joined_len(&mandatory);

    let mut remaining = stem_budget.saturating_sub(mandatory_len);
    // Separator cost is zero for the very first component of an empty stem.
    let sep_cost = |used_any: bool| if used_any { SEPARATOR.len() } else { 0 };
    let mut used_any = mandatory_len > 0;
    let mut tail: Vec<String> = Vec::new();

    let mut grant = |token: String, remaining: &mut usize, used_any: &mut bool| {
        let cost = sep_cost(*used_any) + token.len();
        if token.is_empty() || cost > *remaining {
            return;
        }
        *remaining -= cost;
        *used_any = true;
        tail.push(token);
    };

    if naming.include_seed
        && let Some(seed) = record.seed
    {
        grant(seed.to_string(), &mut remaining, &mut used_any);
    }
    if naming.include_scale
        && let Some(scale) = record.cfg_scale
    {
        grant(format!("scale{scale:.2}"), &mut remaining, &mut used_any);
    }
    if naming.include_sampler {
        grant(sanitize_token(&record.sampler), &mut remaining, &mut used_any);
    }

    let mut prompt_token = String::new();
    if naming.include_prompt {
        let available = remaining.saturating_sub(sep_cost(used_any));
        if available >= MIN_PROMPT_LEN {
            prompt_token = sanitize_prompt(&record.prompt, naming.strip_wildcards, available);
            // Edge trimming after truncation can leave a stub below the floor.
            if prompt_token.len() < MIN_PROMPT_LEN {
                prompt_token.clear();
            }
            if !prompt_token.is_empty() {
                remaining -= sep_cost(used_any) + prompt_token.len();
                used_any = true;
            }
        }
    }

    if naming.include_model {
        let model = if naming.model_name.is_empty() {
            &record.model
        } else {
            &naming.model_name
        };
        grant(model_token(model), &mut remaining, &mut used_any);
    }

    let mut components: Vec<String> = mandatory.iter().map(|t| t.to_string()).collect();
    if !prompt_token.is_empty() {
        components.push(prompt_token);
    }
    components.extend(tail);

    format!("{}.{extension}", components.join(SEPARATOR))
}

/// Timestamp token for `now`, empty when timestamps are off.
pub fn timestamp_token(mode: TimestampMode, now: DateTime<Local>) -> String {
    match mode {
        TimestampMode::None => String::new(),
        TimestampMode::Date => now.format("%Y%m%d").to_string(),
        TimestampMode::DateTime => now.format("%Y%m%d-%H%M%S").to_string(),
        TimestampMode::UnixEpoch => now.timestamp().to_string(),
    }
}

/// Running image index, zero-padded to the digit count of the batch target.
pub fn suffix_token(index: usize, target: usize) -> String {
    let width = target.max(1).to_string().len();
    format!("{index:0width$}")
}

/// Name of the per-prompt subfolder under a directory of `parent_dir_len` bytes.
pub fn prompt_dir_name(
    prompt: &str,
    strip_wildcards: bool,
    parent_dir_len: usize,
    now: DateTime<Local>,
) -> String {
    let budget = MAX_PATH_LEN.saturating_sub(parent_dir_len + PROMPT_DIR_RESERVE);
    let name = sanitize_prompt(prompt, strip_wildcards, budget);
    if name.is_empty() {
        format!("unknown_prompt_{}", now.timestamp_millis())
    } else {
        name
    }
}

/// Make a prompt safe as a path component and cap it at `max_bytes`.
pub fn sanitize_prompt(prompt: &str, strip_wildcards_first: bool, max_bytes: usize) -> String {
    let text = if strip_wildcards_first {
        strip_wildcards(prompt)
    } else {
        prompt.to_string()
    };

    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let mapped = match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ',' => continue,
            c if c.is_whitespace() => '_',
            c if c.is_control() => continue,
            c => c,
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }

    let trimmed = trim_edges(&out);
    trim_edges(truncate_bytes(trimmed, max_bytes)).to_string()
}

/// Remove `__wildcard__` and `~wildcard` references from a prompt.
pub fn strip_wildcards(prompt: &str) -> String {
    let chars: Vec<char> = prompt.chars().collect();
    let mut out = String::with_capacity(prompt.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '_'
            && chars.get(i + 1) == Some(&'_')
            && let Some(len) = double_underscore_wildcard_len(&chars[i..])
        {
            i += len;
            continue;
        }
        if chars[i] == '~' {
            let name_len = chars[i + 1..]
                .iter()
                .take_while(|c| is_wildcard_char(**c))
                .count();
            if name_len > 0 {
                i += 1 + name_len;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Length of a `__name__` token at the start of `chars`, if there is one.
fn double_underscore_wildcard_len(chars: &[char]) -> Option<usize> {
    let body = &chars[2..];
    let mut j = 0;
    while j + 1 < body.len() {
        if body[j] == '_' && body[j + 1] == '_' {
            return (j > 0).then_some(2 + j + 2);
        }
        if !is_wildcard_char(body[j]) {
            return None;
        }
        j += 1;
    }
    None
}

fn is_wildcard_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '/')
}

fn sanitize_token(token: &str) -> String {
    sanitize_prompt(token, false, MAX_PATH_LEN)
}

fn model_token(model: &str) -> String {
    let stem = match model.rsplit_once('.') {
        Some((stem, ext)) if MODEL_EXTENSIONS.contains(&ext.to_lowercase().as_str()) => stem,
        _ => model,
    };
    let sanitized = sanitize_token(stem);
    let truncated: String = sanitized.chars().take(MODEL_TOKEN_CHARS).collect();
    trim_edges(&truncated).to_string()
}

fn trim_edges(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, '_' | '.' | '-'))
}

fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn joined_len(parts: &[&str]) -> usize {
    let total: usize = parts.iter().map(|p| p.len()).sum();
    total + SEPARATOR.len() * parts.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }

    fn record() -> ImageMetadataRecord {
        ImageMetadataRecord {
            prompt: "a lighthouse at dusk".into(),
            seed: Some(3357757885),
            cfg_scale: Some(7.5),
            sampler: "k_euler".into(),
            model: "v1-5-pruned.ckpt".into(),
            ..ImageMetadataRecord::default()
        }
    }

    fn all_on() -> NamingOptions {
        NamingOptions {
            include_model: true,
            ..NamingOptions::default()
        }
    }

    // =========================================================================
    // build_filename
    // =========================================================================

    #[test]
    fn full_name_with_generous_budget() {
        let name = build_filename(&record(), &all_on(), 20, "07", "png", at(2024, 1, 31, 14, 25, 1));
        assert_eq!(
            name,
            "20240131-142501-07-a_lighthouse_at_dusk-3357757885-scale7.50-k_euler-v1-5-pruned.png"
        );
    }

    #[test]
    fn toggles_off_leave_timestamp_and_suffix() {
        let naming = NamingOptions {
            include_prompt: false,
            include_seed: false,
            include_scale: false,
            include_sampler: false,
            include_model: false,
            ..NamingOptions::default()
        };
        let name = build_filename(&record(), &naming, 20, "3", "png", at(2024, 1, 31, 14, 25, 1));
        assert_eq!(name, "20240131-142501-3.png");
    }

    #[test]
    fn no_timestamp_starts_with_suffix() {
        let naming = NamingOptions {
            timestamp: TimestampMode::None,
            include_prompt: false,
            ..NamingOptions::default()
        };
        let name = build_filename(&record(), &naming, 20, "12", "png", at(2024, 1, 1, 0, 0, 0));
        assert_eq!(name, "12-3357757885-scale7.50-k_euler.png");
    }

    #[test]
    fn unset_fields_produce_no_tokens() {
        let bare = ImageMetadataRecord {
            prompt: "a cat".into(),
            ..ImageMetadataRecord::default()
        };
        let name = build_filename(&bare, &all_on(), 20, "1", "png", at(2024, 1, 1, 0, 0, 0));
        assert_eq!(name, "20240101-000000-1-a_cat.png");
    }

    #[test]
    fn budget_never_exceeded_for_any_toggle_combination() {
        let long = ImageMetadataRecord {
            prompt: "an extremely detailed matte painting, ".repeat(20),
            seed: Some(i64::MAX),
            cfg_scale: Some(30.0),
            sampler: "k_dpmpp_2s_ancestral_karras_extended".into(),
            model: "stable-diffusion-v2-1-768-nonema-pruned.safetensors".into(),
            ..ImageMetadataRecord::default()
        };
        let modes = [
            TimestampMode::None,
            TimestampMode::Date,
            TimestampMode::DateTime,
            TimestampMode::UnixEpoch,
        ];

        for parent_len in [0, 40, 120, 200, 220] {
            for bits in 0u8..32 {
                for mode in modes {
                    let naming = NamingOptions {
                        timestamp: mode,
                        include_prompt: bits & 1 != 0,
                        include_seed: bits & 2 != 0,
                        include_scale: bits & 4 != 0,
                        include_sampler: bits & 8 != 0,
                        include_model: bits & 16 != 0,
                        ..NamingOptions::default()
                    };
                    let name =
                        build_filename(&long, &naming, parent_len, "0042", "png", at(2024, 6, 1, 12, 0, 0));
                    assert!(
                        parent_len + 1 + name.len() <= MAX_PATH_LEN,
                        "{parent_len} + {name:?} over budget"
                    );
                    assert!(name.ends_with(".png"));
                }
            }
        }
    }

    #[test]
    fn prompt_dropped_when_under_minimum() {
        let naming = NamingOptions {
            timestamp: TimestampMode::None,
            include_seed: false,
            include_scale: false,
            include_sampler: false,
            ..NamingOptions::default()
        };
        let rec = ImageMetadataRecord {
            prompt: "p".repeat(200),
            ..ImageMetadataRecord::default()
        };
        // stem "01" plus "-" plus 3 prompt bytes plus ".png" fills the path.
        let parent_len = MAX_PATH_LEN - 1 - (2 + 1 + 3 + 4);
        let name = build_filename(&rec, &naming, parent_len, "01", "png", at(2024, 1, 1, 0, 0, 0));
        assert_eq!(name, "01.png");

        // One more byte and the prompt fits at the minimum length.
        let name = build_filename(&rec, &naming, parent_len - 1, "01", "png", at(2024, 1, 1, 0, 0, 0));
        assert_eq!(name, "01-pppp.png");
    }

    #[test]
    fn prompt_trimmed_below_minimum_is_dropped() {
        let naming = NamingOptions {
            timestamp: TimestampMode::None,
            include_seed: false,
            include_scale: false,
            include_sampler: false,
            ..NamingOptions::default()
        };
        let rec = ImageMetadataRecord {
            prompt: "a b c d".into(),
            ..ImageMetadataRecord::default()
        };
        // 4 bytes for the prompt: "a_b_" loses its trailing "_" to edge trimming.
        let parent_len = MAX_PATH_LEN - 1 - (2 + 1 + 4 + 4);
        let name = build_filename(&rec, &naming, parent_len, "01", "png", at(2024, 1, 1, 0, 0, 0));
        assert_eq!(name, "01.png");
    }

    #[test]
    fn prompt_truncated_to_remaining_budget() {
        let naming = NamingOptions {
            timestamp: TimestampMode::None,
            include_seed: false,
            include_scale: false,
            include_sampler: false,
            ..NamingOptions::default()
        };
        let rec = ImageMetadataRecord {
            prompt: "abcdefghij".repeat(10),
            ..ImageMetadataRecord::default()
        };
        let parent_len = MAX_PATH_LEN - 1 - (2 + 1 + 8 + 4);
        let name = build_filename(&rec, &naming, parent_len, "01", "png", at(2024, 1, 1, 0, 0, 0));
        assert_eq!(name, "01-abcdefgh.png");
    }

    #[test]
    fn seed_outranks_prompt_for_budget() {
        let naming = NamingOptions {
            timestamp: TimestampMode::None,
            include_scale: false,
            include_sampler: false,
            ..NamingOptions::default()
        };
        let rec = ImageMetadataRecord {
            prompt: "a cat".into(),
            seed: Some(123456),
            ..ImageMetadataRecord::default()
        };
        // room for "01-123456" and nothing else
        let parent_len = MAX_PATH_LEN - 1 - (9 + 4);
        let name = build_filename(&rec, &naming, parent_len, "01", "png", at(2024, 1, 1, 0, 0, 0));
        assert_eq!(name, "01-123456.png");
    }

    #[test]
    fn model_falls_back_to_record_and_is_capped() {
        let rec = ImageMetadataRecord {
            model: "stable-diffusion-v2-1-768-nonema.safetensors".into(),
            ..ImageMetadataRecord::default()
        };
        let naming = NamingOptions {
            timestamp: TimestampMode::None,
            include_model: true,
            ..NamingOptions::default()
        };
        let name = build_filename(&rec, &naming, 10, "1", "png", at(2024, 1, 1, 0, 0, 0));
        assert_eq!(name, "1-stable-diffusion-v2.png");

        let naming = NamingOptions {
            model_name: "custom.ckpt".into(),
            ..naming
        };
        let name = build_filename(&rec, &naming, 10, "1", "png", at(2024, 1, 1, 0, 0, 0));
        assert_eq!(name, "1-custom.png");
    }

    #[test]
    fn dotted_model_id_keeps_its_version() {
        assert_eq!(model_token("stable-diffusion-1.5"), "stable-diffusion-1.5");
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    #[test]
    fn timestamp_modes() {
        let now = at(2023, 3, 9, 7, 5, 2);
        assert_eq!(timestamp_token(TimestampMode::None, now), "");
        assert_eq!(timestamp_token(TimestampMode::Date, now), "20230309");
        assert_eq!(timestamp_token(TimestampMode::DateTime, now), "20230309-070502");
        assert_eq!(timestamp_token(TimestampMode::UnixEpoch, now), now.timestamp().to_string());
    }

    #[test]
    fn suffix_padded_to_target_digits() {
        assert_eq!(suffix_token(7, 100), "007");
        assert_eq!(suffix_token(7, 9), "7");
        assert_eq!(suffix_token(12, 10), "12");
        assert_eq!(suffix_token(3, 0), "3");
    }

    // =========================================================================
    // Sanitizing
    // =========================================================================

    #[test]
    fn sanitize_drops_hostile_chars_and_collapses_whitespace() {
        assert_eq!(
            sanitize_prompt("  a cat:  on a <chair>, \"red\"?\t", false, 100),
            "a_cat_on_a_chair_red"
        );
    }

    #[test]
    fn sanitize_trims_edge_punctuation() {
        assert_eq!(sanitize_prompt("...--a cat--__", false, 100), "a_cat");
    }

    #[test]
    fn sanitize_truncates_on_char_boundary() {
        let s = sanitize_prompt("富士山 at dawn", false, 7);
        assert_eq!(s, "富士");
        assert!(s.len() <= 7);
    }

    #[test]
    fn wildcards_stripped() {
        assert_eq!(
            strip_wildcards("a __color__ cat by ~artist, __style/oil__"),
            "a cat by ,"
        );
        assert_eq!(strip_wildcards("snake_case__ stays"), "snake_case__ stays");
        assert_eq!(strip_wildcards("a ~ b"), "a ~ b");
    }

    #[test]
    fn wildcard_stripping_is_optional() {
        assert_eq!(sanitize_prompt("a __color__ cat", true, 100), "a_cat");
        assert_eq!(sanitize_prompt("a __color__ cat", false, 100), "a_color_cat");
    }

    // =========================================================================
    // prompt_dir_name
    // =========================================================================

    #[test]
    fn prompt_dir_within_budget() {
        let name = prompt_dir_name(&"word ".repeat(100), false, 150, at(2024, 1, 1, 0, 0, 0));
        assert!(name.len() <= MAX_PATH_LEN - 150 - 65);
        assert!(name.starts_with("word_word"));
    }

    #[test]
    fn blank_prompt_dir_uses_timestamp() {
        let now = at(2024, 1, 1, 0, 0, 0);
        assert_eq!(
            prompt_dir_name("  ", true, 10, now),
            format!("unknown_prompt_{}", now.timestamp_millis())
        );
    }
}
