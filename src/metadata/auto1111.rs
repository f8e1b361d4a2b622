//! Automatic1111 `parameters` text blocks.
//!
//! ```text
//! a cat sitting on a chair
//! Negative prompt: blurry, lowres
//! Steps: 20, Sampler: Euler a, CFG scale: 7, Seed: 1234, Size: 512x768, Model: v1-5
//! ```
//!
//! The prompt runs until the negative-prompt line or the settings line,
//! whichever comes first. The settings line is the last line after the
//! first that carries any known `Key: ` pair. Pairs that are absent leave
//! their field unset. Without a settings line the prompt and negative
//! prompt are still kept on the record, which is then unparseable.

use super::{Draft, Resolution};

const NEGATIVE_PREFIX: &str = "Negative prompt:";

/// Keys whose presence marks a line as the settings line.
const SETTINGS_KEYS: &[&str] = &["Steps: ", "Sampler: ", "CFG scale: ", "Seed: ", "Size: "];

pub(super) fn parse(payload: &str, draft: &mut Draft) -> Result<(), String> {
    let lines: Vec<&str> = payload.lines().collect();

    let settings_idx = lines
        .iter()
        .enumerate()
        .skip(1)
        .rev()
        .find(|(_, l)| is_settings_line(l))
        .map(|(idx, _)| idx);
    let text_end = settings_idx.unwrap_or(lines.len());

    let negative_idx = lines[..text_end]
        .iter()
        .position(|l| l.trim_start().starts_with(NEGATIVE_PREFIX));

    let prompt_end = negative_idx.unwrap_or(text_end);
    draft.record.prompt = lines[..prompt_end].join("\n").trim().to_string();

    if let Some(idx) = negative_idx {
        let negative = lines[idx..text_end].join("\n");
        draft.record.negative_prompt = negative
            .trim_start()
            .trim_start_matches(NEGATIVE_PREFIX)
            .trim()
            .to_string();
    }

    let settings_idx = settings_idx.ok_or("no settings line")?;
    for pair in lines[settings_idx].split(", ") {
        let Some((key, value)) = pair.split_once(": ") else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Steps" => draft.record.steps = draft.number("steps", value),
            "Size" => draft.record.resolution = parse_size(value, draft),
            "CFG scale" => draft.record.cfg_scale = draft.number("cfg scale", value),
            "Sampler" => draft.record.sampler = value.replace(' ', "_"),
            "Seed" => draft.record.seed = draft.number("seed", value),
            "Model" => draft.record.model = value.to_string(),
            "Denoising strength" => {
                draft.record.init_strength = draft.number("denoising strength", value)
            }
            _ => {}
        }
    }

    Ok(())
}

fn is_settings_line(line: &str) -> bool {
    let line = line.trim_start();
    !line.starts_with(NEGATIVE_PREFIX)
        && SETTINGS_KEYS
            .iter()
            .any(|key| line.starts_with(key) || line.contains(&format!(", {key}")))
}

fn parse_size(value: &str, draft: &mut Draft) -> Option<Resolution> {
    let Some((w, h)) = value.split_once('x') else {
        draft.warn(format!("size: expected WxH, got {value:?}"));
        return None;
    };
    let width = draft.number("width", w)?;
    let height = draft.number("height", h)?;
    Some(Resolution { width, height })
}
