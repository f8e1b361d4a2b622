//! NMKD `Nmkdiffusers` flat JSON dictionaries.
//!
//! A single-level object with a fixed key vocabulary. Values are usually
//! strings even when numeric, but plain JSON numbers are accepted too.
//! Unknown keys are ignored.

use super::{Draft, Resolution};
use serde_json::{Map, Value};

pub(super) fn parse(payload: &str, draft: &mut Draft) -> Result<(), String> {
    let map: Map<String, Value> =
        serde_json::from_str(payload.trim()).map_err(|e| format!("invalid JSON object: {e}"))?;

    for (key, value) in &map {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Null => continue,
            other => {
                draft.warn(format!("{key}: unexpected value {other}"));
                continue;
            }
        };

        match key.as_str() {
            "prompt" => draft.record.prompt = text,
            "promptNeg" => draft.record.negative_prompt = text,
            "initImg" => draft.record.init_image_path = Some(text).filter(|s| !s.is_empty()),
            "initStrength" => draft.record.init_strength = draft.number("initStrength", &text),
            "steps" => draft.record.steps = draft.number("steps", &text),
            "seed" => draft.record.seed = draft.number("seed", &text),
            "scaleTxt" => draft.record.cfg_scale = draft.number("scaleTxt", &text),
            "scaleImg" => draft.record.img_scale = draft.number("scaleImg", &text),
            "sampler" => draft.record.sampler = text,
            "model" => draft.record.model = text,
            "w" => {
                if let Some(width) = draft.number("w", &text) {
                    draft.record.set_width(width);
                }
            }
            "h" => {
                if let Some(height) = draft.number("h", &text) {
                    draft.record.set_height(height);
                }
            }
            _ => {}
        }
    }

    if let Some(Resolution { width: 0, .. } | Resolution { height: 0, .. }) = draft.record.resolution
    {
        draft.warn("resolution: only one dimension present");
    }

    Ok(())
}
