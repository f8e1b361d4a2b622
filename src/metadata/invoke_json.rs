//! InvokeAI 2.x `sd-metadata` JSON.
//!
//! ```json
//! {
//!   "model_id": "stable-diffusion-1.5",
//!   "app_id": "invoke-ai/InvokeAI",
//!   "image": {
//!     "prompt": [{ "prompt": "a cat [blurry]", "weight": 1.0 }],
//!     "steps": 50, "width": 512, "height": 512, "cfg_scale": 7.5,
//!     "sampler": "k_lms", "seed": 3357757885, "strength": 0.75
//!   }
//! }
//! ```
//!
//! Fields are pulled out of a `serde_json::Value` one at a time so a single
//! field of the wrong type only costs that field. `strength` is stored as
//! the amount of noise, the inverse of what the UI calls strength.

use super::{Draft, FaceTool};
use serde_json::Value;

pub(super) fn parse(payload: &str, draft: &mut Draft) -> Result<(), String> {
    let doc: Value =
        serde_json::from_str(payload.trim()).map_err(|e| format!("invalid JSON: {e}"))?;

    let image = doc
        .get("image")
        .filter(|v| v.is_object())
        .ok_or("missing \"image\" object")?;

    match image.get("prompt") {
        Some(Value::Array(fragments)) => match first_fragment(fragments) {
            Some(text) => draft.record.set_prompt_with_negative(text),
            None => draft.warn("prompt: empty fragment list"),
        },
        Some(Value::String(text)) => draft.record.set_prompt_with_negative(text),
        Some(_) => draft.warn("prompt: unexpected type"),
        None => draft.warn("prompt: missing"),
    }

    if let Some(steps) = u32_field(image, "steps", draft) {
        draft.record.steps = Some(steps);
    }
    if let Some(width) = u32_field(image, "width", draft) {
        draft.record.set_width(width);
    }
    if let Some(height) = u32_field(image, "height", draft) {
        draft.record.set_height(height);
    }
    if let Some(scale) = f32_field(image, "cfg_scale", draft) {
        draft.record.cfg_scale = Some(scale);
    }
    if let Some(sampler) = str_field(image, "sampler", draft) {
        draft.record.sampler = sampler.to_string();
    }
    if let Some(seed) = image.get("seed") {
        match seed.as_i64() {
            Some(seed) => draft.record.seed = Some(seed),
            None => draft.warn(format!("seed: unexpected value {seed}")),
        }
    }
    if let Some(stored) = f32_field(image, "strength", draft) {
        draft.record.init_strength = Some(1.0 - stored);
    }
    if let Some(path) = str_field(image, "init_image_path", draft) {
        draft.record.init_image_path = Some(path.to_string());
    }
    if let Some(tool) = str_field(image, "facetool", draft) {
        draft.record.face_tool = FaceTool::from_name(tool);
    }
    if let Some(seamless) = image.get("seamless").and_then(Value::as_bool) {
        draft.record.seamless = seamless;
    }
    if let Some(model) = doc.get("model_id").and_then(Value::as_str) {
        draft.record.model = model.to_string();
    }

    Ok(())
}

fn first_fragment(fragments: &[Value]) -> Option<&str> {
    let first = fragments.first()?;
    first
        .get("prompt")
        .and_then(Value::as_str)
        .or_else(|| first.as_str())
}

fn u32_field(obj: &Value, key: &str, draft: &mut Draft) -> Option<u32> {
    let value = obj.get(key)?;
    match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
        Some(v) => Some(v),
        None => {
            draft.warn(format!("{key}: unexpected value {value}"));
            None
        }
    }
}

fn f32_field(obj: &Value, key: &str, draft: &mut Draft) -> Option<f32> {
    let value = obj.get(key)?;
    match value.as_f64() {
        Some(v) => Some(v as f32),
        None => {
            draft.warn(format!("{key}: unexpected value {value}"));
            None
        }
    }
}

fn str_field<'a>(obj: &'a Value, key: &str, draft: &mut Draft) -> Option<&'a str> {
    let value = obj.get(key)?;
    if value.is_null() {
        return None;
    }
    match value.as_str() {
        Some(v) => Some(v),
        None => {
            draft.warn(format!("{key}: unexpected value {value}"));
            None
        }
    }
}
