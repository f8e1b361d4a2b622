//! Legacy InvokeAI "dream" strings.
//!
//! A single line in the style of the old `dream>` CLI:
//!
//! ```text
//! "a cat [blurry]" -s 50 -S 3357757885 -W 512 -H 512 -C 7.5 -A k_lms
//! a cat -s50 -S3357757885 -W512 -H512 -C7.5 -Ak_lms
//! ```
//!
//! The prompt is either quoted or runs up to the first ` -`. Early builds
//! glued flag and value together (`-s50`); later ones put a space between
//! them. The spaced layout is recognised by the presence of both `-W ` and
//! `-H `, which every spaced string carries.

use super::{Draft, FaceTool};

pub(super) fn parse(payload: &str, draft: &mut Draft) -> Result<(), String> {
    let info = payload.trim();
    if info.is_empty() {
        return Err("empty dream string".into());
    }

    let (prompt, params) = if info.starts_with('"') {
        let parts: Vec<&str> = info.split('"').collect();
        if parts.len() < 3 {
            return Err("unterminated quoted prompt".into());
        }
        (parts[1].trim(), parts[2])
    } else {
        match info.find(" -") {
            Some(idx) => (&info[..idx], &info[idx..]),
            None => (info, ""),
        }
    };
    draft.record.set_prompt_with_negative(prompt);

    let spaced = info.contains("-W ") && info.contains("-H ");
    for token in tokenize(params, spaced) {
        apply_flag(&token, draft);
    }

    Ok(())
}

/// Split the flag section into `-k value` tokens.
fn tokenize(params: &str, spaced: bool) -> Vec<String> {
    let params = format!(" {params}");

    let tokens: Vec<String> = if spaced {
        params
            .split(" -")
            .map(|t| format!("-{}", t.trim()))
            .collect()
    } else {
        params.split(' ').map(|t| t.trim().to_string()).collect()
    };

    tokens
        .into_iter()
        .filter(|t| t.len() >= 3)
        .map(|t| {
            if spaced || t.starts_with("--") || !t.is_char_boundary(2) {
                t
            } else {
                format!("{} {}", &t[..2], &t[2..])
            }
        })
        .collect()
}

fn apply_flag(token: &str, draft: &mut Draft) {
    let (key, value) = match token.split_once(char::is_whitespace) {
        Some((key, value)) => (key, value.trim()),
        None => (token, ""),
    };
    let key = key.trim_start_matches('-');

    match key {
        "s" => {
            if let Some(steps) = draft.number("steps", value) {
                draft.record.steps = Some(steps);
            }
        }
        "b" => {
            if let Some(batch) = draft.number::<u32>("batch size", value) {
                draft.record.batch_size = batch.max(1);
            }
        }
        "W" => {
            if let Some(width) = draft.number("width", value) {
                draft.record.set_width(width);
            }
        }
        "H" => {
            if let Some(height) = draft.number("height", value) {
                draft.record.set_height(height);
            }
        }
        "C" => {
            if let Some(scale) = draft.number("cfg scale", value) {
                draft.record.cfg_scale = Some(scale);
            }
        }
        "A" => draft.record.sampler = value.to_string(),
        "S" => {
            if let Some(seed) = draft.number("seed", value) {
                draft.record.seed = Some(seed);
            }
        }
        "f" => {
            if let Some(stored) = draft.number::<f32>("strength", value) {
                draft.record.init_strength = Some(1.0 - stored);
            }
        }
        "I" => draft.record.init_image_path = Some(value.to_string()),
        "seamless" => draft.record.seamless = true,
        "ft" => match FaceTool::from_name(value) {
            Some(tool) => draft.record.face_tool = Some(tool),
            None => draft.warn(format!("face tool: unknown {value:?}")),
        },
        _ => {}
    }
}
