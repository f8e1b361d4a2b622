//! Prompt text conventions shared by the metadata formats.
//!
//! Older InvokeAI builds had no separate negative-prompt field. The negative
//! prompt was appended to the positive one in square brackets:
//!
//! ```text
//! a cat sitting on a chair [blurry, lowres]
//! ```
//!
//! [`split_negative_prompt`] undoes that, [`combine_prompt`] rebuilds it.
//!
//! The split only fires when the bracket pair is unambiguous: the prompt ends
//! with `]`, contains ` [`, and has exactly one `[` and one `]`. A prompt that
//! genuinely ends with a single bracketed aside is split as well. That false
//! positive matches what these files have always been read as, so it stays.

/// Split a bracketed trailing negative prompt off `prompt`.
///
/// Returns `(prompt, negative)`. When the bracket convention does not apply
/// the prompt comes back unchanged with an empty negative prompt.
pub fn split_negative_prompt(prompt: &str) -> (String, String) {
    let opens = prompt.matches('[').count();
    let closes = prompt.matches(']').count();

    if !prompt.ends_with(']') || opens != 1 || closes != 1 {
        return (prompt.to_string(), String::new());
    }

    match prompt.rsplit_once(" [") {
        Some((positive, rest)) => {
            let negative = rest.trim_end_matches(']');
            (positive.to_string(), negative.to_string())
        }
        None => (prompt.to_string(), String::new()),
    }
}

/// Join a prompt and negative prompt back into the bracket convention.
pub fn combine_prompt(prompt: &str, negative: &str) -> String {
    if negative.trim().is_empty() {
        prompt.to_string()
    } else {
        format!("{prompt} [{negative}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_single_trailing_bracket_pair() {
        let (p, n) = split_negative_prompt("a cat [blurry]");
        assert_eq!(p, "a cat");
        assert_eq!(n, "blurry");
    }

    #[test]
    fn keeps_commas_inside_negative() {
        let (p, n) = split_negative_prompt("portrait, oil painting [lowres, jpeg artifacts]");
        assert_eq!(p, "portrait, oil painting");
        assert_eq!(n, "lowres, jpeg artifacts");
    }

    #[test]
    fn two_bracket_pairs_are_left_alone() {
        let prompt = "a [red] cat [blurry]";
        let (p, n) = split_negative_prompt(prompt);
        assert_eq!(p, prompt);
        assert_eq!(n, "");
    }

    #[test]
    fn bracket_not_at_end_is_left_alone() {
        let prompt = "a [red] cat";
        let (p, n) = split_negative_prompt(prompt);
        assert_eq!(p, prompt);
        assert_eq!(n, "");
    }

    #[test]
    fn bracket_without_leading_space_is_left_alone() {
        let prompt = "a cat[blurry]";
        let (p, n) = split_negative_prompt(prompt);
        assert_eq!(p, prompt);
        assert_eq!(n, "");
    }

    #[test]
    fn trailing_aside_is_split_too() {
        // Known false positive, kept for compatibility.
        let (p, n) = split_negative_prompt("castle at dusk [concept art]");
        assert_eq!(p, "castle at dusk");
        assert_eq!(n, "concept art");
    }

    #[test]
    fn combine_round_trips_split() {
        let (p, n) = split_negative_prompt("a cat [blurry]");
        assert_eq!(combine_prompt(&p, &n), "a cat [blurry]");
    }

    #[test]
    fn combine_without_negative_is_plain_prompt() {
        assert_eq!(combine_prompt("a cat", ""), "a cat");
        assert_eq!(combine_prompt("a cat", "   "), "a cat");
    }
}
