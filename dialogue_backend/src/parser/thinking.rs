use regex_lite::Regex;
use std::sync::OnceLock;

use crate::text::{cached_regex, rfind_ignore_ascii_case};

/// Remove every complete `<thinking …>…</thinking>` and `<think …>…</think>`
/// span (any case). An opened block that is not yet closed is left in place
/// so its closing tag can still match once more input arrives.
pub fn strip_closed_thinking_blocks(text: &str) -> String {
    static CLOSED: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached_regex(
        &CLOSED,
        r"(?is)<thinking\b[^>]*>.*?</thinking>|<think\b[^>]*>.*?</think>",
    ) else {
        return text.to_string();
    };
    re.replace_all(text, "").into_owned()
}

/// Quick check so the stripper only runs when a block could be present.
pub fn may_contain_thinking(text: &str) -> bool {
    rfind_ignore_ascii_case(text, "</think").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_blocks_are_removed() {
        assert_eq!(
            strip_closed_thinking_blocks("a<thinking>x <content> y</thinking>b<THINK>z</think>c"),
            "abc"
        );
    }

    #[test]
    fn attributes_on_the_open_tag() {
        assert_eq!(
            strip_closed_thinking_blocks("<thinking mode=\"deep\">\nplan\n</thinking>rest"),
            "rest"
        );
    }

    #[test]
    fn open_block_is_kept() {
        let text = "<thinking>still going <content>";
        assert_eq!(strip_closed_thinking_blocks(text), text);
    }

    #[test]
    fn think_prefix_does_not_swallow_thinking() {
        assert_eq!(
            strip_closed_thinking_blocks("<thinking>a</think>b</thinking>c"),
            "c"
        );
    }

    #[test]
    fn precheck_sees_both_closers() {
        assert!(may_contain_thinking("x</THINKING>"));
        assert!(may_contain_thinking("x</think>"));
        assert!(!may_contain_thinking("<thinking>open"));
    }
}
