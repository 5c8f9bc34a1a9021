//! Small text helpers shared by the parser and the classifiers.

use regex_lite::Regex;
use std::sync::OnceLock;

/// Compile `pattern` once and cache it in `cell`.
///
/// Patterns are static, so a compile failure is a programming error; it is
/// logged and the caller treats the pattern as never matching.
pub(crate) fn cached_regex(
    cell: &'static OnceLock<Option<Regex>>,
    pattern: &str,
) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!("Invalid built-in pattern {:?}: {}", pattern, e);
            None
        }
    })
    .as_ref()
}

pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Replace `<br>`, `<br/>` and `<br />` (any case) with `replacement`.
pub fn replace_line_breaks(text: &str, replacement: &str) -> String {
    static BR: OnceLock<Option<Regex>> = OnceLock::new();
    match cached_regex(&BR, r"(?i)<br\s*/?>") {
        Some(re) => re.replace_all(text, replacement).into_owned(),
        None => text.to_string(),
    }
}

/// Byte offset of the first ASCII-case-insensitive occurrence of `needle`
/// at or after `from`. `needle` must be ASCII.
pub fn find_ignore_ascii_case(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || from > hay.len() || hay.len() - from < needle.len() {
        return None;
    }
    (from..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Byte offset of the last ASCII-case-insensitive occurrence of `needle`.
pub fn rfind_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    (0..=hay.len() - needle.len())
        .rev()
        .find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Keep at most `keep` trailing characters of `buf`.
///
/// Returns the number of characters dropped. The cut always lands on a char
/// boundary.
pub fn truncate_front_chars(buf: &mut String, keep: usize) -> usize {
    let total = buf.chars().count();
    if total <= keep {
        return 0;
    }
    let drop = total - keep;
    let cut = buf
        .char_indices()
        .nth(drop)
        .map(|(idx, _)| idx)
        .unwrap_or(buf.len());
    buf.replace_range(..cut, "");
    drop
}

/// Character count, skipping the walk when the byte length already fits.
pub fn char_len_exceeds(buf: &str, cap: usize) -> bool {
    buf.len() > cap && buf.chars().count() > cap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newlines_are_normalized() {
        assert_eq!(normalize_newlines("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn line_breaks_in_all_spellings() {
        assert_eq!(replace_line_breaks("a<br>b<BR/>c<br />d", "\n"), "a\nb\nc\nd");
    }

    #[test]
    fn case_insensitive_search_returns_byte_offsets() {
        let hay = "私聊</CONTENT>";
        let idx = find_ignore_ascii_case(hay, "</content>", 0).unwrap();
        assert_eq!(&hay[idx..], "</CONTENT>");
        assert_eq!(find_ignore_ascii_case(hay, "</content>", idx + 1), None);
        assert_eq!(rfind_ignore_ascii_case("x</think>y</THINK>z", "</think>"), Some(10));
    }

    #[test]
    fn truncation_keeps_tail_on_char_boundary() {
        let mut buf = "你好世界abc".to_string();
        let dropped = truncate_front_chars(&mut buf, 4);
        assert_eq!(dropped, 3);
        assert_eq!(buf, "界abc");

        let mut short = "ab".to_string();
        assert_eq!(truncate_front_chars(&mut short, 10), 0);
        assert_eq!(short, "ab");
    }

    #[test]
    fn char_cap_counts_characters_not_bytes() {
        assert!(!char_len_exceeds("你好", 2));
        assert!(char_len_exceeds("你好!", 2));
    }
}
