use regex_lite::Regex;
use std::sync::OnceLock;

use crate::config::ParserSettings;
use crate::text::{cached_regex, find_ignore_ascii_case};

/// Which envelope put the parser into content mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrapper {
    /// `<content …>` … `</content>`
    Content,
    /// `MiPhone_start` … `MiPhone_end`, bare or in angle brackets
    MiPhone,
    /// Protocol tags seen without any wrapper; never ends on its own.
    Implicit,
}

impl Wrapper {
    pub fn as_str(self) -> &'static str {
        match self {
            Wrapper::Content => "content",
            Wrapper::MiPhone => "miphone",
            Wrapper::Implicit => "implicit",
        }
    }

    /// Byte offset where the envelope closes inside `content`, if it does.
    pub fn find_end(self, content: &str) -> Option<usize> {
        match self {
            Wrapper::Content => find_ignore_ascii_case(content, "</content>", 0),
            Wrapper::MiPhone => {
                static END: OnceLock<Option<Regex>> = OnceLock::new();
                cached_regex(&END, r"(?i)<\s*MiPhone_end\s*>|MiPhone_end")
                    .and_then(|re| re.find(content))
                    .map(|m| m.start())
            }
            Wrapper::Implicit => None,
        }
    }
}

/// Where content starts inside the pre-content buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeStart {
    pub wrapper: Wrapper,
    /// Byte offset of the first content byte.
    pub content_start: usize,
}

/// Find the opening envelope in the (thinking-stripped) pre-content buffer.
///
/// The opener that starts earliest wins, with `<content>` taking ties. Every
/// opener is a complete match, so a streamed buffer commits to the same
/// wrapper whichever way the response was chunked.
pub fn detect(pre: &str, settings: &ParserSettings) -> Option<EnvelopeStart> {
    static CONTENT: OnceLock<Option<Regex>> = OnceLock::new();
    static MIPHONE: OnceLock<Option<Regex>> = OnceLock::new();

    let mut best: Option<(usize, EnvelopeStart)> = None;
    let mut offer = |at: usize, start: EnvelopeStart| {
        if best.map_or(true, |(best_at, _)| at < best_at) {
            best = Some((at, start));
        }
    };

    if let Some(m) = cached_regex(&CONTENT, r"(?i)<content\b[^>]*>").and_then(|re| re.find(pre)) {
        offer(
            m.start(),
            EnvelopeStart {
                wrapper: Wrapper::Content,
                content_start: m.end(),
            },
        );
    }

    if settings.miphone_wrapper {
        if let Some(m) = cached_regex(&MIPHONE, r"(?i)<\s*MiPhone_start\s*>|MiPhone_start")
            .and_then(|re| re.find(pre))
        {
            offer(
                m.start(),
                EnvelopeStart {
                    wrapper: Wrapper::MiPhone,
                    content_start: m.end(),
                },
            );
        }
    }

    if settings.implicit_content {
        if let Some(at) = implicit_signal_at(pre) {
            offer(
                at,
                EnvelopeStart {
                    wrapper: Wrapper::Implicit,
                    content_start: 0,
                },
            );
        }
    }

    best.map(|(_, start)| start)
}

/// Protocol syntax that shows the model skipped the wrapper.
pub fn has_implicit_signal(text: &str) -> bool {
    implicit_signal_at(text).is_some()
}

/// Byte offset of the earliest implicit-content signal.
pub fn implicit_signal_at(text: &str) -> Option<usize> {
    static PRIVATE_OPEN: OnceLock<Option<Regex>> = OnceLock::new();
    static GROUP_OPEN: OnceLock<Option<Regex>> = OnceLock::new();

    let markers = ["moment_start", "moment_reply_start"]
        .into_iter()
        .filter_map(|marker| find_ignore_ascii_case(text, marker, 0));
    let private = cached_regex(&PRIVATE_OPEN, r"<\s*[^/][^>]*的私聊\s*>")
        .and_then(|re| re.find(text))
        .map(|m| m.start());
    let group = cached_regex(&GROUP_OPEN, r"<\s*群聊\s*:")
        .and_then(|re| re.find(text))
        .map(|m| m.start());

    markers.chain(private).chain(group).min()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(implicit: bool) -> ParserSettings {
        ParserSettings {
            implicit_content: implicit,
            ..Default::default()
        }
    }

    #[test]
    fn content_tag_with_attributes_any_case() {
        let pre = "intro <CONTENT lang=\"zh\">body";
        let start = detect(pre, &settings(false)).unwrap();
        assert_eq!(start.wrapper, Wrapper::Content);
        assert_eq!(&pre[start.content_start..], "body");
    }

    #[test]
    fn incomplete_or_lookalike_tags_do_not_match() {
        assert!(detect("<content", &settings(false)).is_none());
        assert!(detect("<contents>", &settings(false)).is_none());
    }

    #[test]
    fn earliest_opener_wins() {
        let start = detect("MiPhone_start <content>x", &settings(false)).unwrap();
        assert_eq!(start.wrapper, Wrapper::MiPhone);

        let start = detect("<content>MiPhone_start x", &settings(false)).unwrap();
        assert_eq!(start.wrapper, Wrapper::Content);

        let start = detect("<我和室友的私聊>- a</我和室友的私聊><content>", &settings(true)).unwrap();
        assert_eq!(start.wrapper, Wrapper::Implicit);

        let start = detect("<content><我和室友的私聊>", &settings(true)).unwrap();
        assert_eq!(start.wrapper, Wrapper::Content);
    }

    #[test]
    fn miphone_bare_and_bracketed() {
        let pre = "<MiPhone_start>rest";
        let start = detect(pre, &settings(false)).unwrap();
        assert_eq!(start.wrapper, Wrapper::MiPhone);
        assert_eq!(&pre[start.content_start..], "rest");

        let pre = "miphone_start\nrest";
        let start = detect(pre, &settings(false)).unwrap();
        assert_eq!(&pre[start.content_start..], "\nrest");

        let off = ParserSettings {
            miphone_wrapper: false,
            ..Default::default()
        };
        assert!(detect("MiPhone_start", &off).is_none());
    }

    #[test]
    fn implicit_signals_are_opt_in() {
        let pre = "<我和室友的私聊>\n- hi";
        assert!(detect(pre, &settings(false)).is_none());
        let start = detect(pre, &settings(true)).unwrap();
        assert_eq!(start.wrapper, Wrapper::Implicit);
        assert_eq!(start.content_start, 0);

        assert!(has_implicit_signal("MOMENT_START"));
        assert!(has_implicit_signal("< 群聊 : 宿舍>"));
        assert!(!has_implicit_signal("</我和室友的私聊>"));
        assert_eq!(implicit_signal_at("ab <群聊:宿舍> moment_start"), Some(3));
    }

    #[test]
    fn envelope_ends() {
        assert_eq!(Wrapper::Content.find_end("ab</Content>"), Some(2));
        assert_eq!(Wrapper::MiPhone.find_end("ab<MiPhone_end>"), Some(2));
        assert_eq!(Wrapper::MiPhone.find_end("abMIPHONE_END"), Some(2));
        assert_eq!(Wrapper::Implicit.find_end("</content>"), None);
    }
}
