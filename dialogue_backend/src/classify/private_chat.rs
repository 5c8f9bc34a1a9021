use regex_lite::Regex;
use std::sync::OnceLock;

use super::{ClassifyContext, TagClassifier};
use crate::event::DialogueEvent;
use crate::text::{cached_regex, normalize_newlines, replace_line_breaks};

pub const PRIVATE_CHAT_SUFFIX: &str = "的私聊";

/// `<{user}和{other}的私聊>` tags.
pub struct PrivateChatClassifier;

impl TagClassifier for PrivateChatClassifier {
    fn name(&self) -> &str {
        "private_chat"
    }

    fn matches(&self, tag_name: &str) -> bool {
        tag_name.ends_with(PRIVATE_CHAT_SUFFIX)
    }

    fn classify(
        &self,
        tag_name: &str,
        body: &str,
        ctx: &ClassifyContext<'_>,
    ) -> Option<DialogueEvent> {
        private_chat_event(tag_name, extract_other_name(tag_name, ctx.user_name), body)
    }
}

/// Build a private-chat event, or `None` when the body has no messages.
pub(crate) fn private_chat_event(
    tag_name: &str,
    other_name: Option<String>,
    body: &str,
) -> Option<DialogueEvent> {
    let messages = parse_private_chat_messages(body);
    if messages.is_empty() {
        return None;
    }
    Some(DialogueEvent::PrivateChat {
        tag_name: tag_name.to_string(),
        other_name,
        messages,
    })
}

/// The other participant named by a private-chat tag.
///
/// `{user}和{other}的私聊` yields `other`; with an empty user name a leading
/// `和` is the prefix. Without the user prefix the core is
/// split on `和` and the last part is used, but only when there are at least
/// two parts; a single name is ambiguous and yields `None`.
pub fn extract_other_name(tag_name: &str, user_name: &str) -> Option<String> {
    let core = tag_name.trim().strip_suffix(PRIVATE_CHAT_SUFFIX)?;

    if let Some(rest) = core.strip_prefix(&format!("{}和", user_name.trim())) {
        let rest = rest.trim();
        return (!rest.is_empty()).then(|| rest.to_string());
    }

    let parts: Vec<&str> = core
        .split('和')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() >= 2 {
        parts.last().map(|p| p.to_string())
    } else {
        None
    }
}

/// Split a private-chat body into messages, one per line.
///
/// Lines are read as a bullet (`- `, `• `, `* `), as `speaker--content--HH:MM`
/// (only the content is kept), or verbatim.
pub fn parse_private_chat_messages(body: &str) -> Vec<String> {
    static BULLET: OnceLock<Option<Regex>> = OnceLock::new();
    static DASH_TIME: OnceLock<Option<Regex>> = OnceLock::new();
    let bullet = cached_regex(&BULLET, r"^[-•*]\s+");
    let dash_time = cached_regex(&DASH_TIME, r"^(.+?)--(.+?)--(\d{1,2}:\d{2})\s*$");

    let text = normalize_newlines(body);
    let mut messages = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let raw = if let Some(m) = bullet.and_then(|re| re.find(line)) {
            &line[m.end()..]
        } else if let Some(caps) = dash_time.and_then(|re| re.captures(line)) {
            caps.get(2).map(|m| m.as_str()).unwrap_or_default()
        } else {
            line
        };

        let cleaned = replace_line_breaks(raw.trim(), "\n");
        let cleaned = cleaned.trim();
        if !cleaned.is_empty() {
            messages.push(cleaned.to_string());
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bullet_and_dash_time_lines() {
        assert_eq!(
            parse_private_chat_messages("- 你好\n室友--在吗--14:05"),
            vec!["你好", "在吗"]
        );
    }

    #[test]
    fn dash_time_content_may_contain_separators() {
        assert_eq!(
            parse_private_chat_messages("室友--a--b--9:30"),
            vec!["a--b"]
        );
    }

    #[test]
    fn other_lines_are_kept_verbatim() {
        assert_eq!(
            parse_private_chat_messages("\r\n  hello there \r\n\r\n• 第二条\n*not a bullet"),
            vec!["hello there", "第二条", "*not a bullet"]
        );
    }

    #[test]
    fn line_breaks_become_newlines() {
        assert_eq!(parse_private_chat_messages("- a<br>b"), vec!["a\nb"]);
    }

    #[test]
    fn blank_bodies_have_no_messages() {
        assert!(parse_private_chat_messages(" \n\t\n").is_empty());
        assert!(parse_private_chat_messages("- <br>").is_empty());
    }

    #[test]
    fn name_from_user_prefix() {
        assert_eq!(extract_other_name("我和室友的私聊", "我").as_deref(), Some("室友"));
        assert_eq!(
            extract_other_name("我和Lara croft的私聊", "我").as_deref(),
            Some("Lara croft")
        );
    }

    #[test]
    fn name_from_last_segment_without_prefix() {
        assert_eq!(extract_other_name("小明和小红的私聊", "我").as_deref(), Some("小红"));
        assert_eq!(extract_other_name("室友的私聊", "我"), None);
        assert_eq!(extract_other_name("我和的私聊", "我"), None);
        assert_eq!(extract_other_name("聊天", "我"), None);
    }

    #[test]
    fn empty_user_name_still_strips_the_joiner() {
        assert_eq!(extract_other_name("和室友的私聊", "").as_deref(), Some("室友"));
        assert_eq!(extract_other_name("和室友的私聊", "  ").as_deref(), Some("室友"));
        assert_eq!(extract_other_name("小明和小红的私聊", "").as_deref(), Some("小红"));
        assert_eq!(extract_other_name("室友的私聊", ""), None);
    }

    #[test]
    fn empty_body_produces_no_event() {
        let ctx = ClassifyContext { user_name: "我" };
        assert!(PrivateChatClassifier
            .classify("我和室友的私聊", "\n\n", &ctx)
            .is_none());
    }
}
