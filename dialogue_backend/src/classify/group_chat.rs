use regex_lite::Regex;
use std::sync::OnceLock;

use super::{ClassifyContext, TagClassifier};
use crate::event::{DialogueEvent, GroupMessage};
use crate::text::{cached_regex, normalize_newlines};

/// Stand-in for `<br>` while a transcript is split into lines.
const BR_MARK: char = '\u{0b}';

const SYSTEM_SPEAKER: &str = "系统消息";

/// `<群聊:name>` tags.
pub struct GroupChatClassifier;

impl TagClassifier for GroupChatClassifier {
    fn name(&self) -> &str {
        "group_chat"
    }

    fn matches(&self, tag_name: &str) -> bool {
        extract_group_name(tag_name).is_some()
    }

    fn classify(
        &self,
        tag_name: &str,
        body: &str,
        _ctx: &ClassifyContext<'_>,
    ) -> Option<DialogueEvent> {
        let group_name = extract_group_name(tag_name)?;
        if group_name.is_empty() {
            return None;
        }
        group_chat_event(tag_name, group_name, body)
    }
}

pub(crate) fn group_chat_event(
    tag_name: &str,
    group_name: String,
    body: &str,
) -> Option<DialogueEvent> {
    let block = parse_group_chat_block(body);
    if block.messages.is_empty() {
        return None;
    }
    Some(DialogueEvent::GroupChat {
        tag_name: tag_name.to_string(),
        group_name,
        members: block.members,
        messages: block.messages,
    })
}

/// Group name of a `群聊:name` tag, or `None` for other tags. The name may be
/// empty when the tag is `群聊:` alone.
pub fn extract_group_name(tag_name: &str) -> Option<String> {
    let rest = tag_name.trim().strip_prefix("群聊")?;
    let rest = rest.trim_start().strip_prefix(':')?;
    Some(rest.trim().to_string())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupChatBlock {
    pub members: Vec<String>,
    pub messages: Vec<GroupMessage>,
}

/// Parse the body of a group chat tag.
///
/// The body may carry `<成员>` and `<聊天内容>` sections. The transcript is read
/// as `speaker--content--HH:MM` segments first (several may share one line or
/// one segment may span lines); if none are found each line is parsed on its
/// own.
pub fn parse_group_chat_block(body: &str) -> GroupChatBlock {
    static MEMBERS: OnceLock<Option<Regex>> = OnceLock::new();
    static TRANSCRIPT: OnceLock<Option<Regex>> = OnceLock::new();

    let members = section(&MEMBERS, r"(?is)<\s*成员\s*>(.*?)<\s*/\s*成员\s*>", body)
        .map(|raw| {
            raw.split([',', '，'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let transcript = section(
        &TRANSCRIPT,
        r"(?is)<\s*聊天内容\s*>(.*?)<\s*/\s*聊天内容\s*>",
        body,
    )
    .filter(|s| !s.is_empty())
    .unwrap_or(body);

    let marked = mark_line_breaks(&rewrite_system_lines(&normalize_newlines(transcript)));

    let mut messages = parse_timed_segments(&marked);
    if messages.is_empty() {
        messages = parse_lines(&marked);
    }

    GroupChatBlock { members, messages }
}

fn section<'a>(
    cell: &'static OnceLock<Option<Regex>>,
    pattern: &str,
    body: &'a str,
) -> Option<&'a str> {
    let re = cached_regex(cell, pattern)?;
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// `系统消息: text` becomes `系统消息--text` so it parses like any speaker line.
fn rewrite_system_lines(text: &str) -> String {
    static SYSTEM: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached_regex(&SYSTEM, r"(?m)^[ \t]*系统消息[:：][ \t]*(.*)$") else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &regex_lite::Captures<'_>| {
        let content = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if content.is_empty() {
            caps.get(0)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        } else {
            format!("{}--{}", SYSTEM_SPEAKER, content)
        }
    })
    .into_owned()
}

fn mark_line_breaks(text: &str) -> String {
    static ESCAPED: OnceLock<Option<Regex>> = OnceLock::new();
    static RAW: OnceLock<Option<Regex>> = OnceLock::new();
    let mark = BR_MARK.to_string();
    let mut out = text.to_string();
    if let Some(re) = cached_regex(&ESCAPED, r"(?i)&lt;br\s*/?&gt;") {
        out = re.replace_all(&out, mark.as_str()).into_owned();
    }
    if let Some(re) = cached_regex(&RAW, r"(?i)<br\s*/?>") {
        out = re.replace_all(&out, mark.as_str()).into_owned();
    }
    out
}

fn unmark(text: &str) -> String {
    text.trim().replace(BR_MARK, "\n").trim().to_string()
}

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\n', BR_MARK])
        .map(str::trim)
        .filter(|l| !l.is_empty())
}

fn ends_with_time(line: &str) -> bool {
    static TIME_SUFFIX: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&TIME_SUFFIX, r"--\s*\d{1,2}:\d{2}\s*$").is_some_and(|re| re.is_match(line))
}

fn message(speaker: &str, content: &str, time: &str) -> Option<GroupMessage> {
    let speaker = speaker.trim();
    let content = unmark(content);
    if speaker.is_empty() || content.is_empty() {
        return None;
    }
    Some(GroupMessage {
        speaker: speaker.to_string(),
        content,
        time: time.trim().to_string(),
    })
}

/// Split `a--x--b--y` into `(a, x)`, `(b, y)`. With an odd part count the
/// speaker keeps the rest of the line, separators included, as content.
pub fn split_speaker_segments(line: &str) -> Vec<(String, String)> {
    if !line.contains("--") {
        return Vec::new();
    }
    let parts: Vec<&str> = line
        .split("--")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 {
        return Vec::new();
    }
    if parts.len() == 2 {
        return vec![(parts[0].to_string(), parts[1].to_string())];
    }

    let mut segments = Vec::new();
    let mut i = 0;
    while i + 1 < parts.len() {
        let speaker = parts[i];
        if (parts.len() - i) % 2 == 1 {
            let content = parts[i + 1..].join("--");
            segments.push((speaker.to_string(), content.trim().to_string()));
            break;
        }
        segments.push((speaker.to_string(), parts[i + 1].to_string()));
        i += 2;
    }
    segments
}

/// Every line must hold a speaker segment, and there must be two or more lines.
fn split_multi_line_segments(text: &str) -> Vec<(String, String)> {
    let text = text.trim();
    if !text.contains("--") {
        return Vec::new();
    }
    let lines: Vec<&str> = split_lines(text).collect();
    if lines.len() < 2 || lines.iter().any(|l| !l.contains("--")) {
        return Vec::new();
    }

    let mut segments = Vec::new();
    for line in lines {
        let line_segments = split_speaker_segments(line);
        if line_segments.is_empty() {
            return Vec::new();
        }
        segments.extend(line_segments);
    }
    segments
}

/// A line without a time suffix: speaker segments, else `speaker--rest`.
fn parse_untimed_line(line: &str, out: &mut Vec<GroupMessage>) {
    if !ends_with_time(line) {
        let segments = split_speaker_segments(line);
        if !segments.is_empty() {
            out.extend(segments.iter().filter_map(|(s, c)| message(s, c, "")));
            return;
        }
    }
    let parts: Vec<&str> = line
        .split("--")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() >= 2 {
        out.extend(message(parts[0], &parts[1..].join("--"), ""));
    }
}

fn parse_timed_segments(text: &str) -> Vec<GroupMessage> {
    static TIME: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(time_re) = cached_regex(&TIME, r"--\s*(\d{1,2}:\d{2})\s*") else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    let mut idx = 0;
    while idx < text.len() {
        let Some(found) = time_re.find_at(text, idx) else {
            break;
        };
        let segment = text[idx..found.end()].trim();
        idx = found.end();
        while let Some(c) = text[idx..].chars().next() {
            if c.is_whitespace() || c == BR_MARK {
                idx += c.len_utf8();
            } else {
                break;
            }
        }

        let Some(last_sep) = segment.rfind("--") else {
            continue;
        };
        let time = segment[last_sep + 2..].trim();
        let pre = segment[..last_sep].trim();

        let multi = split_multi_line_segments(pre);
        if !multi.is_empty() {
            let last = multi.len() - 1;
            for (i, (speaker, content)) in multi.iter().enumerate() {
                let time = if i == last { time } else { "" };
                messages.extend(message(speaker, content, time));
            }
            continue;
        }

        let Some(first_sep) = pre.find("--") else {
            continue;
        };
        messages.extend(message(&pre[..first_sep], &pre[first_sep + 2..], time));
    }

    if !messages.is_empty() && idx < text.len() {
        for line in split_lines(&text[idx..]) {
            parse_untimed_line(line, &mut messages);
        }
    }

    messages
}

fn parse_lines(text: &str) -> Vec<GroupMessage> {
    static DASH_TIME: OnceLock<Option<Regex>> = OnceLock::new();
    let dash_time = cached_regex(&DASH_TIME, r"^(.+?)--(.+?)--(\d{1,2}:\d{2})\s*$");

    let mut messages = Vec::new();
    for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(caps) = dash_time.and_then(|re| re.captures(line)) {
            let group = |i| caps.get(i).map(|m| m.as_str()).unwrap_or_default();
            messages.extend(message(group(1), group(2), group(3)));
            continue;
        }
        parse_untimed_line(line, &mut messages);
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(speaker: &str, content: &str, time: &str) -> GroupMessage {
        GroupMessage {
            speaker: speaker.to_string(),
            content: content.to_string(),
            time: time.to_string(),
        }
    }

    #[test]
    fn group_name_from_tag() {
        assert_eq!(extract_group_name("群聊:宿舍").as_deref(), Some("宿舍"));
        assert_eq!(extract_group_name(" 群聊 : 宿舍 二 ").as_deref(), Some("宿舍 二"));
        assert_eq!(extract_group_name("群聊:").as_deref(), Some(""));
        assert_eq!(extract_group_name("群聊：宿舍"), None);
        assert_eq!(extract_group_name("我和室友的私聊"), None);
    }

    #[test]
    fn members_and_transcript_sections() {
        let block = parse_group_chat_block(
            "<成员>小明, 小红，小刚</成员>\n<聊天内容>\n小明--今晚吃什么--18:01\n小红--火锅--18:02\n</聊天内容>",
        );
        assert_eq!(block.members, vec!["小明", "小红", "小刚"]);
        assert_eq!(
            block.messages,
            vec![msg("小明", "今晚吃什么", "18:01"), msg("小红", "火锅", "18:02")]
        );
    }

    #[test]
    fn several_timed_segments_on_one_line() {
        let block = parse_group_chat_block("A--hi--9:00 B--yo--9:01");
        assert_eq!(block.messages, vec![msg("A", "hi", "9:00"), msg("B", "yo", "9:01")]);
    }

    #[test]
    fn untimed_tail_after_timed_segments() {
        let block = parse_group_chat_block("A--hi--9:00\nB--还没吃\nC--a--D--b");
        assert_eq!(
            block.messages,
            vec![
                msg("A", "hi", "9:00"),
                msg("B", "还没吃", ""),
                msg("C", "a", ""),
                msg("D", "b", ""),
            ]
        );
    }

    #[test]
    fn multi_line_run_takes_time_on_last_message() {
        let block = parse_group_chat_block("A--one\nB--two--10:30");
        assert_eq!(block.messages, vec![msg("A", "one", ""), msg("B", "two", "10:30")]);
    }

    #[test]
    fn system_lines_and_line_breaks() {
        let block = parse_group_chat_block("系统消息：小明加入了群聊\nA--第一行<br>第二行");
        assert_eq!(
            block.messages,
            vec![msg("系统消息", "小明加入了群聊", ""), msg("A", "第一行\n第二行", "")]
        );
    }

    #[test]
    fn lines_without_separators_are_dropped() {
        assert!(parse_group_chat_block("just prose").messages.is_empty());
    }

    #[test]
    fn speaker_segments_with_odd_parts() {
        assert_eq!(
            split_speaker_segments("A--x--B--y"),
            vec![
                ("A".to_string(), "x".to_string()),
                ("B".to_string(), "y".to_string())
            ]
        );
        assert_eq!(
            split_speaker_segments("A--x--B--y--z"),
            vec![("A".to_string(), "x--B--y--z".to_string())]
        );
        assert!(split_speaker_segments("no separators").is_empty());
    }

    #[test]
    fn classifier_requires_name_and_messages() {
        let ctx = ClassifyContext { user_name: "我" };
        assert!(GroupChatClassifier.classify("群聊:", "A--hi--9:00", &ctx).is_none());
        assert!(GroupChatClassifier.classify("群聊:宿舍", "prose", &ctx).is_none());

        let event = GroupChatClassifier
            .classify("群聊:宿舍", "A--hi--9:00", &ctx)
            .unwrap();
        assert_eq!(event.kind(), "group_chat");
        assert_eq!(event.item_count(), 1);
    }
}
