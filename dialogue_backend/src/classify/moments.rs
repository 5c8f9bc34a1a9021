use super::{ClassifyContext, MarkerClassifier};
use crate::event::{DialogueEvent, Moment, MomentComment};
use crate::text::normalize_newlines;

/// `moment_start … moment_end` blocks: new posts on the social feed.
pub struct MomentsClassifier;

impl MarkerClassifier for MomentsClassifier {
    fn name(&self) -> &str {
        "moments"
    }

    fn start_marker(&self) -> &str {
        "moment_start"
    }

    fn end_marker(&self) -> &str {
        "moment_end"
    }

    fn classify(&self, body: &str, _ctx: &ClassifyContext<'_>) -> Option<DialogueEvent> {
        let moments = parse_moment_block(body);
        if moments.is_empty() {
            return None;
        }
        Some(DialogueEvent::Moments { moments })
    }
}

/// `moment_reply_start … moment_reply_end` blocks: comments on an existing post.
pub struct MomentReplyClassifier;

impl MarkerClassifier for MomentReplyClassifier {
    fn name(&self) -> &str {
        "moment_reply"
    }

    fn start_marker(&self) -> &str {
        "moment_reply_start"
    }

    fn end_marker(&self) -> &str {
        "moment_reply_end"
    }

    fn classify(&self, body: &str, _ctx: &ClassifyContext<'_>) -> Option<DialogueEvent> {
        let (moment_id, comments) = parse_moment_reply_block(body);
        if comments.is_empty() {
            return None;
        }
        Some(DialogueEvent::MomentReply {
            moment_id,
            comments,
        })
    }
}

fn is_numeric(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let (int, frac) = match digits.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (digits, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(int) && frac.map_or(true, all_digits)
}

fn parse_count(value: &str) -> i64 {
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|v| v as i64))
        .unwrap_or(0)
}

/// `H:MM`, `HH:MM` or `HH:MM:SS`.
fn looks_like_time(value: &str) -> bool {
    let mut fields = value.split(':');
    let Some(hours) = fields.next() else {
        return false;
    };
    let rest: Vec<&str> = fields.collect();
    let digits = |s: &str, min: usize, max: usize| {
        (min..=max).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
    };
    digits(hours, 1, 2) && matches!(rest.len(), 1 | 2) && rest.iter().all(|f| digits(*f, 2, 2))
}

/// Value of a `key::value` segment, with the key matched ASCII-case-insensitively.
fn keyed<'a>(segment: &'a str, key: &str) -> Option<&'a str> {
    let (name, value) = segment.split_once("::")?;
    if !name.trim().eq_ignore_ascii_case(key) {
        return None;
    }
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Read `author--part--part…` into a comment. With `detect_time` the first
/// bare `HH:MM` part becomes the comment time instead of content.
fn parse_comment(parts: &[&str], detect_time: bool) -> MomentComment {
    let mut comment = MomentComment {
        author: parts.first().map(|s| s.to_string()).unwrap_or_default(),
        ..Default::default()
    };
    let mut content = Vec::new();

    for segment in parts.iter().skip(1) {
        if let Some(v) = keyed(segment, "reply_to") {
            comment.reply_to = v.to_string();
        } else if let Some(v) = keyed(segment, "reply_to_author") {
            comment.reply_to_author = v.to_string();
        } else if detect_time && comment.time.is_empty() && looks_like_time(segment) {
            comment.time = segment.to_string();
        } else if detect_time && segment.is_empty() {
            continue;
        } else {
            content.push(*segment);
        }
    }

    comment.content = content.join("--").trim().to_string();
    comment
}

/// Parse a moments block.
///
/// A line `author--content--time--views--likes` (numeric views and likes)
/// starts a post; following lines with at least two `--` parts are its
/// comments.
pub fn parse_moment_block(body: &str) -> Vec<Moment> {
    let text = normalize_newlines(body);
    let mut moments = Vec::new();
    let mut current: Option<Moment> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let parts: Vec<&str> = line.split("--").map(str::trim).collect();
        if parts.len() >= 5 && is_numeric(parts[3]) && is_numeric(parts[4]) {
            moments.extend(current.take());
            let (author, content, time) = (parts[0], parts[1], parts[2]);
            current = Some(Moment {
                author: author.to_string(),
                content: content.to_string(),
                time: time.to_string(),
                views: parse_count(parts[3]),
                likes: parse_count(parts[4]),
                comments: Vec::new(),
                signature: format!("{}\u{0}{}\u{0}{}", author, content, time),
            });
            continue;
        }

        if parts.len() >= 2 {
            if let Some(moment) = current.as_mut() {
                let comment = parse_comment(&parts, true);
                if !comment.content.is_empty() {
                    moment.comments.push(comment);
                }
            }
        }
    }

    moments.extend(current);
    moments
}

/// Parse a moment reply block into its target id (empty when absent) and
/// comments.
pub fn parse_moment_reply_block(body: &str) -> (String, Vec<MomentComment>) {
    let text = normalize_newlines(body);
    let mut moment_id = String::new();
    let mut comments = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(id) = keyed(line, "moment_id") {
            moment_id = id.to_string();
            continue;
        }
        let parts: Vec<&str> = line.split("--").map(str::trim).collect();
        if parts.len() >= 2 {
            comments.push(parse_comment(&parts, false));
        }
    }

    (moment_id, comments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posts_with_comments() {
        let moments = parse_moment_block(
            "\n小明--今天好累--21:30--120--8\n小红--抱抱--reply_to::小明--21:35\n路人\n小刚--周末去爬山--22:00--50--3\n",
        );

        assert_eq!(moments.len(), 2);
        let first = &moments[0];
        assert_eq!(first.author, "小明");
        assert_eq!(first.views, 120);
        assert_eq!(first.likes, 8);
        assert_eq!(first.signature, "小明\u{0}今天好累\u{0}21:30");
        assert_eq!(first.comments.len(), 1);
        assert_eq!(first.comments[0].content, "抱抱");
        assert_eq!(first.comments[0].reply_to, "小明");
        assert_eq!(first.comments[0].time, "21:35");

        assert_eq!(moments[1].author, "小刚");
        assert!(moments[1].comments.is_empty());
    }

    #[test]
    fn header_needs_numeric_counts() {
        assert!(parse_moment_block("a--b--c--many--8").is_empty());
        assert_eq!(parse_moment_block("a--b--c--1.5--8")[0].views, 1);
    }

    #[test]
    fn comments_before_any_post_are_ignored() {
        assert!(parse_moment_block("小红--抱抱").is_empty());
    }

    #[test]
    fn reply_block_with_target() {
        let (id, comments) = parse_moment_reply_block(
            "moment_id:: m-42\n小红--同意--reply_to_author::小明\n没有分隔符的行",
        );
        assert_eq!(id, "m-42");
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author, "小红");
        assert_eq!(comments[0].content, "同意");
        assert_eq!(comments[0].reply_to_author, "小明");
    }

    #[test]
    fn reply_classifier_needs_comments() {
        let ctx = ClassifyContext { user_name: "我" };
        assert!(MomentReplyClassifier.classify("moment_id::x", &ctx).is_none());
        let event = MomentReplyClassifier.classify("A--nice", &ctx).unwrap();
        match event {
            DialogueEvent::MomentReply { moment_id, comments } => {
                assert!(moment_id.is_empty());
                assert_eq!(comments[0].content, "nice");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn time_shapes() {
        assert!(looks_like_time("9:05"));
        assert!(looks_like_time("21:30:59"));
        assert!(!looks_like_time("2130"));
        assert!(!looks_like_time("123:30"));
    }
}
