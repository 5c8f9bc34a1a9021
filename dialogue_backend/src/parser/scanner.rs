//! Tag scanning over the in-content buffer.
//!
//! The scanner only ever consumes a tag once its closing marker is present in
//! the buffer, so a tag split across pushes is picked up whole on a later call
//! and never emitted twice.

use crate::classify::{ClassifierRegistry, ClassifyContext};
use crate::event::DialogueEvent;
use crate::text::find_ignore_ascii_case;

const VOID_TAGS: [&str; 6] = ["br", "img", "hr", "input", "meta", "link"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenTag<'a> {
    /// Trimmed text between `<` and `>`, without the `/` markers.
    pub name: &'a str,
    pub closing: bool,
    pub self_closing: bool,
    /// Byte offset just past `>`.
    pub end: usize,
}

impl<'a> OpenTag<'a> {
    /// A `<content …>` tag. Inside another envelope it only marks where the
    /// content starts, so it is stepped over instead of waiting for a close.
    pub fn is_envelope(&self) -> bool {
        self.name
            .split_whitespace()
            .next()
            .is_some_and(|word| word.eq_ignore_ascii_case("content"))
    }

    /// Text before the first whitespace, when it differs from the full name.
    fn short_name(&self) -> Option<&'a str> {
        let short = self.name.split_whitespace().next()?;
        (short != self.name).then_some(short)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagParse<'a> {
    Tag(OpenTag<'a>),
    /// Not a tag; the `<` is plain text.
    Literal,
    /// No `>` yet.
    Incomplete,
}

/// Parse the tag starting at the `<` at byte offset `lt`.
pub fn parse_open_tag(s: &str, lt: usize) -> TagParse<'_> {
    let bytes = s.as_bytes();
    let Some(rel) = bytes[lt + 1..].iter().position(|&b| b == b'>' || b == b'<') else {
        return TagParse::Incomplete;
    };
    let gt = lt + 1 + rel;
    if bytes[gt] == b'<' {
        return TagParse::Literal;
    }

    let raw = s[lt + 1..gt].trim();
    if raw.is_empty() {
        return TagParse::Literal;
    }

    let closing = raw.starts_with('/');
    let mut core = if closing { raw[1..].trim() } else { raw };
    let mut self_closing = raw.ends_with('/');
    if let Some(stripped) = core.strip_suffix('/') {
        core = stripped.trim();
        self_closing = true;
    }
    if !self_closing {
        self_closing = VOID_TAGS.iter().any(|void| {
            core.eq_ignore_ascii_case(void)
                || (core.len() > void.len()
                    && core.as_bytes()[void.len()] == b' '
                    && core.as_bytes()[..void.len()].eq_ignore_ascii_case(void.as_bytes()))
        });
    }

    TagParse::Tag(OpenTag {
        name: core,
        closing,
        self_closing,
        end: gt + 1,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseSearch<'a> {
    Found {
        /// The name the closing tag used: the full open-tag name or its first word.
        name: &'a str,
        close_start: usize,
        after_close: usize,
    },
    /// The close tag has not arrived (or is still partial).
    Pending,
}

/// Find `</name>` for `open`, starting at byte offset `from`. Names compare
/// after trimming and are case-sensitive.
pub fn find_matching_close<'a>(s: &str, open: &OpenTag<'a>, from: usize) -> CloseSearch<'a> {
    let full = open.name;
    let short = open.short_name();
    let mut idx = from;

    while idx < s.len() {
        let Some(rel) = s[idx..].find("</") else {
            return CloseSearch::Pending;
        };
        let close_start = idx + rel;
        match parse_open_tag(s, close_start) {
            TagParse::Incomplete => return CloseSearch::Pending,
            TagParse::Literal => idx = close_start + 2,
            TagParse::Tag(close) => {
                if close.closing {
                    if close.name == full {
                        return CloseSearch::Found {
                            name: full,
                            close_start,
                            after_close: close.end,
                        };
                    }
                    if let Some(short) = short.filter(|short| close.name == *short) {
                        return CloseSearch::Found {
                            name: short,
                            close_start,
                            after_close: close.end,
                        };
                    }
                }
                idx = close.end;
            }
        }
    }

    CloseSearch::Pending
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Tag { at: usize },
    Marker { index: usize, at: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Unsearched,
    At(usize),
    Absent,
}

impl Cursor {
    /// Reuse the remembered hit while it is still ahead of `from`.
    fn seek(&mut self, from: usize, search: impl FnOnce() -> Option<usize>) -> Option<usize> {
        match *self {
            Cursor::At(at) if at >= from => Some(at),
            Cursor::Absent => None,
            _ => {
                let found = search();
                *self = found.map_or(Cursor::Absent, Cursor::At);
                found
            }
        }
    }
}

/// Finds the earliest `<` or marker start in one buffer.
///
/// Each delimiter remembers where it was last found, so a full scan reads
/// every byte a bounded number of times. Calls must use the same text and a
/// non-decreasing `from`.
#[derive(Debug)]
pub struct TokenFinder<'r> {
    registry: &'r ClassifierRegistry,
    tag: Cursor,
    markers: Vec<Cursor>,
}

impl<'r> TokenFinder<'r> {
    pub fn new(registry: &'r ClassifierRegistry) -> Self {
        Self {
            registry,
            tag: Cursor::Unsearched,
            markers: vec![Cursor::Unsearched; registry.markers().len()],
        }
    }

    /// The earliest `<` or marker start at or after `from`. Ties go to the tag.
    pub fn next(&mut self, s: &str, from: usize) -> Option<Token> {
        let mut best = self
            .tag
            .seek(from, || s[from..].find('<').map(|rel| from + rel))
            .map(|at| Token::Tag { at });

        let registry = self.registry;
        for (index, marker) in registry.markers().iter().enumerate() {
            let Some(at) = self.markers[index].seek(from, || {
                find_ignore_ascii_case(s, marker.start_marker(), from)
            }) else {
                continue;
            };
            let earlier = match best {
                Some(Token::Tag { at: best_at }) | Some(Token::Marker { at: best_at, .. }) => {
                    at < best_at
                }
                None => true,
            };
            if earlier {
                best = Some(Token::Marker { index, at });
            }
        }

        best
    }
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub events: Vec<DialogueEvent>,
    /// Bytes of the input that are fully handled and may be discarded.
    pub consumed: usize,
}

/// Emit events for every complete tag or marker block in `work`.
///
/// Scanning stops at the first construct that is not yet complete; everything
/// before it is reported as consumed.
pub fn scan(work: &str, registry: &ClassifierRegistry, ctx: &ClassifyContext<'_>) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    let mut finder = TokenFinder::new(registry);
    let mut pos = 0;

    while let Some(token) = finder.next(work, pos) {
        match token {
            Token::Marker { index, at } => {
                let marker = &registry.markers()[index];
                let body_start = at + marker.start_marker().len();
                let Some(end) = find_ignore_ascii_case(work, marker.end_marker(), body_start)
                else {
                    break;
                };
                if let Some(event) = marker.classify(&work[body_start..end], ctx) {
                    outcome.events.push(event);
                } else {
                    tracing::trace!("Consumed {} block without an event", marker.name());
                }
                pos = end + marker.end_marker().len();
            }
            Token::Tag { at } => match parse_open_tag(work, at) {
                TagParse::Incomplete => break,
                TagParse::Literal => pos = at + 1,
                TagParse::Tag(tag) if tag.closing || tag.self_closing || tag.is_envelope() => {
                    pos = tag.end
                }
                TagParse::Tag(tag) => match find_matching_close(work, &tag, tag.end) {
                    CloseSearch::Pending => break,
                    CloseSearch::Found {
                        name,
                        close_start,
                        after_close,
                    } => {
                        let body = &work[tag.end..close_start];
                        outcome.events.extend(registry.classify_tag(name, body, ctx));
                        pos = after_close;
                    }
                },
            },
        }
    }

    outcome.consumed = pos;
    outcome
}
