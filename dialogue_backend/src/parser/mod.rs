//! Incremental parser for the tagged dialogue protocol.
//!
//! A model response looks roughly like
//!
//! ```text
//! <thinking>free-form reasoning</thinking>
//! <content>
//! <我和室友的私聊>
//! - 在吗
//! </我和室友的私聊>
//! </content>
//! ```
//!
//! [`DialogueStreamParser::push`] is fed the response chunk by chunk and
//! returns the events whose closing tags arrived with that chunk. The parser
//! never fails: malformed input is skipped or waits for more data.

pub mod envelope;
pub mod scanner;
pub mod thinking;

use serde::Serialize;

use crate::classify::{ClassifierRegistry, ClassifyContext};
use crate::config::{DialogueConfig, ParserSettings};
use crate::event::DialogueEvent;
use crate::text::{char_len_exceeds, truncate_front_chars};

pub use envelope::Wrapper;

/// Counters for one parser instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParserStats {
    /// Non-empty chunks accepted before the envelope ended.
    pub pushes: u64,
    pub events_emitted: u64,
    /// Characters discarded by buffer caps.
    pub dropped_chars: u64,
}

/// One parser per in-flight response. Create it fresh, feed it, drop it.
#[derive(Debug)]
pub struct DialogueStreamParser {
    user_name: String,
    settings: ParserSettings,
    registry: ClassifierRegistry,
    pre_buffer: String,
    content_buffer: String,
    wrapper: Option<Wrapper>,
    ended: bool,
    stats: ParserStats,
}

impl Default for DialogueStreamParser {
    fn default() -> Self {
        Self::new("me")
    }
}

impl DialogueStreamParser {
    /// Parser with default settings and the standard classifiers.
    pub fn new(user_name: impl Into<String>) -> Self {
        let config = DialogueConfig::default();
        Self::with_registry(
            user_name,
            config.parser.clone(),
            ClassifierRegistry::standard(&config),
        )
    }

    pub fn from_config(config: &DialogueConfig) -> Self {
        Self::with_registry(
            config.user_name.clone(),
            config.parser.clone(),
            ClassifierRegistry::standard(config),
        )
    }

    pub fn with_registry(
        user_name: impl Into<String>,
        settings: ParserSettings,
        registry: ClassifierRegistry,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            settings,
            registry,
            pre_buffer: String::new(),
            content_buffer: String::new(),
            wrapper: None,
            ended: false,
            stats: ParserStats::default(),
        }
    }

    /// Feed one chunk and return the events it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<DialogueEvent> {
        if self.ended || chunk.is_empty() {
            return Vec::new();
        }
        self.stats.pushes += 1;

        let wrapper = match self.wrapper {
            Some(wrapper) => {
                self.content_buffer.push_str(chunk);
                wrapper
            }
            None => match self.enter_content(chunk) {
                Some(wrapper) => wrapper,
                None => return Vec::new(),
            },
        };

        let end = wrapper.find_end(&self.content_buffer);
        let work = match end {
            Some(idx) => &self.content_buffer[..idx],
            None => self.content_buffer.as_str(),
        };
        let ctx = ClassifyContext {
            user_name: &self.user_name,
        };
        let outcome = scanner::scan(work, &self.registry, &ctx);

        if end.is_some() {
            tracing::debug!(
                "Reached end of {} envelope after {} events",
                wrapper.as_str(),
                self.stats.events_emitted + outcome.events.len() as u64
            );
            self.ended = true;
            self.content_buffer = String::new();
        } else {
            self.content_buffer.replace_range(..outcome.consumed, "");
            self.bound_content_buffer();
        }

        self.stats.events_emitted += outcome.events.len() as u64;
        outcome.events
    }

    /// End-of-stream hook. Currently always empty; callers should still call
    /// it once when the stream is drained.
    pub fn flush(&mut self) -> Vec<DialogueEvent> {
        Vec::new()
    }

    /// Back to the state of a freshly constructed parser.
    pub fn reset(&mut self) {
        self.pre_buffer.clear();
        self.content_buffer.clear();
        self.wrapper = None;
        self.ended = false;
        self.stats = ParserStats::default();
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn wrapper(&self) -> Option<Wrapper> {
        self.wrapper
    }

    pub fn is_in_content(&self) -> bool {
        self.wrapper.is_some()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Characters waiting in the pre-content buffer.
    pub fn pre_buffer_len(&self) -> usize {
        self.pre_buffer.chars().count()
    }

    /// Characters waiting in the in-content buffer.
    pub fn content_buffer_len(&self) -> usize {
        self.content_buffer.chars().count()
    }

    /// Append to the pre-content buffer and look for the envelope. On success
    /// the content that followed the opening marker is moved to the content
    /// buffer.
    fn enter_content(&mut self, chunk: &str) -> Option<Wrapper> {
        self.pre_buffer.push_str(chunk);
        if thinking::may_contain_thinking(&self.pre_buffer) {
            self.pre_buffer = thinking::strip_closed_thinking_blocks(&self.pre_buffer);
        }

        let Some(start) = envelope::detect(&self.pre_buffer, &self.settings) else {
            self.bound_pre_buffer();
            return None;
        };

        tracing::debug!(
            "Entered content mode via {} wrapper",
            start.wrapper.as_str()
        );
        self.content_buffer
            .push_str(&self.pre_buffer[start.content_start..]);
        self.pre_buffer = String::new();
        self.wrapper = Some(start.wrapper);
        Some(start.wrapper)
    }

    fn bound_pre_buffer(&mut self) {
        let cap = self.settings.pre_buffer_cap;
        if char_len_exceeds(&self.pre_buffer, cap) {
            let dropped = truncate_front_chars(&mut self.pre_buffer, self.settings.pre_keep());
            self.stats.dropped_chars += dropped as u64;
            tracing::warn!(
                "Pre-content buffer exceeded {} chars; dropped {} oldest chars",
                cap,
                dropped
            );
        }
    }

    fn bound_content_buffer(&mut self) {
        let cap = self.settings.content_buffer_cap;
        if char_len_exceeds(&self.content_buffer, cap) {
            let dropped =
                truncate_front_chars(&mut self.content_buffer, self.settings.content_keep());
            self.stats.dropped_chars += dropped as u64;
            tracing::warn!(
                "Content buffer exceeded {} chars; dropped {} oldest chars",
                cap,
                dropped
            );
        }
    }
}
