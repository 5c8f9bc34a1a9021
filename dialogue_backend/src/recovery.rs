//! One-shot recovery for responses that produced no events.

use crate::classify::ClassifierRegistry;
use crate::config::DialogueConfig;
use crate::event::DialogueEvent;
use crate::parser::DialogueStreamParser;
use crate::text::rfind_ignore_ascii_case;

/// Text after the last `</thinking>` or `</think>` marker, or `None` when the
/// response has neither.
pub fn strip_through_last_thinking_close(raw: &str) -> Option<&str> {
    let thinking = rfind_ignore_ascii_case(raw, "</thinking>").map(|i| i + "</thinking>".len());
    let think = rfind_ignore_ascii_case(raw, "</think>").map(|i| i + "</think>".len());
    let cut = thinking.into_iter().chain(think).max()?;
    Some(&raw[cut..])
}

/// Re-parse `raw` with everything up to the last thinking close removed.
///
/// This covers a thinking block that stayed open during streaming and echoed
/// a whole `<content>…</content>` envelope, which ended the stream early. Returns
/// no events when the response has no closing thinking marker.
pub fn fallback_reparse(
    raw: &str,
    config: &DialogueConfig,
    registry: &ClassifierRegistry,
) -> Vec<DialogueEvent> {
    let Some(rest) = strip_through_last_thinking_close(raw) else {
        return Vec::new();
    };

    let mut parser = DialogueStreamParser::with_registry(
        config.user_name.clone(),
        config.parser.clone(),
        registry.clone(),
    );
    let mut events = parser.push(rest);
    events.extend(parser.flush());
    tracing::debug!(
        "Fallback reparse of {} chars yielded {} events",
        rest.chars().count(),
        events.len()
    );
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DialogueConfig {
        DialogueConfig {
            user_name: "我".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn strips_through_the_last_marker_of_either_kind() {
        assert_eq!(strip_through_last_thinking_close("a</think>b</THINKING>c"), Some("c"));
        assert_eq!(strip_through_last_thinking_close("a</thinking>b</think>c"), Some("c"));
        assert_eq!(strip_through_last_thinking_close("no markers"), None);
    }

    #[test]
    fn recovers_content_hidden_by_an_unbalanced_thinking_block() {
        let config = config();
        let registry = ClassifierRegistry::standard(&config);
        let raw = "<thinking>format is <content>...</content>\n</think>\n<content>\n<我和室友的私聊>\n- 到了\n</我和室友的私聊>\n</content>";

        let mut streaming = DialogueStreamParser::from_config(&config);
        assert!(streaming.push(raw).is_empty());

        let events = fallback_reparse(raw, &config, &registry);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].item_count(), 1);
    }

    #[test]
    fn nothing_to_recover_without_a_marker() {
        let config = config();
        let registry = ClassifierRegistry::standard(&config);
        assert!(fallback_reparse("<content><我和室友的私聊>- x</我和室友的私聊></content>", &config, &registry).is_empty());
    }
}
