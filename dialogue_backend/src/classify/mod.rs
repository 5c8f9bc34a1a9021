//! Tag classification.
//!
//! The scanner hands every fully closed tag to a [`ClassifierRegistry`], which
//! asks its classifiers in registration order. The first classifier whose
//! predicate accepts the tag name owns the tag; its `None` means the tag is
//! consumed without an event. Plain-text blocks delimited by start/end markers
//! (the social feed) go through [`MarkerClassifier`]s instead.

pub mod group_chat;
pub mod loose;
pub mod moments;
pub mod private_chat;

use std::sync::Arc;

use crate::config::DialogueConfig;
use crate::event::DialogueEvent;

pub use group_chat::GroupChatClassifier;
pub use loose::{LooseTagClassifier, StaticDirectory};
pub use moments::{MomentReplyClassifier, MomentsClassifier};
pub use private_chat::PrivateChatClassifier;

/// Per-parser values classifiers may need.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    pub user_name: &'a str,
}

/// A classifier for `<name>body</name>` tags.
pub trait TagClassifier: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    fn matches(&self, tag_name: &str) -> bool;

    fn classify(
        &self,
        tag_name: &str,
        body: &str,
        ctx: &ClassifyContext<'_>,
    ) -> Option<DialogueEvent>;
}

/// A classifier for plain-text blocks such as `moment_start … moment_end`.
///
/// Markers are matched ASCII-case-insensitively and must be ASCII.
pub trait MarkerClassifier: Send + Sync {
    fn name(&self) -> &str;

    fn start_marker(&self) -> &str;

    fn end_marker(&self) -> &str;

    fn classify(&self, body: &str, ctx: &ClassifyContext<'_>) -> Option<DialogueEvent>;
}

/// Resolves bare tag names to known groups or contacts.
pub trait ContactDirectory: Send + Sync {
    fn resolve_group(&self, tag_name: &str) -> Option<String>;

    fn resolve_contact(&self, tag_name: &str) -> Option<String>;
}

#[derive(Clone, Default)]
pub struct ClassifierRegistry {
    tags: Vec<Arc<dyn TagClassifier>>,
    markers: Vec<Arc<dyn MarkerClassifier>>,
}

impl ClassifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in classifiers, as enabled by `config`.
    pub fn standard(config: &DialogueConfig) -> Self {
        let mut registry = Self::new();
        registry.register_tag(Arc::new(PrivateChatClassifier));
        if config.parser.group_chat {
            registry.register_tag(Arc::new(GroupChatClassifier));
        }
        if !config.known_contacts.is_empty() || !config.known_groups.is_empty() {
            let directory = StaticDirectory::new(
                config.known_contacts.clone(),
                config.known_groups.clone(),
            );
            registry.register_tag(Arc::new(LooseTagClassifier::new(Arc::new(directory))));
        }
        if config.parser.moments {
            registry.register_marker(Arc::new(MomentsClassifier));
            registry.register_marker(Arc::new(MomentReplyClassifier));
        }
        registry
    }

    /// Append a tag classifier. Earlier registrations win.
    pub fn register_tag(&mut self, classifier: Arc<dyn TagClassifier>) {
        tracing::debug!("Registered tag classifier: {}", classifier.name());
        self.tags.push(classifier);
    }

    pub fn register_marker(&mut self, classifier: Arc<dyn MarkerClassifier>) {
        tracing::debug!(
            "Registered marker classifier: {} ({} … {})",
            classifier.name(),
            classifier.start_marker(),
            classifier.end_marker()
        );
        self.markers.push(classifier);
    }

    pub fn markers(&self) -> &[Arc<dyn MarkerClassifier>] {
        &self.markers
    }

    pub fn tag_classifier_names(&self) -> Vec<String> {
        self.tags.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn marker_classifier_names(&self) -> Vec<String> {
        self.markers.iter().map(|c| c.name().to_string()).collect()
    }

    /// Route a closed tag to the first classifier that accepts its name.
    pub fn classify_tag(
        &self,
        tag_name: &str,
        body: &str,
        ctx: &ClassifyContext<'_>,
    ) -> Option<DialogueEvent> {
        match self.tags.iter().find(|c| c.matches(tag_name)) {
            Some(classifier) => {
                let event = classifier.classify(tag_name, body, ctx);
                if event.is_none() {
                    tracing::trace!(
                        "Tag <{}> matched {} but produced no messages",
                        tag_name,
                        classifier.name()
                    );
                }
                event
            }
            None => {
                tracing::trace!("Consumed unrecognized tag <{}>", tag_name);
                None
            }
        }
    }
}

impl std::fmt::Debug for ClassifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierRegistry")
            .field("tags", &self.tag_classifier_names())
            .field("markers", &self.marker_classifier_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shout;

    impl TagClassifier for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn matches(&self, tag_name: &str) -> bool {
            tag_name.ends_with("的私聊")
        }

        fn classify(
            &self,
            tag_name: &str,
            body: &str,
            _ctx: &ClassifyContext<'_>,
        ) -> Option<DialogueEvent> {
            Some(DialogueEvent::PrivateChat {
                tag_name: tag_name.to_string(),
                other_name: None,
                messages: vec![body.to_uppercase()],
            })
        }
    }

    #[test]
    fn standard_registry_follows_config() {
        let mut config = DialogueConfig::default();
        let registry = ClassifierRegistry::standard(&config);
        assert_eq!(registry.tag_classifier_names(), vec!["private_chat", "group_chat"]);
        assert_eq!(registry.marker_classifier_names(), vec!["moments", "moment_reply"]);

        config.parser.group_chat = false;
        config.parser.moments = false;
        config.known_contacts = vec!["室友".to_string()];
        let registry = ClassifierRegistry::standard(&config);
        assert_eq!(registry.tag_classifier_names(), vec!["private_chat", "loose"]);
        assert!(registry.markers().is_empty());
    }

    #[test]
    fn first_registered_classifier_wins() {
        let mut registry = ClassifierRegistry::new();
        registry.register_tag(Arc::new(Shout));
        registry.register_tag(Arc::new(PrivateChatClassifier));
        let ctx = ClassifyContext { user_name: "我" };

        let event = registry.classify_tag("我和室友的私聊", "hi", &ctx).unwrap();
        match event {
            DialogueEvent::PrivateChat { messages, .. } => assert_eq!(messages, vec!["HI"]),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn unmatched_tags_yield_nothing() {
        let registry = ClassifierRegistry::standard(&DialogueConfig::default());
        let ctx = ClassifyContext { user_name: "me" };
        assert!(registry.classify_tag("div", "- hello", &ctx).is_none());
    }
}
