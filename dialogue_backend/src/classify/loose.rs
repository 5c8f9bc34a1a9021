use regex_lite::Regex;
use std::sync::{Arc, OnceLock};

use super::group_chat::group_chat_event;
use super::private_chat::private_chat_event;
use super::{ClassifyContext, ContactDirectory, TagClassifier};
use crate::event::DialogueEvent;
use crate::text::cached_regex;

/// Bare tags such as `<室友>` or `<宿舍群>` that name a known contact or group.
pub struct LooseTagClassifier {
    directory: Arc<dyn ContactDirectory>,
}

impl LooseTagClassifier {
    pub fn new(directory: Arc<dyn ContactDirectory>) -> Self {
        Self { directory }
    }
}

impl TagClassifier for LooseTagClassifier {
    fn name(&self) -> &str {
        "loose"
    }

    fn matches(&self, tag_name: &str) -> bool {
        self.directory.resolve_group(tag_name).is_some()
            || self.directory.resolve_contact(tag_name).is_some()
    }

    fn classify(
        &self,
        tag_name: &str,
        body: &str,
        _ctx: &ClassifyContext<'_>,
    ) -> Option<DialogueEvent> {
        let group = self.directory.resolve_group(tag_name);
        let contact = self.directory.resolve_contact(tag_name);

        if let Some(group_name) = group {
            if contact.is_none() || has_group_sections(body) {
                if let Some(event) = group_chat_event(tag_name, group_name, body) {
                    return Some(event);
                }
            }
        }

        let contact = contact?;
        private_chat_event(tag_name, Some(contact), body)
    }
}

fn has_group_sections(body: &str) -> bool {
    static SECTIONS: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&SECTIONS, r"<\s*(聊天内容|成员)\s*>").is_some_and(|re| re.is_match(body))
}

/// A fixed list of names, usually taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    contacts: Vec<String>,
    groups: Vec<String>,
}

impl StaticDirectory {
    pub fn new(contacts: Vec<String>, groups: Vec<String>) -> Self {
        Self { contacts, groups }
    }

    fn lookup(names: &[String], tag_name: &str) -> Option<String> {
        let tag_name = tag_name.trim();
        if tag_name.is_empty() {
            return None;
        }
        names.iter().find(|n| n.trim() == tag_name).map(|n| n.trim().to_string())
    }
}

impl ContactDirectory for StaticDirectory {
    fn resolve_group(&self, tag_name: &str) -> Option<String> {
        Self::lookup(&self.groups, tag_name)
    }

    fn resolve_contact(&self, tag_name: &str) -> Option<String> {
        Self::lookup(&self.contacts, tag_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(contacts: &[&str], groups: &[&str]) -> LooseTagClassifier {
        let directory = StaticDirectory::new(
            contacts.iter().map(|s| s.to_string()).collect(),
            groups.iter().map(|s| s.to_string()).collect(),
        );
        LooseTagClassifier::new(Arc::new(directory))
    }

    const CTX: ClassifyContext<'static> = ClassifyContext { user_name: "我" };

    #[test]
    fn contact_tag_becomes_private_chat() {
        let loose = classifier(&["室友"], &[]);
        assert!(loose.matches("室友"));
        assert!(!loose.matches("路人"));

        match loose.classify("室友", "- 在吗", &CTX) {
            Some(DialogueEvent::PrivateChat {
                other_name,
                messages,
                ..
            }) => {
                assert_eq!(other_name.as_deref(), Some("室友"));
                assert_eq!(messages, vec!["在吗"]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn group_tag_becomes_group_chat() {
        let loose = classifier(&[], &["宿舍"]);
        let event = loose.classify("宿舍", "A--hi--9:00", &CTX).unwrap();
        assert_eq!(event.kind(), "group_chat");
    }

    #[test]
    fn ambiguous_name_prefers_group_only_with_sections() {
        let loose = classifier(&["宿舍"], &["宿舍"]);
        let plain = loose.classify("宿舍", "A--hi--9:00", &CTX).unwrap();
        assert_eq!(plain.kind(), "private_chat");

        let sectioned = loose
            .classify("宿舍", "<聊天内容>A--hi--9:00</聊天内容>", &CTX)
            .unwrap();
        assert_eq!(sectioned.kind(), "group_chat");
    }

    #[test]
    fn group_without_messages_falls_back_to_private() {
        let loose = classifier(&["宿舍"], &["宿舍"]);
        let event = loose.classify("宿舍", "<成员>A</成员>\nhello", &CTX).unwrap();
        assert_eq!(event.kind(), "private_chat");
    }
}
