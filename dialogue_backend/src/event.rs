use serde::{Deserialize, Serialize};

/// A structured record extracted from a fully closed protocol block.
///
/// Events carry no ids or timestamps; the consumer that persists them assigns
/// those (see [`crate::store::MessageStore`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DialogueEvent {
    /// `<X和Y的私聊>`: one private 1:1 exchange.
    PrivateChat {
        tag_name: String,
        /// `None` when the tag name did not reveal the other participant.
        other_name: Option<String>,
        messages: Vec<String>,
    },
    /// `<群聊:name>`: one group exchange.
    GroupChat {
        tag_name: String,
        group_name: String,
        members: Vec<String>,
        messages: Vec<GroupMessage>,
    },
    /// `moment_start … moment_end`: new social-feed posts.
    Moments { moments: Vec<Moment> },
    /// `moment_reply_start … moment_reply_end`: comments on an existing post.
    MomentReply {
        /// Empty when the block did not name its target.
        moment_id: String,
        comments: Vec<MomentComment>,
    },
}

impl DialogueEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DialogueEvent::PrivateChat { .. } => "private_chat",
            DialogueEvent::GroupChat { .. } => "group_chat",
            DialogueEvent::Moments { .. } => "moments",
            DialogueEvent::MomentReply { .. } => "moment_reply",
        }
    }

    /// Number of displayable items (messages, posts or comments) in the event.
    pub fn item_count(&self) -> usize {
        match self {
            DialogueEvent::PrivateChat { messages, .. } => messages.len(),
            DialogueEvent::GroupChat { messages, .. } => messages.len(),
            DialogueEvent::Moments { moments } => moments.len(),
            DialogueEvent::MomentReply { comments, .. } => comments.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    pub speaker: String,
    pub content: String,
    /// `HH:MM` as written by the model, or empty.
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moment {
    pub author: String,
    pub content: String,
    pub time: String,
    pub views: i64,
    pub likes: i64,
    pub comments: Vec<MomentComment>,
    /// Author, content and time joined by NUL; stable across re-parses.
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MomentComment {
    pub author: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reply_to: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reply_to_author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_chat_serializes_with_type_tag() {
        let event = DialogueEvent::PrivateChat {
            tag_name: "我和室友的私聊".to_string(),
            other_name: Some("室友".to_string()),
            messages: vec!["hi".to_string()],
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "private_chat");
        assert_eq!(json["other_name"], "室友");
        assert_eq!(json["messages"][0], "hi");
    }

    #[test]
    fn null_participant_serializes_as_null() {
        let event = DialogueEvent::PrivateChat {
            tag_name: "的私聊".to_string(),
            other_name: None,
            messages: vec!["x".to_string()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["other_name"].is_null());
        assert_eq!(event.kind(), "private_chat");
        assert_eq!(event.item_count(), 1);
    }

    #[test]
    fn empty_reply_fields_are_omitted() {
        let comment = MomentComment {
            author: "A".to_string(),
            content: "nice".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&comment).unwrap();
        assert!(json.get("reply_to").is_none());
        assert!(json.get("time").is_none());
    }
}
