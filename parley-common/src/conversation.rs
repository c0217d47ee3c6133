//! Conversation entities shared by client and server
//!
//! A conversation is identified by an immutable UUID and owns an
//! append-only list of messages. The participant list is the authoritative
//! recipient set for fan-out (minus the author of each message).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identity and membership of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub id: Uuid,
    pub name: String,
    pub participants: Vec<String>,
}

impl ConversationMetadata {
    /// Create metadata for a brand-new conversation with a random id
    pub fn new(name: impl Into<String>, participants: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            participants,
        }
    }

    /// Participants that should receive a message written by `author`
    pub fn recipients(&self, author: &str) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.as_str() != author)
            .cloned()
            .collect()
    }
}

/// A single chat message sent from a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub author: String,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn now(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            author: author.into(),
            sent_at: Utc::now(),
        }
    }
}

/// Errors raised when mutating a conversation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    /// The message is older than the newest message already in the conversation
    #[error("message sent at {sent_at} is older than the last message ({last})")]
    OutOfOrder {
        sent_at: DateTime<Utc>,
        last: DateTime<Utc>,
    },
}

/// A list of messages between several participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub metadata: ConversationMetadata,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new(metadata: ConversationMetadata) -> Self {
        Self {
            metadata,
            messages: Vec::new(),
        }
    }

    /// Append a message, keeping `sent_at` non-decreasing
    ///
    /// # Errors
    ///
    /// Returns `ConversationError::OutOfOrder` if the message predates the
    /// last message in the conversation. Equal timestamps are accepted.
    pub fn push_message(&mut self, message: Message) -> Result<(), ConversationError> {
        if let Some(last) = self.messages.last()
            && message.sent_at < last.sent_at
        {
            return Err(ConversationError::OutOfOrder {
                sent_at: message.sent_at,
                last: last.sent_at,
            });
        }
        self.messages.push(message);
        Ok(())
    }

    /// Append a message, raising its `sent_at` to the last message's if it
    /// is older
    ///
    /// Timestamps come from each author's own clock. Clamping keeps the list
    /// non-decreasing without dropping a message from a peer whose clock
    /// runs behind.
    pub fn append(&mut self, mut message: Message) -> &Message {
        if let Some(last) = self.messages.last()
            && message.sent_at < last.sent_at
        {
            message.sent_at = last.sent_at;
        }
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// The newest message, if any
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message_at(secs: i64) -> Message {
        Message {
            content: format!("message at {}", secs),
            author: "alice".to_string(),
            sent_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_recipients_excludes_author() {
        let metadata = ConversationMetadata::new(
            "team",
            vec!["alice".to_string(), "bob".to_string(), "carol".to_string()],
        );
        assert_eq!(metadata.recipients("alice"), vec!["bob", "carol"]);
        assert_eq!(metadata.recipients("dave").len(), 3);
    }

    #[test]
    fn test_new_metadata_has_unique_ids() {
        let a = ConversationMetadata::new("a", vec![]);
        let b = ConversationMetadata::new("a", vec![]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_push_message_in_order() {
        let mut conversation = Conversation::new(ConversationMetadata::new("c", vec![]));
        conversation.push_message(message_at(10)).unwrap();
        conversation.push_message(message_at(10)).unwrap();
        conversation.push_message(message_at(20)).unwrap();
        assert_eq!(conversation.messages.len(), 3);
        assert_eq!(conversation.last_message(), Some(&message_at(20)));
    }

    #[test]
    fn test_push_message_out_of_order_rejected() {
        let mut conversation = Conversation::new(ConversationMetadata::new("c", vec![]));
        conversation.push_message(message_at(20)).unwrap();

        let result = conversation.push_message(message_at(10));
        assert!(matches!(result, Err(ConversationError::OutOfOrder { .. })));
        // Rejected message is not appended
        assert_eq!(conversation.messages.len(), 1);
    }

    #[test]
    fn test_append_clamps_older_message() {
        let mut conversation = Conversation::new(ConversationMetadata::new("c", vec![]));
        conversation.append(message_at(20));

        let stored = conversation.append(message_at(10));
        assert_eq!(stored.sent_at, message_at(20).sent_at);
        assert_eq!(stored.content, "message at 10");

        conversation.append(message_at(30));
        let times: Vec<i64> = conversation
            .messages
            .iter()
            .map(|m| m.sent_at.timestamp())
            .collect();
        assert_eq!(times, vec![20, 20, 30]);
    }

    #[test]
    fn test_conversation_json_field_names() {
        let conversation = Conversation::new(ConversationMetadata::new(
            "c",
            vec!["alice".to_string()],
        ));
        let json = serde_json::to_value(&conversation).unwrap();
        assert!(json.get("metadata").is_some());
        assert!(json["metadata"].get("participants").is_some());
        assert!(json["messages"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_message_json_uses_sent_at() {
        let json = serde_json::to_value(message_at(0)).unwrap();
        assert_eq!(json["sent_at"], "1970-01-01T00:00:00Z");
        assert_eq!(json["author"], "alice");
    }
}
