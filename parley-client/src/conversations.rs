//! In-memory conversation list
//!
//! Kept in most-recently-active order: a conversation moves to the front
//! whenever it gains a message. This is the value the client encrypts and
//! persists on exit.

use parley_common::conversation::{Conversation, ConversationMetadata, Message};
use thiserror::Error;
use uuid::Uuid;

/// Errors from conversation list updates
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationSetError {
    #[error("unknown conversation {0}")]
    Unknown(Uuid),
}

/// Ordered set of conversations keyed by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationSet {
    conversations: Vec<Conversation>,
}

impl ConversationSet {
    pub fn new(conversations: Vec<Conversation>) -> Self {
        Self { conversations }
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.iter()
    }

    pub fn get(&self, id: Uuid) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.metadata.id == id)
    }

    /// Insert at the front; returns `false` if the id is already present
    pub fn add(&mut self, conversation: Conversation) -> bool {
        if self.position(conversation.metadata.id).is_some() {
            return false;
        }
        self.conversations.insert(0, conversation);
        true
    }

    /// Start a new conversation owned by `own_username`
    ///
    /// The local user is added to the participants if missing. An empty
    /// name on a two-person conversation becomes the other person's name.
    pub fn create(
        &mut self,
        name: &str,
        mut participants: Vec<String>,
        own_username: &str,
    ) -> &Conversation {
        if !participants.iter().any(|p| p == own_username) {
            participants.push(own_username.to_string());
        }

        let mut name = name.trim().to_string();
        if name.is_empty() {
            let others: Vec<&String> = participants.iter().filter(|p| *p != own_username).collect();
            name = match others.as_slice() {
                [other] => (*other).clone(),
                _ => others
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            };
        }

        self.conversations.insert(
            0,
            Conversation::new(ConversationMetadata::new(name, participants)),
        );
        &self.conversations[0]
    }

    /// Remove a conversation by id
    pub fn remove(&mut self, id: Uuid) -> Option<Conversation> {
        let index = self.position(id)?;
        Some(self.conversations.remove(index))
    }

    /// First conversation whose participants equal `participants` as a set
    pub fn find_by_participants(&self, participants: &[String]) -> Option<&Conversation> {
        let mut wanted: Vec<&str> = participants.iter().map(String::as_str).collect();
        wanted.sort_unstable();
        wanted.dedup();

        self.conversations.iter().find(|c| {
            let mut have: Vec<&str> = c.metadata.participants.iter().map(String::as_str).collect();
            have.sort_unstable();
            have.dedup();
            have == wanted
        })
    }

    /// Append a message the local user wrote and return it as stored
    ///
    /// The stored `sent_at` is never earlier than the conversation's last
    /// message, so a peer with a fast clock cannot block sending.
    pub fn push(&mut self, id: Uuid, message: Message) -> Result<&Message, ConversationSetError> {
        let index = self.position(id).ok_or(ConversationSetError::Unknown(id))?;
        self.conversations[index].append(message);
        self.move_to_front(index);
        self.conversations[0]
            .last_message()
            .ok_or(ConversationSetError::Unknown(id))
    }

    /// Record a message received from the server
    ///
    /// An unknown conversation is created from `metadata`. A conversation
    /// named after the local user is a 1:1 chat addressed to us, so it is
    /// named after the author instead. A message stamped before the last one
    /// is kept with the last message's time.
    pub fn receive(
        &mut self,
        mut metadata: ConversationMetadata,
        message: Message,
        own_username: &str,
    ) -> &Conversation {
        if metadata.name == own_username {
            metadata.name = message.author.clone();
        }

        match self.position(metadata.id) {
            Some(index) => {
                self.conversations[index].append(message);
                self.move_to_front(index);
            }
            None => {
                let mut conversation = Conversation::new(metadata);
                conversation.append(message);
                self.conversations.insert(0, conversation);
            }
        }
        &self.conversations[0]
    }

    pub fn into_vec(self) -> Vec<Conversation> {
        self.conversations
    }

    pub fn as_slice(&self) -> &[Conversation] {
        &self.conversations
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.conversations.iter().position(|c| c.metadata.id == id)
    }

    fn move_to_front(&mut self, index: usize) {
        if index > 0 {
            let conversation = self.conversations.remove(index);
            self.conversations.insert(0, conversation);
        }
    }
}

impl From<Vec<Conversation>> for ConversationSet {
    fn from(conversations: Vec<Conversation>) -> Self {
        Self::new(conversations)
    }
}
