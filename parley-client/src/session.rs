//! Line-mode chat state
//!
//! Turns input lines and server envelopes into printable lines and outgoing
//! messages. Holds no I/O so the chat loop in `main` stays a thin shell.

use std::collections::BTreeSet;

use chrono::Local;
use parley_common::conversation::{Conversation, ConversationMetadata, Message};
use parley_common::protocol::Envelope;
use tracing::debug;
use uuid::Uuid;

use crate::commands::{self, Command, ParseResult};
use crate::conversations::ConversationSet;

/// What the chat loop should do after an input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    /// Send `message` to `recipients` over the transport
    Send {
        message: Message,
        metadata: ConversationMetadata,
        recipients: Vec<String>,
    },
    Quit,
}

/// Output of handling one input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub lines: Vec<String>,
    pub action: Action,
}

impl Outcome {
    fn print(lines: Vec<String>) -> Self {
        Self {
            lines,
            action: Action::None,
        }
    }

    fn line(line: impl Into<String>) -> Self {
        Self::print(vec![line.into()])
    }
}

/// Chat state for the logged-in user
pub struct ChatSession {
    username: String,
    conversations: ConversationSet,
    active: Option<Uuid>,
    online: BTreeSet<String>,
}

impl ChatSession {
    pub fn new(username: impl Into<String>, conversations: Vec<Conversation>) -> Self {
        Self {
            username: username.into(),
            conversations: ConversationSet::new(conversations),
            active: None,
            online: BTreeSet::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn conversations(&self) -> &ConversationSet {
        &self.conversations
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.and_then(|id| self.conversations.get(id))
    }

    /// Conversations to persist on exit
    pub fn into_conversations(self) -> Vec<Conversation> {
        self.conversations.into_vec()
    }

    /// Handle one line typed by the user
    pub fn handle_input(&mut self, line: &str) -> Outcome {
        let parsed = match commands::parse_input(line) {
            Ok(parsed) => parsed,
            Err(e) => return Outcome::line(format!("! {}", e)),
        };

        match parsed {
            ParseResult::Empty => Outcome::print(Vec::new()),
            ParseResult::Message(text) => match self.active {
                Some(id) => self.send(id, text),
                None => Outcome::line("! no active conversation (use /to <user> or /help)"),
            },
            ParseResult::Command(command) => self.run(command),
        }
    }

    /// Handle one envelope from the server
    pub fn handle_envelope(&mut self, envelope: Envelope) -> Vec<String> {
        match envelope {
            Envelope::SendChatMessage(chat) => {
                let line = format_message(&chat.message);
                let author = chat.message.author.clone();
                let conversation =
                    self.conversations
                        .receive(chat.conversation_metadata, chat.message, &self.username);
                debug!(conversation = %conversation.metadata.id, %author, "message received");
                vec![format!("[{}] {}", conversation.metadata.name, line)]
            }
            Envelope::NotifyConnection(notify) => {
                let changed = if notify.connected {
                    self.online.insert(notify.username.clone())
                } else {
                    self.online.remove(&notify.username)
                };
                if !changed {
                    return Vec::new();
                }
                let state = if notify.connected { "online" } else { "offline" };
                vec![format!("* {} is {}", notify.username, state)]
            }
        }
    }

    fn run(&mut self, command: Command) -> Outcome {
        match command {
            Command::Help => Outcome::print(commands::help_text()),
            Command::List => Outcome::print(self.list()),
            Command::Show(index) => self.show(index),
            Command::To(users) => {
                let id = self.open(users);
                let name = self.active().map(|c| c.metadata.name.clone()).unwrap_or_default();
                debug!(conversation = %id, "switched conversation");
                Outcome::line(format!("* now talking in [{}]", name))
            }
            Command::Msg { recipients, text } => {
                let id = self.open(recipients);
                self.send(id, text)
            }
            Command::Who => {
                if self.online.is_empty() {
                    Outcome::line("* nobody else seen online yet")
                } else {
                    let names: Vec<&str> = self.online.iter().map(String::as_str).collect();
                    Outcome::line(format!("* online: {}", names.join(", ")))
                }
            }
            Command::Quit => Outcome {
                lines: Vec::new(),
                action: Action::Quit,
            },
        }
    }

    fn list(&self) -> Vec<String> {
        if self.conversations.is_empty() {
            return vec!["* no conversations yet".to_string()];
        }
        self.conversations
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let marker = if Some(c.metadata.id) == self.active { '>' } else { ' ' };
                let last = c
                    .last_message()
                    .map(|m| format!(" - {}: {}", m.author, m.content))
                    .unwrap_or_default();
                format!("{}{:>3}. {}{}", marker, i + 1, c.metadata.name, last)
            })
            .collect()
    }

    fn show(&mut self, index: usize) -> Outcome {
        let Some(conversation) = self.conversations.as_slice().get(index - 1) else {
            return Outcome::line(format!("! no conversation {}", index));
        };

        let mut lines = vec![format!(
            "== {} ({}) ==",
            conversation.metadata.name,
            conversation.metadata.participants.join(", ")
        )];
        lines.extend(conversation.messages.iter().map(format_message));
        self.active = Some(conversation.metadata.id);
        Outcome::print(lines)
    }

    /// Make the conversation with exactly `users` (plus us) active
    fn open(&mut self, users: Vec<String>) -> Uuid {
        let mut participants = users;
        if !participants.iter().any(|p| p == &self.username) {
            participants.push(self.username.clone());
        }

        let id = match self.conversations.find_by_participants(&participants) {
            Some(conversation) => conversation.metadata.id,
            None => {
                self.conversations
                    .create("", participants, &self.username)
                    .metadata
                    .id
            }
        };
        self.active = Some(id);
        id
    }

    fn send(&mut self, id: Uuid, text: String) -> Outcome {
        let message = match self
            .conversations
            .push(id, Message::now(self.username.clone(), text))
        {
            Ok(stored) => stored.clone(),
            Err(e) => return Outcome::line(format!("! {}", e)),
        };
        let Some(conversation) = self.conversations.get(id) else {
            return Outcome::print(Vec::new());
        };

        let metadata = conversation.metadata.clone();
        let recipients = metadata.recipients(&self.username);
        Outcome {
            lines: Vec::new(),
            action: Action::Send {
                message,
                metadata,
                recipients,
            },
        }
    }
}

fn format_message(message: &Message) -> String {
    format!(
        "{} <{}> {}",
        message.sent_at.with_timezone(&Local).format("%H:%M"),
        message.author,
        message.content
    )
}
