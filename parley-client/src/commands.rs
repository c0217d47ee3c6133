//! Line input parsing
//!
//! | Command | Aliases | Description |
//! |---------|---------|-------------|
//! | `/help` | `/h`, `/?` | Show available commands |
//! | `/list` | `/l` | List conversations, most recent first |
//! | `/show N` | `/s` | Print conversation N and make it active |
//! | `/to USERS` | `/t` | Switch to the conversation with USERS, creating it if needed |
//! | `/msg USERS TEXT` | `/m` | Send TEXT to USERS without typing `/to` first |
//! | `/who` | `/w` | Show users seen online |
//! | `/quit` | `/q`, `/exit` | Save and exit |
//!
//! `USERS` is a comma-separated list of usernames. `@USERS TEXT` is a
//! shortcut for `/msg USERS TEXT`. `//text` sends `/text` as a regular
//! message and `/` alone is `/help`.

use parley_common::validators::{self, UsernameError};

/// Registry entry used for `/help`
pub struct CommandInfo {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub usage: &'static str,
    pub description: &'static str,
}

/// All commands (alphabetical order)
pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo {
        name: "help",
        aliases: &["h", "?"],
        usage: "/help",
        description: "Show available commands",
    },
    CommandInfo {
        name: "list",
        aliases: &["l"],
        usage: "/list",
        description: "List conversations, most recent first",
    },
    CommandInfo {
        name: "msg",
        aliases: &["m"],
        usage: "/msg <user[,user...]> <text>",
        description: "Send a message to one or more users",
    },
    CommandInfo {
        name: "quit",
        aliases: &["q", "exit"],
        usage: "/quit",
        description: "Save conversations and exit",
    },
    CommandInfo {
        name: "show",
        aliases: &["s"],
        usage: "/show <number>",
        description: "Print a conversation and make it active",
    },
    CommandInfo {
        name: "to",
        aliases: &["t"],
        usage: "/to <user[,user...]>",
        description: "Switch to the conversation with these users",
    },
    CommandInfo {
        name: "who",
        aliases: &["w"],
        usage: "/who",
        description: "Show users seen online",
    },
];

/// Result of parsing one input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// Blank line
    Empty,
    /// Text for the active conversation
    Message(String),
    Command(Command),
}

/// A resolved command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    /// 1-based index into the `/list` output
    Show(usize),
    To(Vec<String>),
    Msg {
        recipients: Vec<String>,
        text: String,
    },
    Who,
    Quit,
}

/// Why an input line could not be turned into a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Unknown(String),
    /// Wrong arguments; carries the usage line
    Usage(&'static str),
    InvalidUsername(String, UsernameError),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Unknown(name) => {
                write!(f, "unknown command /{} (try /help)", name)
            }
            CommandError::Usage(usage) => write!(f, "usage: {}", usage),
            CommandError::InvalidUsername(name, e) => {
                let reason = match e {
                    UsernameError::Empty => "empty",
                    UsernameError::TooLong => "too long",
                    UsernameError::InvalidCharacters => "invalid characters",
                };
                write!(f, "invalid username '{}': {}", name, reason)
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// Parse one line of user input
///
/// # Rules
/// - `/command args` → `Command`
/// - `//text` → `Message("/text")`
/// - `@users text` → `Command(Msg)`
/// - ` /command` → `Message(" /command")` (leading space prevents parsing)
/// - blank → `Empty`
pub fn parse_input(input: &str) -> Result<ParseResult, CommandError> {
    if input.trim().is_empty() {
        return Ok(ParseResult::Empty);
    }

    if let Some(rest) = input.strip_prefix('/') {
        if rest.starts_with('/') {
            return Ok(ParseResult::Message(rest.to_string()));
        }

        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default().to_lowercase();
        let args = parts.next().unwrap_or_default().trim();

        let name = if name.is_empty() { "help".to_string() } else { name };
        return resolve(&name, args).map(ParseResult::Command);
    }

    if let Some(rest) = input.strip_prefix('@') {
        return msg(rest.trim(), "@<user[,user...]> <text>").map(ParseResult::Command);
    }

    Ok(ParseResult::Message(input.to_string()))
}

/// Render `/help`
pub fn help_text() -> Vec<String> {
    let mut lines = vec!["Commands:".to_string()];
    for info in COMMANDS {
        let aliases = if info.aliases.is_empty() {
            String::new()
        } else {
            let list: Vec<String> = info.aliases.iter().map(|a| format!("/{}", a)).collect();
            format!(" ({})", list.join(", "))
        };
        lines.push(format!("  {:<30} {}{}", info.usage, info.description, aliases));
    }
    lines.push("Anything else is sent to the active conversation.".to_string());
    lines
}

fn lookup(name: &str) -> Option<&'static CommandInfo> {
    COMMANDS
        .iter()
        .find(|info| info.name == name || info.aliases.contains(&name))
}

fn resolve(name: &str, args: &str) -> Result<Command, CommandError> {
    let info = lookup(name).ok_or_else(|| CommandError::Unknown(name.to_string()))?;

    match info.name {
        "help" => Ok(Command::Help),
        "list" => Ok(Command::List),
        "who" => Ok(Command::Who),
        "quit" => Ok(Command::Quit),
        "show" => args
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(Command::Show)
            .ok_or(CommandError::Usage(info.usage)),
        "to" => {
            if args.is_empty() || args.contains(char::is_whitespace) {
                return Err(CommandError::Usage(info.usage));
            }
            parse_usernames(args).map(Command::To)
        }
        "msg" => msg(args, info.usage),
        _ => Err(CommandError::Unknown(name.to_string())),
    }
}

fn msg(args: &str, usage: &'static str) -> Result<Command, CommandError> {
    let mut parts = args.splitn(2, char::is_whitespace);
    let users = parts.next().unwrap_or_default();
    let text = parts.next().unwrap_or_default().trim();
    if users.is_empty() || text.is_empty() {
        return Err(CommandError::Usage(usage));
    }
    Ok(Command::Msg {
        recipients: parse_usernames(users)?,
        text: text.to_string(),
    })
}

/// Split a comma-separated user list, dropping duplicates
fn parse_usernames(list: &str) -> Result<Vec<String>, CommandError> {
    let mut names: Vec<String> = Vec::new();
    for name in list.split(',').map(str::trim) {
        validators::validate_username(name)
            .map_err(|e| CommandError::InvalidUsername(name.to_string(), e))?;
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(input: &str) -> Command {
        match parse_input(input).unwrap() {
            ParseResult::Command(command) => command,
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_and_plain_text() {
        assert_eq!(parse_input("").unwrap(), ParseResult::Empty);
        assert_eq!(parse_input("   ").unwrap(), ParseResult::Empty);
        assert_eq!(
            parse_input("hello there").unwrap(),
            ParseResult::Message("hello there".to_string())
        );
    }

    #[test]
    fn test_escape_and_leading_space() {
        assert_eq!(
            parse_input("//shrug").unwrap(),
            ParseResult::Message("/shrug".to_string())
        );
        assert_eq!(
            parse_input(" /quit").unwrap(),
            ParseResult::Message(" /quit".to_string())
        );
    }

    #[test]
    fn test_slash_alone_is_help() {
        assert_eq!(command("/"), Command::Help);
        assert_eq!(command("/?"), Command::Help);
    }

    #[test]
    fn test_aliases_and_case() {
        assert_eq!(command("/L"), Command::List);
        assert_eq!(command("/exit"), Command::Quit);
        assert_eq!(command("/w"), Command::Who);
    }

    #[test]
    fn test_show() {
        assert_eq!(command("/show 2"), Command::Show(2));
        assert_eq!(
            parse_input("/show 0"),
            Err(CommandError::Usage("/show <number>"))
        );
        assert!(parse_input("/show x").is_err());
    }

    #[test]
    fn test_to_splits_and_dedups() {
        assert_eq!(
            command("/to bob,carol,bob"),
            Command::To(vec!["bob".to_string(), "carol".to_string()])
        );
        assert!(matches!(
            parse_input("/to bob carol"),
            Err(CommandError::Usage(_))
        ));
        assert!(matches!(
            parse_input("/to bob,"),
            Err(CommandError::InvalidUsername(_, UsernameError::Empty))
        ));
    }

    #[test]
    fn test_msg_and_at_shortcut() {
        let expected = Command::Msg {
            recipients: vec!["bob".to_string()],
            text: "hi  there".to_string(),
        };
        assert_eq!(command("/msg bob hi  there"), expected);
        assert_eq!(command("@bob hi  there"), expected);
        assert!(matches!(parse_input("/msg bob"), Err(CommandError::Usage(_))));
        assert!(matches!(parse_input("@"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse_input("/dance"),
            Err(CommandError::Unknown("dance".to_string()))
        );
        assert_eq!(
            CommandError::Unknown("dance".to_string()).to_string(),
            "unknown command /dance (try /help)"
        );
    }

    #[test]
    fn test_help_lists_every_command() {
        let help = help_text().join("\n");
        for info in COMMANDS {
            assert!(help.contains(info.usage));
        }
    }
}
