//! Inbound line classification and slash commands.
//!
//! Every line a client sends after its name is one of:
//! - `/leave`: the session ends
//! - `/<command> [argument]`: answered to the sender only
//! - anything else: relayed to every other session
//!
//! Classification looks only at the body of the [`Envelope`], never at
//! the sender tag. Sessions split lines with [`Envelope::parse_from`], so a
//! name containing `": "` still yields the right body.

use crate::message::Envelope;
use crate::registry::Registry;
use tracing::trace;

/// Fixed reply to `/help`.
pub const HELP_TEXT: &[&str] = &[
    "[SERVER] Available commands:",
    "[SERVER]   /help            show this list",
    "[SERVER]   /echo <message>  the server repeats <message> back to you",
    "[SERVER]   /who             list everyone currently online",
    "[SERVER]   /leave           leave the chat",
];

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Leave,
    Help,
    Echo(String),
    Who,
    /// Anything not listed above; carries the command word.
    Unknown(String),
}

impl Command {
    /// Parse a message body. Returns `None` for plain chat.
    pub fn parse(body: &str) -> Option<Self> {
        if body == "/leave" {
            return Some(Command::Leave);
        }

        let invocation = body.strip_prefix('/')?;
        let (word, argument) = invocation.split_once(' ').unwrap_or((invocation, ""));

        Some(match word {
            "help" => Command::Help,
            "echo" => Command::Echo(argument.to_string()),
            "who" => Command::Who,
            other => Command::Unknown(other.to_string()),
        })
    }
}

/// What the session should do with an inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// End the session.
    Leave,
    /// Write these lines to the sender only.
    Reply(Vec<String>),
    /// Relay this line to every other session.
    Broadcast(String),
    /// Nothing to do.
    Ignore,
}

/// Decide what an inbound envelope means.
pub fn dispatch(envelope: &Envelope, registry: &Registry) -> Action {
    match Command::parse(&envelope.body) {
        None => Action::Broadcast(envelope.to_string()),
        Some(Command::Leave) => Action::Leave,
        Some(Command::Help) => Action::Reply(HELP_TEXT.iter().map(|l| l.to_string()).collect()),
        Some(Command::Echo(message)) => Action::Reply(vec![format!("[SERVER] {message}")]),
        Some(Command::Who) => Action::Reply(who_reply(&registry.snapshot_names())),
        Some(Command::Unknown(word)) => {
            trace!(command = %word, "Ignoring unknown command");
            Action::Ignore
        }
    }
}

fn who_reply(names: &[String]) -> Vec<String> {
    vec![
        format!("There are currently {} people online:", names.len()),
        names.join(", "),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry_with(names: &[&str]) -> std::sync::Arc<Registry> {
        let registry = Registry::new(Duration::from_secs(1));
        for name in names {
            registry.register(*name, tokio::io::sink());
        }
        registry
    }

    fn dispatch_line(line: &str, registry: &Registry) -> Action {
        dispatch(&Envelope::parse(line), registry)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/leave"), Some(Command::Leave));
        assert_eq!(Command::parse("/help"), Some(Command::Help));
        assert_eq!(Command::parse("/who"), Some(Command::Who));
        assert_eq!(
            Command::parse("/echo hello world"),
            Some(Command::Echo("hello world".to_string()))
        );
        assert_eq!(
            Command::parse("/dance now"),
            Some(Command::Unknown("dance".to_string()))
        );
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_leave_must_be_exact() {
        assert_eq!(
            Command::parse("/leave now"),
            Some(Command::Unknown("leave".to_string()))
        );
        assert_eq!(Command::parse(" /leave"), None);
        assert_eq!(
            Command::parse("/Leave"),
            Some(Command::Unknown("Leave".to_string()))
        );
    }

    #[test]
    fn test_echo_without_argument() {
        assert_eq!(Command::parse("/echo"), Some(Command::Echo(String::new())));

        let registry = registry_with(&[]);
        assert_eq!(
            dispatch_line("erin: /echo", &registry),
            Action::Reply(vec!["[SERVER] ".to_string()])
        );
    }

    #[test]
    fn test_dispatch_echo() {
        let registry = registry_with(&["alice"]);
        assert_eq!(
            dispatch_line("alice: /echo hello world", &registry),
            Action::Reply(vec!["[SERVER] hello world".to_string()])
        );
    }

    #[test]
    fn test_dispatch_who() {
        let registry = registry_with(&["alice", "bob", "carol"]);
        assert_eq!(
            dispatch_line("bob: /who", &registry),
            Action::Reply(vec![
                "There are currently 3 people online:".to_string(),
                "alice, bob, carol".to_string(),
            ])
        );
    }

    #[test]
    fn test_dispatch_help() {
        let registry = registry_with(&[]);
        match dispatch_line("alice: /help", &registry) {
            Action::Reply(lines) => {
                assert_eq!(lines.len(), HELP_TEXT.len());
                assert!(lines.iter().any(|l| l.contains("/leave")));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_chat_is_relayed_verbatim() {
        let registry = registry_with(&[]);
        assert_eq!(
            dispatch_line("alice: hi: there", &registry),
            Action::Broadcast("alice: hi: there".to_string())
        );
    }

    #[test]
    fn test_dispatch_malformed_line() {
        let registry = registry_with(&[]);
        assert_eq!(
            dispatch_line("no delimiter here", &registry),
            Action::Broadcast("no delimiter here".to_string())
        );
        assert_eq!(dispatch_line("/leave", &registry), Action::Leave);
    }

    #[test]
    fn test_dispatch_name_containing_delimiter() {
        let registry = registry_with(&["a: b"]);
        let dispatch_from = |line| dispatch(&Envelope::parse_from(line, "a: b"), &registry);

        assert_eq!(dispatch_from("a: b: /leave"), Action::Leave);
        assert_eq!(
            dispatch_from("a: b: /echo hi"),
            Action::Reply(vec!["[SERVER] hi".to_string()])
        );
        assert_eq!(
            dispatch_from("a: b: hello"),
            Action::Broadcast("a: b: hello".to_string())
        );
    }

    #[test]
    fn test_dispatch_unknown_is_ignored() {
        let registry = registry_with(&[]);
        assert_eq!(dispatch_line("alice: /shrug", &registry), Action::Ignore);
        assert_eq!(dispatch_line("alice: /", &registry), Action::Ignore);
    }
}
