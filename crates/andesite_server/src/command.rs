//! The command interpreter: a leading solidus, an identifier, arguments,
//! and a registry of command implementations.

use std::sync::Arc;

use andesite_network::Client;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::chat::{ChatMessage, ChatStyle};

/// A command being executed (or considered for autocompletion).
#[derive(Clone, Debug)]
pub struct CommandEvent {
    /// The client who issued the command, or `None` for the operator
    /// console.
    pub issuer: Option<Client>,
    /// The characters after the leading solidus up to the first
    /// whitespace.
    pub identifier: String,
    pub arguments: Vec<String>,
    /// The raw line as received.
    pub raw: String,
    /// Everything after the identifier, unparsed.
    pub raw_arguments: String,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CommandStatus {
    Success,
    SyntaxError,
    DoesNotExist,
    Forbidden,
}

pub struct CommandResult {
    pub status: CommandStatus,
    pub message: Option<ChatMessage>,
}

impl CommandResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Success,
            message: Some(ChatMessage::text(message)),
        }
    }

    pub fn silent_success() -> Self {
        Self {
            status: CommandStatus::Success,
            message: None,
        }
    }

    pub fn syntax_error() -> Self {
        Self {
            status: CommandStatus::SyntaxError,
            message: Some(
                ChatMessage::new()
                    .push(ChatStyle::Red)
                    .segment("Syntax error"),
            ),
        }
    }
}

/// One installable command.
pub trait Command: Send + Sync + 'static {
    /// The identifier this command answers to, without the solidus.
    fn identifier(&self) -> &str;

    /// One line shown in listings.
    fn summary(&self) -> &str;

    /// Longer usage text.
    fn help(&self) -> &str;

    /// Whether the issuer may run this command.
    fn check(&self, event: &CommandEvent) -> bool {
        let _ = event;
        true
    }

    fn execute(&self, event: &CommandEvent) -> CommandResult;

    /// Completions for a partial final argument.
    fn autocomplete(&self, event: &CommandEvent) -> Vec<String> {
        let _ = event;
        Vec::new()
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: RwLock<FxHashMap<String, Arc<dyn Command>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, command: Arc<dyn Command>) {
        self.commands
            .write()
            .insert(command.identifier().into(), command);
    }

    pub fn unregister(&self, identifier: &str) {
        self.commands.write().remove(identifier);
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn Command>> {
        self.commands.read().get(identifier).cloned()
    }

    /// Identifiers in sorted order, for help listings.
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.commands.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Parses and runs a command line.
    ///
    /// Returns `None` when the line does not start with a solidus (it is
    /// not a command), otherwise the rendered response text.
    pub fn interpret(&self, issuer: Option<Client>, line: &str) -> Option<String> {
        let event = parse(issuer, line)?;

        let Some(command) = self.get(&event.identifier) else {
            return Some(format!("No such command: /{}", event.identifier));
        };

        if !command.check(&event) {
            return Some("Forbidden".into());
        }

        let result = command.execute(&event);

        Some(match result.message {
            Some(message) => message.to_plain(),
            None => String::new(),
        })
    }

    /// Completion candidates for a partial command line.
    pub fn autocomplete(&self, issuer: Option<Client>, line: &str) -> Vec<String> {
        let Some(event) = parse(issuer, line) else {
            return Vec::new();
        };

        // An unfinished identifier completes against command names.
        if event.raw_arguments.is_empty() && !line.ends_with(char::is_whitespace) {
            return self
                .identifiers()
                .into_iter()
                .filter(|id| id.starts_with(&event.identifier))
                .map(|id| format!("/{id}"))
                .collect();
        }

        match self.get(&event.identifier) {
            Some(command) if command.check(&event) => command.autocomplete(&event),
            _ => Vec::new(),
        }
    }
}

fn parse(issuer: Option<Client>, line: &str) -> Option<CommandEvent> {
    let rest = line.strip_prefix('/')?;

    let (identifier, raw_arguments) = match rest.split_once(char::is_whitespace) {
        Some((id, args)) => (id, args),
        None => (rest, ""),
    };

    Some(CommandEvent {
        issuer,
        identifier: identifier.into(),
        arguments: raw_arguments
            .split_whitespace()
            .map(Into::into)
            .collect(),
        raw: line.into(),
        raw_arguments: raw_arguments.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Command for Echo {
        fn identifier(&self) -> &str {
            "echo"
        }

        fn summary(&self) -> &str {
            "Echoes its arguments"
        }

        fn help(&self) -> &str {
            "/echo <text>"
        }

        fn execute(&self, event: &CommandEvent) -> CommandResult {
            if event.arguments.is_empty() {
                CommandResult::syntax_error()
            } else {
                CommandResult::success(event.arguments.join(" "))
            }
        }

        fn autocomplete(&self, _event: &CommandEvent) -> Vec<String> {
            vec!["hello".into()]
        }
    }

    #[test]
    fn non_commands_pass_through() {
        let registry = CommandRegistry::new();
        assert_eq!(registry.interpret(None, "hello world"), None);
    }

    #[test]
    fn dispatches_by_identifier() {
        let registry = CommandRegistry::new();
        registry.register(Arc::new(Echo));

        assert_eq!(
            registry.interpret(None, "/echo one two"),
            Some("one two".into())
        );
        assert_eq!(
            registry.interpret(None, "/missing"),
            Some("No such command: /missing".into())
        );
    }

    #[test]
    fn syntax_errors_render() {
        let registry = CommandRegistry::new();
        registry.register(Arc::new(Echo));

        assert_eq!(registry.interpret(None, "/echo"), Some("Syntax error".into()));
    }

    #[test]
    fn autocompletes_identifiers_then_arguments() {
        let registry = CommandRegistry::new();
        registry.register(Arc::new(Echo));

        assert_eq!(registry.autocomplete(None, "/ec"), vec!["/echo"]);
        assert_eq!(registry.autocomplete(None, "/echo h"), vec!["hello"]);
    }
}
