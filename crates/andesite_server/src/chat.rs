//! Structured chat documents: an ordered token stream of styles and
//! segments, rendered to the wire's JSON form or to plain text for logs
//! and the command interpreter.

use serde_json::{json, Value};

/// Display styles. Colors replace each other; the four attribute styles
/// accumulate.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChatStyle {
    Obfuscated,
    Bold,
    Strikethrough,
    Underline,
    Italic,
    Black,
    DarkBlue,
    DarkGreen,
    DarkCyan,
    DarkRed,
    Purple,
    Gold,
    Grey,
    DarkGrey,
    Blue,
    BrightGreen,
    Cyan,
    Red,
    Pink,
    Yellow,
    White,
}

impl ChatStyle {
    /// The wire color name, or `None` for attribute styles.
    fn color_name(self) -> Option<&'static str> {
        Some(match self {
            ChatStyle::Black => "black",
            ChatStyle::DarkBlue => "dark_blue",
            ChatStyle::DarkGreen => "dark_green",
            ChatStyle::DarkCyan => "dark_aqua",
            ChatStyle::DarkRed => "dark_red",
            ChatStyle::Purple => "dark_purple",
            ChatStyle::Gold => "gold",
            ChatStyle::Grey => "gray",
            ChatStyle::DarkGrey => "dark_gray",
            ChatStyle::Blue => "blue",
            ChatStyle::BrightGreen => "green",
            ChatStyle::Cyan => "aqua",
            ChatStyle::Red => "red",
            ChatStyle::Pink => "light_purple",
            ChatStyle::Yellow => "yellow",
            ChatStyle::White => "white",
            _ => return None,
        })
    }

    fn attribute_name(self) -> Option<&'static str> {
        Some(match self {
            ChatStyle::Obfuscated => "obfuscated",
            ChatStyle::Bold => "bold",
            ChatStyle::Strikethrough => "strikethrough",
            ChatStyle::Underline => "underlined",
            ChatStyle::Italic => "italic",
            _ => return None,
        })
    }
}

/// One command to the chat renderer.
#[derive(Clone, PartialEq, Debug)]
pub enum ChatToken {
    /// Pushes a style onto the stack.
    Push(ChatStyle),
    /// Pops the most recent style.
    Pop,
    /// A literal text segment.
    Text(String),
    /// Placeholder for the sender's name.
    Sender,
    /// Placeholder for a comma-separated recipient list.
    Recipients,
}

/// A chat message: token stream plus routing information.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct ChatMessage {
    pub tokens: Vec<ChatToken>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    /// When set, the message goes to every connected player and the
    /// recipient list is advisory only.
    pub broadcast: bool,
}

impl ChatMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain single-segment message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new().segment(text)
    }

    pub fn segment(mut self, text: impl Into<String>) -> Self {
        self.tokens.push(ChatToken::Text(text.into()));
        self
    }

    pub fn push(mut self, style: ChatStyle) -> Self {
        self.tokens.push(ChatToken::Push(style));
        self
    }

    pub fn pop(mut self) -> Self {
        self.tokens.push(ChatToken::Pop);
        self
    }

    pub fn from_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn to_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipients.push(recipient.into());
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    fn expand(&self, token: &ChatToken) -> Option<String> {
        match token {
            ChatToken::Text(text) => Some(text.clone()),
            ChatToken::Sender => Some(self.sender.clone().unwrap_or_default()),
            ChatToken::Recipients => Some(self.recipients.join(", ")),
            _ => None,
        }
    }

    /// Renders to the wire JSON document: a root component with one
    /// styled child per text-bearing token.
    pub fn to_json(&self) -> Value {
        let mut stack: Vec<ChatStyle> = Vec::new();
        let mut parts = Vec::new();

        for token in &self.tokens {
            match token {
                ChatToken::Push(style) => stack.push(*style),
                ChatToken::Pop => {
                    stack.pop();
                }
                other => {
                    let Some(text) = self.expand(other) else {
                        continue;
                    };

                    let mut part = json!({ "text": text });

                    for style in &stack {
                        if let Some(color) = style.color_name() {
                            part["color"] = Value::String(color.into());
                        } else if let Some(attr) = style.attribute_name() {
                            part[attr] = Value::Bool(true);
                        }
                    }

                    parts.push(part);
                }
            }
        }

        json!({ "text": "", "extra": parts })
    }

    /// Flattens to unstyled text, for logs and terminal output.
    pub fn to_plain(&self) -> String {
        self.tokens
            .iter()
            .filter_map(|token| self.expand(token))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_rendering_substitutes_placeholders() {
        let msg = ChatMessage {
            tokens: vec![
                ChatToken::Text("<".into()),
                ChatToken::Push(ChatStyle::Bold),
                ChatToken::Sender,
                ChatToken::Pop,
                ChatToken::Text("> hi ".into()),
                ChatToken::Recipients,
            ],
            sender: Some("alice".into()),
            recipients: vec!["bob".into(), "carol".into()],
            broadcast: false,
        };

        assert_eq!(msg.to_plain(), "<alice> hi bob, carol");
    }

    #[test]
    fn json_rendering_applies_the_style_stack() {
        let msg = ChatMessage::new()
            .push(ChatStyle::Red)
            .push(ChatStyle::Bold)
            .segment("alert")
            .pop()
            .pop()
            .segment(" calm");

        let json = msg.to_json();
        let parts = json["extra"].as_array().unwrap();

        assert_eq!(parts[0]["text"], "alert");
        assert_eq!(parts[0]["color"], "red");
        assert_eq!(parts[0]["bold"], true);

        assert_eq!(parts[1]["text"], " calm");
        assert!(parts[1].get("color").is_none());
        assert!(parts[1].get("bold").is_none());
    }

    #[test]
    fn later_colors_win() {
        let msg = ChatMessage::new()
            .push(ChatStyle::Red)
            .push(ChatStyle::Blue)
            .segment("x");

        let json = msg.to_json();
        assert_eq!(json["extra"][0]["color"], "blue");
    }
}
