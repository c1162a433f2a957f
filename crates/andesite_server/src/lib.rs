#![doc = include_str!("../README.md")]

pub mod chat;
pub mod command;
pub mod module;
pub mod server;

pub use chat::{ChatMessage, ChatStyle, ChatToken};
pub use command::{Command, CommandEvent, CommandRegistry, CommandResult, CommandStatus};
pub use module::Module;
pub use server::{Server, ServerConfig, ServerEvents};
