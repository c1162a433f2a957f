#![doc = include_str!("../README.md")]

pub mod data;
pub mod event;
pub mod guard;
pub mod ids;
pub mod settings;

pub use data::{DataProvider, LogLevel};
pub use event::{CollectEvent, Event, VetoEvent};
pub use guard::MultiScopeGuard;
pub use ids::{random_nonzero_i32, IdGenerator};
pub use settings::Settings;
