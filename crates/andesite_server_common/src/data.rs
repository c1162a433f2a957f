//! The persistence adapter interface.
//!
//! The core never implements this trait itself; a concrete provider (SQL,
//! flat files, in-memory) is supplied by the embedding application. All
//! methods are synchronous from the caller's thread and may be called
//! concurrently; the adapter serializes access internally.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Severity attached to entries written to the persistent log sink.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "information",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// Backing storage consumed by the server core.
///
/// Four namespaces: binary blobs (opaque keys to byte strings), settings
/// (string keys to optional strings), a string multimap, and append-only
/// log sinks.
pub trait DataProvider: Send + Sync + 'static {
    /// Fetches the blob stored under `key`, if any.
    fn get_binary(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `bytes` under `key`, replacing any previous blob.
    fn save_binary(&self, key: &str, bytes: &[u8]);

    fn delete_binary(&self, key: &str);

    fn get_setting(&self, key: &str) -> Option<String>;

    /// Sets or clears a setting. `None` clears the value while keeping the
    /// key present; use [`delete_setting`](Self::delete_setting) to remove
    /// the key entirely.
    fn set_setting(&self, key: &str, value: Option<&str>);

    fn delete_setting(&self, key: &str);

    /// Adds `value` under `key`. Keys are non-unique; duplicates are
    /// permitted.
    fn insert_value(&self, key: &str, value: &str);

    /// Deletes pairs under `key`. With `Some(value)` only matching pairs are
    /// removed; with `None` every pair under `key` is removed.
    fn delete_values(&self, key: &str, value: Option<&str>);

    fn get_values(&self, key: &str) -> Vec<String>;

    fn write_log(&self, text: &str, level: LogLevel);

    /// Logs a chat message. An empty `to` slice means the message was a
    /// broadcast.
    fn write_chat_log(&self, from: &str, to: &[String], body: &str, notes: Option<&str>);
}

/// An in-memory [`DataProvider`] for tests and examples. Not durable.
#[derive(Default)]
pub struct MemoryDataProvider {
    binary: Mutex<HashMap<String, Vec<u8>>>,
    settings: Mutex<HashMap<String, Option<String>>>,
    values: Mutex<HashMap<String, Vec<String>>>,
    log: Mutex<Vec<(LogLevel, String)>>,
    chat_log: Mutex<Vec<String>>,
}

impl MemoryDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written to the log sink so far.
    pub fn log_entries(&self) -> Vec<(LogLevel, String)> {
        self.log.lock().clone()
    }

    pub fn chat_log_entries(&self) -> Vec<String> {
        self.chat_log.lock().clone()
    }
}

impl DataProvider for MemoryDataProvider {
    fn get_binary(&self, key: &str) -> Option<Vec<u8>> {
        self.binary.lock().get(key).cloned()
    }

    fn save_binary(&self, key: &str, bytes: &[u8]) {
        self.binary.lock().insert(key.into(), bytes.to_vec());
    }

    fn delete_binary(&self, key: &str) {
        self.binary.lock().remove(key);
    }

    fn get_setting(&self, key: &str) -> Option<String> {
        self.settings.lock().get(key).cloned().flatten()
    }

    fn set_setting(&self, key: &str, value: Option<&str>) {
        self.settings
            .lock()
            .insert(key.into(), value.map(Into::into));
    }

    fn delete_setting(&self, key: &str) {
        self.settings.lock().remove(key);
    }

    fn insert_value(&self, key: &str, value: &str) {
        self.values
            .lock()
            .entry(key.into())
            .or_default()
            .push(value.into());
    }

    fn delete_values(&self, key: &str, value: Option<&str>) {
        let mut values = self.values.lock();
        match value {
            Some(value) => {
                if let Some(entries) = values.get_mut(key) {
                    entries.retain(|v| v != value);
                }
            }
            None => {
                values.remove(key);
            }
        }
    }

    fn get_values(&self, key: &str) -> Vec<String> {
        self.values.lock().get(key).cloned().unwrap_or_default()
    }

    fn write_log(&self, text: &str, level: LogLevel) {
        self.log.lock().push((level, text.into()));
    }

    fn write_chat_log(&self, from: &str, to: &[String], body: &str, notes: Option<&str>) {
        let to = if to.is_empty() {
            "*".into()
        } else {
            to.join(", ")
        };

        let mut entry = format!("{from} -> {to}: {body}");
        if let Some(notes) = notes {
            entry.push_str(" (");
            entry.push_str(notes);
            entry.push(')');
        }

        self.chat_log.lock().push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multimap_semantics() {
        let data = MemoryDataProvider::new();

        data.insert_value("whitelist", "alice");
        data.insert_value("whitelist", "bob");
        data.insert_value("whitelist", "alice");

        assert_eq!(data.get_values("whitelist"), ["alice", "bob", "alice"]);

        data.delete_values("whitelist", Some("alice"));
        assert_eq!(data.get_values("whitelist"), ["bob"]);

        data.delete_values("whitelist", None);
        assert!(data.get_values("whitelist").is_empty());
    }

    #[test]
    fn settings_distinguish_cleared_from_missing() {
        let data = MemoryDataProvider::new();

        data.set_setting("motd", Some("hello"));
        assert_eq!(data.get_setting("motd").as_deref(), Some("hello"));

        data.set_setting("motd", None);
        assert_eq!(data.get_setting("motd"), None);

        data.delete_setting("motd");
        assert_eq!(data.get_setting("motd"), None);
    }
}
